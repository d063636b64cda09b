use dockyard_lib::{
    na::Vector3,
    simulation::{EngineConfig, SimulationHandle},
    units::Time,
};
use std::thread;

mod common;
use common::{aft_port, fore_port, port, spawn, vessel, void_sim};

#[test]
fn requests_interleave_with_ticks() {
    let mut sim = void_sim(EngineConfig {
        worker_threads: 2,
        ..Default::default()
    });
    let a = spawn(&mut sim, vessel("a", 1000.0, 1.0, vec![fore_port(1, 1.0)]), Vector3::zeros(), Vector3::zeros());
    let b = spawn(
        &mut sim,
        vessel("b", 2000.0, 1.0, vec![fore_port(1, 1.0), aft_port(2, -1.0)]),
        Vector3::new(0.0, 0.0, 5.0),
        Vector3::zeros(),
    );
    let c = spawn(&mut sim, vessel("c", 500.0, 1.0, vec![fore_port(1, 1.0)]), Vector3::new(0.0, 0.0, -5.0), Vector3::zeros());
    let handle = SimulationHandle::new(sim);

    let ticker = {
        let handle = handle.clone();
        thread::spawn(move || {
            for _ in 0..200 {
                handle.tick(Time::from_millis(100.0));
            }
        })
    };
    let docker = {
        let handle = handle.clone();
        thread::spawn(move || {
            for _ in 0..50 {
                handle.request_dock(port(a, 1), port(b, 1)).unwrap();
                handle.request_dock(port(c, 1), port(b, 2)).unwrap();
                handle.request_undock(port(a, 1)).unwrap();
                handle.request_undock(port(b, 2)).unwrap();
            }
        })
    };
    let follower = {
        let handle = handle.clone();
        thread::spawn(move || {
            for _ in 0..50 {
                // Rejections are fine here, the state must stay consistent
                let _ = handle.request_stabilize(c, a, true);
                let _ = handle.request_unstabilize(c);
            }
        })
    };
    ticker.join().unwrap();
    docker.join().unwrap();
    follower.join().unwrap();

    handle.with(|sim| {
        let ctx = sim.context();
        assert_eq!(ctx.info.tick, 200);
        assert_eq!(ctx.tree.check_invariants(), Ok(()));
        assert!(ctx.links.check_invariants());
        assert_eq!(ctx.tree.edge_count(), 0);
        for v in [a, b, c] {
            assert!(ctx.tree.is_main(v));
            assert!(ctx.physics.contains(v));
        }
    });
}
