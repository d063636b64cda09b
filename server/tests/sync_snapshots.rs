use dockyard_lib::{
    na::{UnitQuaternion, Vector3},
    physics::ParryRigidBodies,
    scenario::nominal::{self, EARTH, EARTH_RADIUS},
    simulation::{EngineConfig, Placement, Simulation, SpawnRequest},
    sync::{self, MotionSnapshot},
};
use dockyard_types::prelude::*;

mod common;
use common::{fore_port, port, spawn, vessel, void_sim};

#[test]
fn bound_orbits_are_sent_as_elements() {
    let mut sim = Simulation::new(
        EngineConfig::default(),
        nominal::solar_system(),
        Box::new(ParryRigidBodies::new()),
    )
    .unwrap();
    let r = EARTH_RADIUS + 500_000.0;
    let id = sim
        .spawn(SpawnRequest {
            kind: vessel("sat", 100.0, 1.0, vec![]),
            parent: EARTH,
            placement: Placement::Elements {
                elements: OrbitalElements::circular(r),
                epoch: 0.0,
            },
            rotation: UnitQuaternion::identity(),
            angular_velocity: Vector3::zeros(),
        })
        .unwrap();

    match sync::orbit_or_realtime_snapshot(sim.context(), id) {
        Some(MotionSnapshot::Orbit { body, orbit, .. }) => {
            assert_eq!(body, id);
            assert_eq!(orbit.parent, EARTH);
            assert!((orbit.elements.semi_major_axis - r).abs() < 1e-3);
        }
        other => panic!("expected an element snapshot, got {other:?}"),
    }
}

#[test]
fn drifting_and_docked_bodies() {
    let mut sim = void_sim(EngineConfig::default());
    let a = spawn(&mut sim, vessel("a", 1000.0, 1.0, vec![fore_port(1, 1.0)]), Vector3::zeros(), Vector3::x());
    let b = spawn(&mut sim, vessel("b", 2000.0, 1.0, vec![fore_port(1, 1.0)]), Vector3::z(), Vector3::x());

    assert!(matches!(
        sync::orbit_or_realtime_snapshot(sim.context(), a),
        Some(MotionSnapshot::Realtime { body, .. }) if body == a
    ));

    sim.dock(port(a, 1), port(b, 1)).unwrap();
    let snapshots = sync::snapshot_all(sim.context());
    assert_eq!(snapshots.iter().map(|s| s.body()).collect::<Vec<_>>(), vec![a, b]);
    assert!(matches!(
        snapshots[0],
        MotionSnapshot::Docked { main, .. } if main == b
    ));

    let json = serde_json::to_value(&snapshots[0]).unwrap();
    assert_eq!(json["mode"], "docked");
    assert!(sync::orbit_or_realtime_snapshot(sim.context(), BodyId(9)).is_none());
}

#[test]
fn stabilization_links_are_reported_for_the_main() {
    let mut sim = void_sim(EngineConfig::default());
    let t = spawn(&mut sim, vessel("t", 1000.0, 1.0, vec![fore_port(1, 1.0)]), Vector3::zeros(), Vector3::zeros());
    let d = spawn(&mut sim, vessel("d", 1000.0, 1.0, vec![]), Vector3::new(4.0, 0.0, 0.0), Vector3::zeros());
    assert!(sync::stabilization_snapshot(sim.context(), d).is_none());

    sim.stabilize(d, t, false).unwrap();
    let snapshot = sync::stabilization_snapshot(sim.context(), d).unwrap();
    assert_eq!(snapshot.target, t);
    assert_eq!(snapshot.offset, Vector3::new(4.0, 0.0, 0.0));
    assert_eq!(snapshot.attached_at, 0.0);
}
