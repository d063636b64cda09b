use approx::assert_relative_eq;
use dockyard_lib::{
    body::BodyKind,
    composition::VesselState,
    destruction,
    event::SimulationEvent,
    na::{Isometry3, UnitQuaternion, Vector3},
    physics::ParryRigidBodies,
    scenario::nominal::{self, EARTH, EARTH_MU, EARTH_RADIUS},
    simulation::{EngineConfig, Placement, Simulation, SpawnRequest},
    units::{Mass, Time},
};
use dockyard_types::prelude::*;

mod common;
use common::{fore_port, port, spawn, vessel, void_sim};

fn earth_sim() -> Simulation {
    Simulation::new(
        EngineConfig::default(),
        nominal::solar_system(),
        Box::new(ParryRigidBodies::new()),
    )
    .unwrap()
}

fn circular(sim: &mut Simulation, name: &str, altitude: f64) -> BodyId {
    let r = EARTH_RADIUS + altitude;
    sim.spawn(SpawnRequest {
        kind: vessel(name, 500.0, 1.0, vec![fore_port(1, 1.0)]),
        parent: EARTH,
        placement: Placement::StateVectors {
            position: Vector3::new(r, 0.0, 0.0),
            velocity: Vector3::new(0.0, (EARTH_MU / r).sqrt(), 0.0),
        },
        rotation: UnitQuaternion::identity(),
        angular_velocity: Vector3::zeros(),
    })
    .unwrap()
}

#[test]
fn bodies_inside_the_death_margin_are_removed_within_the_tick() {
    let mut sim = earth_sim();
    let doomed = circular(&mut sim, "doomed", 5_000.0);
    let safe = circular(&mut sim, "safe", 400_000.0);
    let mut events = sim.subscribe(None);

    sim.tick(Time::from_secs(1.0));

    assert!(sim.body(doomed).is_none());
    assert!(!sim.context().physics.contains(doomed));
    assert!(!sim.context().tree.contains(doomed));
    assert!(sim.body(safe).is_some());
    assert_eq!(
        events.drain(),
        vec![SimulationEvent::Destroyed { body: doomed }]
    );
}

#[test]
fn marked_bodies_wait_for_the_destruction_pass() {
    let mut sim = void_sim(EngineConfig::default());
    let a = spawn(&mut sim, vessel("a", 100.0, 1.0, vec![]), Vector3::zeros(), Vector3::zeros());
    sim.context_mut()
        .bodies
        .get_mut(&a)
        .unwrap()
        .marked_for_destruction = true;
    assert!(sim.body(a).is_some());

    assert_eq!(destruction::run(sim.context_mut()), vec![a]);
    assert!(sim.body(a).is_none());
    assert!(destruction::run(sim.context_mut()).is_empty());
}

#[test]
fn requests_for_unknown_bodies_are_dropped() {
    let mut sim = void_sim(EngineConfig::default());
    sim.context_mut().destruction.request(BodyId(42));
    assert!(destruction::run(sim.context_mut()).is_empty());
    assert_eq!(sim.context().destruction.pending(), 0);
}

#[test]
fn riders_are_evacuated_to_pivots() {
    let mut sim = void_sim(EngineConfig::default());
    let carrier = spawn(
        &mut sim,
        vessel("carrier", 1000.0, 1.0, vec![]),
        Vector3::new(50.0, 0.0, 0.0),
        Vector3::zeros(),
    );
    let rider = sim
        .add_rider("walker", carrier, Isometry3::translation(0.0, 1.0, 0.0), false)
        .unwrap();

    sim.destroy(carrier).unwrap();
    sim.tick(Time::from_secs(1.0));
    assert!(sim.body(carrier).is_none());

    let pivot = sim.context().riders.get(rider).unwrap().carrier;
    assert_ne!(pivot, carrier);
    let pivot_body = sim.body(pivot).unwrap();
    assert!(matches!(pivot_body.kind, BodyKind::Pivot(_)));
    assert_eq!(pivot_body.mass(), Mass::default());
    assert_relative_eq!(
        pivot_body.orbit.absolute_position(),
        Vector3::new(50.0, 1.0, 0.0),
        epsilon = 1e-9
    );
    assert_eq!(
        sim.context().riders.get(rider).unwrap().local_pose,
        Isometry3::identity()
    );
    // Only vessels are mirrored into physics
    assert!(!sim.context().physics.contains(pivot));

    // An occupied pivot stays, an empty one goes
    sim.tick(Time::from_secs(1.0));
    assert!(sim.body(pivot).is_some());
    sim.context_mut().riders.remove(rider);
    sim.tick(Time::from_secs(1.0));
    assert!(sim.body(pivot).is_none());
}

#[test]
fn docked_vessels_are_undocked_before_removal() {
    let mut sim = void_sim(EngineConfig::default());
    let light = spawn(&mut sim, vessel("light", 1000.0, 1.0, vec![fore_port(1, 1.0)]), Vector3::zeros(), Vector3::zeros());
    let heavy = spawn(&mut sim, vessel("heavy", 4000.0, 2.0, vec![fore_port(1, 2.0)]), Vector3::z(), Vector3::zeros());
    sim.dock(port(light, 1), port(heavy, 1)).unwrap();
    let mut events = sim.subscribe(None);

    sim.destroy(heavy).unwrap();
    sim.tick(Time::from_secs(1.0));

    let ctx = sim.context();
    assert!(sim.body(heavy).is_none());
    assert_eq!(ctx.tree.state(light), Some(VesselState::Standalone));
    assert_eq!(ctx.group_mass(light), Mass::from_kilograms(1000.0));
    assert_eq!(ctx.tree.edge_count(), 0);
    assert!(ctx.physics.contains(light));
    assert!(!ctx.physics.contains(heavy));
    assert_eq!(ctx.tree.check_invariants(), Ok(()));

    let events = events.drain();
    let undocked = events
        .iter()
        .position(|e| matches!(e, SimulationEvent::Undocked { .. }));
    let destroyed = events
        .iter()
        .position(|e| *e == SimulationEvent::Destroyed { body: heavy });
    assert!(undocked.is_some() && destroyed.is_some());
    assert!(undocked < destroyed);
}

#[test]
fn destroyed_pivots_hand_their_riders_on() {
    let mut sim = void_sim(EngineConfig::default());
    let carrier = spawn(
        &mut sim,
        vessel("carrier", 1000.0, 1.0, vec![]),
        Vector3::new(50.0, 0.0, 0.0),
        Vector3::new(2.0, 0.0, 0.0),
    );
    let rider = sim
        .add_rider("walker", carrier, Isometry3::translation(0.0, 1.0, 0.0), false)
        .unwrap();
    sim.destroy(carrier).unwrap();
    sim.tick(Time::from_secs(1.0));
    let first = sim.context().riders.get(rider).unwrap().carrier;
    assert_relative_eq!(
        sim.body(first).unwrap().orbit.absolute_position(),
        Vector3::new(52.0, 1.0, 0.0),
        epsilon = 1e-9
    );
    let mut events = sim.subscribe(None);

    sim.destroy(first).unwrap();
    sim.tick(Time::from_secs(1.0));

    assert!(sim.body(first).is_none());
    let second = sim.context().riders.get(rider).unwrap().carrier;
    assert_ne!(second, first);
    let pivot = sim.body(second).unwrap();
    assert!(matches!(pivot.kind, BodyKind::Pivot(_)));
    assert_relative_eq!(pivot.orbit.absolute_position(), Vector3::new(54.0, 1.0, 0.0), epsilon = 1e-9);
    assert_relative_eq!(pivot.orbit.absolute_velocity(), Vector3::new(2.0, 0.0, 0.0), epsilon = 1e-9);
    assert!(events
        .drain()
        .contains(&SimulationEvent::Destroyed { body: first }));

    // The rider never dangles on a missing carrier
    sim.tick(Time::from_secs(1.0));
    assert!(sim.body(second).is_some());
    assert_eq!(sim.context().riders.get(rider).unwrap().carrier, second);
}
