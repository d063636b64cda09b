use approx::assert_relative_eq;
use dockyard_lib::{
    body::{BodyKind, DynamicBody},
    composition::{port_alignment, VesselState},
    docking::DockingError,
    event::SimulationEvent,
    na::{Isometry3, Vector3},
    physics::{HullPart, ParryRigidBodies, PhysicsError, RigidBodyAdapter, RigidBodyDesc},
    scenario::nominal,
    simulation::{CommandError, EngineConfig, Simulation},
    solar_system::SolarSystem,
    units::{Mass, Time},
};
use dockyard_types::prelude::*;
use parry3d_f64::bounding_volume::Aabb;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

mod common;
use common::{aft_port, fore_port, port, spawn, vessel, void_sim, VOID};

fn velocity(sim: &Simulation, id: BodyId) -> Vector3<f64> {
    sim.body(id).map(|b| b.orbit.absolute_velocity()).unwrap()
}

fn port_spec(body: &DynamicBody, id: u32) -> dockyard_lib::body::PortSpec {
    body.kind.vessel().unwrap().port(PortId(id)).unwrap().clone()
}

/// V1 (1,000 kg) and V2 (4,000 kg), both at rest
fn light_and_heavy(sim: &mut Simulation) -> (BodyId, BodyId) {
    let v1 = spawn(
        sim,
        vessel("v1", 1000.0, 1.0, vec![fore_port(1, 1.0), aft_port(2, -1.0)]),
        Vector3::new(0.0, 0.0, 20.0),
        Vector3::zeros(),
    );
    let v2 = spawn(
        sim,
        vessel("v2", 4000.0, 2.0, vec![fore_port(1, 2.0), aft_port(2, -2.0)]),
        Vector3::new(0.0, 0.0, 10.0),
        Vector3::zeros(),
    );
    (v1, v2)
}

#[test]
fn heavier_group_keeps_the_main() {
    let mut sim = void_sim(EngineConfig::default());
    let (v1, v2) = light_and_heavy(&mut sim);
    let mut events = sim.subscribe(None);
    let v2_pose_before = sim.context().world_pose(v2).unwrap();

    let main = sim.dock(port(v1, 1), port(v2, 1)).unwrap();
    assert_eq!(main, v2);

    let ctx = sim.context();
    assert_eq!(ctx.tree.state(v1), Some(VesselState::DockedChild { main: v2 }));
    assert_eq!(ctx.tree.state(v2), Some(VesselState::DockedMain));
    assert_eq!(ctx.tree.main_vessel(ctx.tree.main_vessel(v1).unwrap()), Some(v2));
    assert_eq!(ctx.group_mass(v1), Mass::from_kilograms(5000.0));

    // V1 hangs off V2's port 1, facing it
    let expected = port_alignment(
        &port_spec(sim.body(v2).unwrap(), 1),
        &port_spec(sim.body(v1).unwrap(), 1),
    );
    let relative = ctx.tree.relative_to_main(v1);
    assert_relative_eq!(relative, expected, epsilon = 1e-12);
    assert_relative_eq!(relative.translation.vector, Vector3::new(0.0, 0.0, 3.0), epsilon = 1e-12);

    // The orbit moved to the composite center; the main's origin did not
    assert_relative_eq!(
        ctx.tree.group(v2).unwrap().mass_center,
        Vector3::new(0.0, 0.0, 1.0),
        epsilon = 1e-12
    );
    let v2_pose_after = ctx.world_pose(v2).unwrap();
    assert_relative_eq!(
        v2_pose_after.translation.vector,
        v2_pose_before.translation.vector,
        epsilon = 1e-9
    );
    assert!(ctx.physics.contains(v2));
    assert!(!ctx.physics.contains(v1));
    assert_eq!(ctx.tree.check_invariants(), Ok(()));

    sim.tick(dockyard_lib::units::Time::from_secs(1.0));
    assert!(events.drain().contains(&SimulationEvent::Docked {
        main: v2,
        a: port(v1, 1),
        b: port(v2, 1),
    }));
}

#[test]
fn equal_masses_keep_the_initiator() {
    let mut sim = void_sim(EngineConfig::default());
    let a = spawn(&mut sim, vessel("a", 500.0, 1.0, vec![fore_port(1, 1.0)]), Vector3::zeros(), Vector3::zeros());
    let b = spawn(&mut sim, vessel("b", 500.0, 1.0, vec![fore_port(1, 1.0)]), Vector3::x(), Vector3::zeros());
    assert_eq!(sim.dock(port(b, 1), port(a, 1)).unwrap(), b);
}

#[test]
fn momentum_is_merged() {
    let mut sim = void_sim(EngineConfig::default());
    let v1 = spawn(&mut sim, vessel("v1", 1000.0, 1.0, vec![fore_port(1, 1.0)]), Vector3::zeros(), Vector3::new(5.0, 0.0, 0.0));
    let v2 = spawn(&mut sim, vessel("v2", 4000.0, 1.0, vec![fore_port(1, 1.0)]), Vector3::x(), Vector3::zeros());

    sim.dock(port(v1, 1), port(v2, 1)).unwrap();
    assert_relative_eq!(velocity(&sim, v2), Vector3::new(1.0, 0.0, 0.0), epsilon = 1e-12);
}

#[test]
fn undock_splits_masses_and_separates() {
    let config = EngineConfig::default();
    let separation = config.separation_speed;
    let mut sim = void_sim(config);
    let (v1, v2) = light_and_heavy(&mut sim);
    sim.dock(port(v1, 1), port(v2, 1)).unwrap();
    let v1_pose = sim.context().world_pose(v1).unwrap();

    let mains = sim.undock(port(v1, 1)).unwrap();
    assert_eq!(mains, [v1, v2]);

    let ctx = sim.context();
    assert_eq!(ctx.group_mass(v1), Mass::from_kilograms(1000.0));
    assert_eq!(ctx.group_mass(v2), Mass::from_kilograms(4000.0));
    for v in [v1, v2] {
        assert_eq!(ctx.tree.state(v), Some(VesselState::Standalone));
        assert_eq!(ctx.tree.relative_to_main(v), Isometry3::identity());
        assert!(ctx.physics.contains(v));
    }
    assert_eq!(ctx.tree.edge_count(), 0);

    // V1 keeps the pose it had while docked
    assert_relative_eq!(
        ctx.world_pose(v1).unwrap().translation.vector,
        v1_pose.translation.vector,
        epsilon = 1e-9
    );

    let (u1, u2) = (velocity(&sim, v1), velocity(&sim, v2));
    assert_relative_eq!((u1 - u2).norm(), separation, epsilon = 1e-12);
    assert_relative_eq!(u1 * 1000.0 + u2 * 4000.0, Vector3::zeros(), epsilon = 1e-9);
    // V1 sits forward of V2 and moves away along +Z
    assert!(u1.z > 0.0 && u2.z < 0.0);
}

#[test]
fn dock_then_undock_restores_both_sides() {
    let mut sim = void_sim(EngineConfig::default());
    let (v1, v2) = light_and_heavy(&mut sim);
    let mass_before = [sim.context().group_mass(v1), sim.context().group_mass(v2)];

    sim.dock(port(v2, 2), port(v1, 2)).unwrap();
    sim.undock(port(v2, 2)).unwrap();

    let ctx = sim.context();
    assert_eq!([ctx.group_mass(v1), ctx.group_mass(v2)], mass_before);
    assert_eq!(ctx.tree.relative_to_main(v1), Isometry3::identity());
    assert_eq!(ctx.tree.relative_to_main(v2), Isometry3::identity());
    assert_relative_eq!(ctx.tree.group(v1).unwrap().mass_center, Vector3::zeros(), epsilon = 1e-12);
    assert_eq!(ctx.tree.check_invariants(), Ok(()));
}

#[test]
fn rejected_docks_change_nothing() {
    let mut sim = void_sim(EngineConfig::default());
    let (v1, v2) = light_and_heavy(&mut sim);
    let loose = spawn(
        &mut sim,
        BodyKind::Loose(dockyard_lib::body::LooseData {
            name: "crate".to_string(),
            mass: Mass::from_kilograms(10.0),
        }),
        Vector3::zeros(),
        Vector3::zeros(),
    );

    assert!(matches!(
        sim.dock(port(v1, 1), port(v1, 2)),
        Err(CommandError::Docking(DockingError::SameVessel(_)))
    ));
    assert!(matches!(
        sim.dock(port(v1, 9), port(v2, 1)),
        Err(CommandError::Docking(DockingError::UnknownPort(_)))
    ));
    assert!(matches!(
        sim.dock(port(loose, 1), port(v2, 1)),
        Err(CommandError::Docking(DockingError::NotAVessel(_)))
    ));
    assert!(matches!(
        sim.undock(port(v1, 1)),
        Err(CommandError::Docking(DockingError::NotDocked(_)))
    ));

    sim.dock(port(v1, 1), port(v2, 1)).unwrap();
    assert!(matches!(
        sim.dock(port(v1, 1), port(v2, 2)),
        Err(CommandError::Docking(DockingError::AlreadyDocked(_)))
    ));
    // A second edge between the same group would close a cycle
    assert!(matches!(
        sim.dock(port(v1, 2), port(v2, 2)),
        Err(CommandError::Docking(DockingError::CircularDocking { .. }))
    ));
    assert_eq!(sim.context().tree.edge_count(), 1);

    let v3 = spawn(&mut sim, vessel("v3", 10.0, 1.0, vec![fore_port(1, 1.0)]), Vector3::zeros(), Vector3::zeros());
    sim.context_mut().bodies.get_mut(&v3).unwrap().marked_for_destruction = true;
    assert!(matches!(
        sim.dock(port(v3, 1), port(v2, 2)),
        Err(CommandError::Docking(DockingError::MarkedForDestruction(_)))
    ));
}

#[test]
fn triggers_pair_across_the_seam_and_security_spreads() {
    let mut sim = void_sim(EngineConfig::default());
    let station = spawn(&mut sim, BodyKind::Vessel(nominal::station()), Vector3::zeros(), Vector3::zeros());
    let tug = spawn(&mut sim, BodyKind::Vessel(nominal::tug()), Vector3::new(0.0, 0.0, 12.0), Vector3::zeros());

    sim.dock(port(tug, 1), port(station, 1)).unwrap();
    let trigger = |sim: &Simulation, v: BodyId| {
        sim.body(v).unwrap().kind.vessel().unwrap().triggers[0].paired_with
    };
    assert_eq!(trigger(&sim, station), Some((tug, TriggerId(1))));
    assert_eq!(trigger(&sim, tug), Some((station, TriggerId(1))));
    let owner = sim
        .body(tug)
        .and_then(|b| b.kind.vessel())
        .and_then(|v| v.security.as_ref())
        .map(|s| s.owner.clone());
    assert_eq!(owner.as_deref(), Some("ops"));

    sim.undock(port(station, 1)).unwrap();
    assert_eq!(trigger(&sim, station), None);
    assert_eq!(trigger(&sim, tug), None);
}

#[test]
fn riders_keep_their_world_pose() {
    let mut sim = void_sim(EngineConfig::default());
    let station = spawn(&mut sim, BodyKind::Vessel(nominal::station()), Vector3::zeros(), Vector3::zeros());
    let tug = spawn(&mut sim, BodyKind::Vessel(nominal::tug()), Vector3::new(5.0, 0.0, 12.0), Vector3::zeros());
    let walker = sim
        .add_rider("walker", tug, Isometry3::translation(0.0, 0.5, 0.0), false)
        .unwrap();
    let pilot = sim.add_rider("pilot", tug, Isometry3::identity(), true).unwrap();
    let mut events = sim.subscribe(None);

    let walker_world = sim.context().world_pose(tug).unwrap()
        * sim.context().riders.get(walker).unwrap().local_pose;
    sim.dock(port(tug, 1), port(station, 1)).unwrap();

    let ctx = sim.context();
    let after = ctx.world_pose(tug).unwrap() * ctx.riders.get(walker).unwrap().local_pose;
    assert_relative_eq!(after.translation.vector, walker_world.translation.vector, epsilon = 1e-9);
    assert!(ctx.riders.get(pilot).unwrap().pending_correction.is_some());

    sim.tick(dockyard_lib::units::Time::from_secs(1.0));
    assert!(events.drain().contains(&SimulationEvent::RiderCorrected {
        rider: pilot,
        carrier: tug,
    }));
}

/// Rigid bodies that refuse new bodies while `refuse` is set
#[derive(Debug)]
struct FlakyPhysics {
    inner: ParryRigidBodies,
    refuse: Arc<AtomicBool>,
}

impl RigidBodyAdapter for FlakyPhysics {
    fn create(&mut self, desc: RigidBodyDesc) -> Result<(), PhysicsError> {
        if self.refuse.load(Ordering::SeqCst) {
            return Err(PhysicsError::Empty(desc.id));
        }
        self.inner.create(desc)
    }

    fn remove(&mut self, id: BodyId) -> bool {
        self.inner.remove(id)
    }

    fn set_pose(
        &mut self,
        id: BodyId,
        pose: Isometry3<f64>,
        linear_velocity: Vector3<f64>,
        angular_velocity: Vector3<f64>,
    ) -> Result<(), PhysicsError> {
        self.inner.set_pose(id, pose, linear_velocity, angular_velocity)
    }

    fn compute_aggregate_bounds(&self, parts: &[HullPart]) -> Aabb {
        self.inner.compute_aggregate_bounds(parts)
    }

    fn contains(&self, id: BodyId) -> bool {
        self.inner.contains(id)
    }
}

#[test]
fn physics_failures_do_not_abort_dock_or_undock() {
    let refuse = Arc::new(AtomicBool::new(false));
    let mut sys = SolarSystem::new();
    sys.add(CelestialBody::new(VOID, "void", 0.0, 0.0)).unwrap();
    let physics = FlakyPhysics {
        inner: ParryRigidBodies::new(),
        refuse: refuse.clone(),
    };
    let mut sim = Simulation::new(EngineConfig::default(), sys, Box::new(physics)).unwrap();
    let (v1, v2) = light_and_heavy(&mut sim);
    let mut events = sim.subscribe(None);
    refuse.store(true, Ordering::SeqCst);

    assert_eq!(sim.dock(port(v1, 1), port(v2, 1)).unwrap(), v2);
    let ctx = sim.context();
    assert_eq!(ctx.tree.state(v1), Some(VesselState::DockedChild { main: v2 }));
    assert_eq!(ctx.group_mass(v1), Mass::from_kilograms(5000.0));
    assert_eq!(ctx.tree.check_invariants(), Ok(()));
    assert!(!ctx.physics.contains(v1) && !ctx.physics.contains(v2));

    sim.tick(Time::from_secs(1.0));
    assert_eq!(sim.undock(port(v1, 1)).unwrap(), [v1, v2]);
    let ctx = sim.context();
    for v in [v1, v2] {
        assert_eq!(ctx.tree.state(v), Some(VesselState::Standalone));
        assert!(!ctx.physics.contains(v));
    }
    assert_eq!(ctx.tree.edge_count(), 0);
    assert_eq!(ctx.tree.check_invariants(), Ok(()));

    // Physics catches up once it accepts bodies again
    refuse.store(false, Ordering::SeqCst);
    sim.tick(Time::from_secs(1.0));
    assert!(sim.context().physics.contains(v1));
    assert!(sim.context().physics.contains(v2));

    let events = events.drain();
    assert!(events
        .iter()
        .any(|e| matches!(e, SimulationEvent::Docked { main, .. } if *main == v2)));
    assert!(events
        .iter()
        .any(|e| matches!(e, SimulationEvent::Undocked { mains, .. } if *mains == [v1, v2])));
}
