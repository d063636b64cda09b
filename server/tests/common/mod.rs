#![allow(dead_code)]

use dockyard_lib::{
    body::{BodyKind, PortSpec, VesselData},
    na::{UnitQuaternion, Vector3},
    physics::ParryRigidBodies,
    simulation::{EngineConfig, Placement, Simulation, SpawnRequest},
    solar_system::SolarSystem,
    units::Mass,
};
use dockyard_types::prelude::*;
use std::f64::consts::PI;

/// A massless root: bodies drift in straight lines
pub const VOID: CelestialId = CelestialId(0);

pub fn void_sim(config: EngineConfig) -> Simulation {
    let mut sys = SolarSystem::new();
    sys.add(CelestialBody::new(VOID, "void", 0.0, 0.0)).unwrap();
    Simulation::new(config, sys, Box::new(ParryRigidBodies::new())).unwrap()
}

/// Faces +Z
pub fn fore_port(id: u32, z: f64) -> PortSpec {
    PortSpec {
        id: PortId(id),
        name: format!("fore-{id}"),
        position: Vector3::new(0.0, 0.0, z),
        rotation: UnitQuaternion::identity(),
    }
}

/// Faces -Z
pub fn aft_port(id: u32, z: f64) -> PortSpec {
    PortSpec {
        id: PortId(id),
        name: format!("aft-{id}"),
        position: Vector3::new(0.0, 0.0, z),
        rotation: UnitQuaternion::from_axis_angle(&Vector3::y_axis(), PI),
    }
}

pub fn vessel(name: &str, kilograms: f64, half_extent: f64, ports: Vec<PortSpec>) -> BodyKind {
    BodyKind::Vessel(VesselData {
        name: name.to_string(),
        mass: Mass::from_kilograms(kilograms),
        hull_half_extents: Vector3::repeat(half_extent),
        ports,
        triggers: Vec::new(),
        security: None,
    })
}

pub fn spawn(sim: &mut Simulation, kind: BodyKind, position: Vector3<f64>, velocity: Vector3<f64>) -> BodyId {
    sim.spawn(SpawnRequest {
        kind,
        parent: VOID,
        placement: Placement::StateVectors { position, velocity },
        rotation: UnitQuaternion::identity(),
        angular_velocity: Vector3::zeros(),
    })
    .unwrap()
}

pub fn port(vessel: BodyId, port: u32) -> PortRef {
    PortRef::new(vessel, PortId(port))
}
