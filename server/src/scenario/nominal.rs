use dockyard_types::prelude::*;
use na::{Isometry3, UnitQuaternion, Vector3};
use std::{collections::BTreeSet, f64::consts::PI};
use tracing::error;

use super::{BodyPlan, RiderPlan, Scenario};
use crate::{
    body::{BodyKind, LooseData, PortSpec, SecurityData, TriggerSpec, VesselData},
    simulation::{EngineConfig, Placement},
    solar_system::SolarSystem,
    units::Mass,
};

pub const EARTH: CelestialId = CelestialId(1);
pub const MOON: CelestialId = CelestialId(2);

pub const EARTH_MU: f64 = 3.986004418e14;
pub const EARTH_RADIUS: f64 = 6.371e6;

/// Altitude of the assembly orbit above the surface [m]
const ASSEMBLY_ALTITUDE: f64 = 629_000.0;

pub fn solar_system() -> SolarSystem {
    let mut sys = SolarSystem::new();
    for body in [
        CelestialBody::new(EARTH, "Earth", EARTH_MU, EARTH_RADIUS),
        CelestialBody::new(MOON, "Moon", 4.9048695e12, 1.7374e6)
            .with_parent(EARTH, OrbitalElements::circular(3.844e8))
            .with_influence_radius(6.61e7),
    ] {
        // Static data, the tree is well formed
        if let Err(e) = sys.add(body) {
            error!(err = %e, "Nominal solar system is inconsistent");
        }
    }
    sys
}

fn port(id: u32, z: f64) -> PortSpec {
    PortSpec {
        id: PortId(id),
        name: if z >= 0.0 { "fore" } else { "aft" }.to_string(),
        position: Vector3::new(0.0, 0.0, z),
        rotation: if z >= 0.0 {
            UnitQuaternion::identity()
        } else {
            UnitQuaternion::from_axis_angle(&Vector3::y_axis(), PI)
        },
    }
}

fn trigger(id: u32, name: &str, z: f64) -> TriggerSpec {
    TriggerSpec {
        id: TriggerId(id),
        name: name.to_string(),
        position: Vector3::new(0.0, 0.0, z),
        paired_with: None,
    }
}

pub fn station() -> VesselData {
    VesselData {
        name: "station".to_string(),
        mass: Mass::from_tonnes(4.0),
        hull_half_extents: Vector3::new(2.0, 2.0, 4.0),
        ports: vec![port(1, 4.0), port(2, -4.0)],
        triggers: vec![trigger(1, "fore-airlock", 3.5)],
        security: Some(SecurityData {
            owner: "ops".to_string(),
            authorized: BTreeSet::from(["ops".to_string(), "crew".to_string()]),
        }),
    }
}

pub fn tug() -> VesselData {
    VesselData {
        name: "tug".to_string(),
        mass: Mass::from_tonnes(1.0),
        hull_half_extents: Vector3::new(1.0, 1.0, 2.0),
        ports: vec![port(1, 2.0)],
        triggers: vec![trigger(1, "hatch", 1.5)],
        security: None,
    }
}

/// Station core, tug and a cargo pod trailing along a low circular orbit
pub fn scenario() -> Scenario {
    let r = EARTH_RADIUS + ASSEMBLY_ALTITUDE;
    let v = (EARTH_MU / r).sqrt();
    let trailing = |behind: f64| Placement::StateVectors {
        position: Vector3::new(r, -behind, 0.0),
        velocity: Vector3::new(0.0, v, 0.0),
    };

    Scenario {
        name: "nominal".to_string(),
        engine: EngineConfig::default(),
        solar_system: solar_system(),
        bodies: vec![
            BodyPlan {
                name: "station".to_string(),
                kind: BodyKind::Vessel(station()),
                parent: EARTH,
                placement: Placement::Elements {
                    elements: OrbitalElements::circular(r),
                    epoch: 0.0,
                },
                rotation: UnitQuaternion::identity(),
            },
            BodyPlan {
                name: "tug".to_string(),
                kind: BodyKind::Vessel(tug()),
                parent: EARTH,
                placement: trailing(30.0),
                rotation: UnitQuaternion::identity(),
            },
            BodyPlan {
                name: "cargo".to_string(),
                kind: BodyKind::Loose(LooseData {
                    name: "cargo".to_string(),
                    mass: Mass::from_kilograms(250.0),
                }),
                parent: EARTH,
                placement: trailing(60.0),
                rotation: UnitQuaternion::identity(),
            },
        ],
        riders: vec![
            RiderPlan {
                name: "engineer".to_string(),
                carrier: "station".to_string(),
                local_pose: Isometry3::translation(0.0, -1.0, 0.0),
                connected: false,
            },
            RiderPlan {
                name: "pilot".to_string(),
                carrier: "tug".to_string(),
                local_pose: Isometry3::identity(),
                connected: true,
            },
        ],
    }
}
