use dockyard_types::prelude::*;
use na::{Isometry3, UnitQuaternion, Vector3};
use std::{collections::BTreeMap, path::Path};
use tracing::info;

use self::config::{Config, ConfigError};
use crate::{
    body::{BodyKind, LooseData, PortSpec, SecurityData, TriggerSpec, VesselData},
    physics::RigidBodyAdapter,
    simulation::{CommandError, EngineConfig, Placement, Simulation, SpawnRequest},
    solar_system::SolarSystem,
    units::Mass,
};

pub mod config;
pub mod nominal;

/// A body to spawn when the scenario is built. Ids are handed out in
/// declaration order, starting at 1.
#[derive(Debug, Clone)]
pub struct BodyPlan {
    pub name: String,
    pub kind: BodyKind,
    pub parent: CelestialId,
    pub placement: Placement,
    pub rotation: UnitQuaternion<f64>,
}

#[derive(Debug, Clone)]
pub struct RiderPlan {
    pub name: String,
    pub carrier: String,
    pub local_pose: Isometry3<f64>,
    pub connected: bool,
}

#[derive(Debug, Clone)]
pub struct Scenario {
    pub name: String,
    pub engine: EngineConfig,
    pub solar_system: SolarSystem,
    pub bodies: Vec<BodyPlan>,
    pub riders: Vec<RiderPlan>,
}

impl Scenario {
    pub fn load<P: AsRef<Path>>(config: Option<P>) -> Result<Self, ConfigError> {
        if let Some(cfg_path) = config.as_ref() {
            info!(
                config = %cfg_path.as_ref().display(),
                "Loading scenario from config file",
            );
            let cfg = Config::load(cfg_path)?;
            Self::from_config(&cfg)
        } else {
            info!("Loading default nominal scenario");
            Ok(nominal::scenario())
        }
    }

    pub fn from_config(cfg: &Config) -> Result<Self, ConfigError> {
        let mut solar_system = SolarSystem::new();
        let mut pending: Vec<&config::Celestial> = cfg.celestials.iter().collect();
        // Parents go in before their children
        while !pending.is_empty() {
            let before = pending.len();
            let (ready, rest): (Vec<_>, Vec<_>) = pending.into_iter().partition(|c| {
                c.parent
                    .map(|p| solar_system.contains(CelestialId(p)))
                    .unwrap_or(true)
            });
            for c in ready {
                solar_system.add(celestial(c))?;
            }
            if rest.len() == before {
                let c = rest[0];
                return Err(ConfigError::UnknownParent {
                    body: c.name.clone(),
                    parent: c.parent.unwrap_or_default(),
                });
            }
            pending = rest;
        }

        let mut bodies = Vec::new();
        for v in cfg.vessels.iter() {
            let placement = v
                .placement()
                .and_then(placement)
                .ok_or_else(|| ConfigError::MissingPlacement(v.name.clone()))?;
            bodies.push(BodyPlan {
                name: v.name.clone(),
                kind: BodyKind::Vessel(vessel_data(v)),
                parent: CelestialId(v.parent),
                placement,
                rotation: euler_degrees(v.attitude),
            });
        }
        for l in cfg.loose_objects.iter() {
            let placement = l
                .placement()
                .and_then(placement)
                .ok_or_else(|| ConfigError::MissingPlacement(l.name.clone()))?;
            bodies.push(BodyPlan {
                name: l.name.clone(),
                kind: BodyKind::Loose(LooseData {
                    name: l.name.clone(),
                    mass: Mass::from_kilograms(l.mass),
                }),
                parent: CelestialId(l.parent),
                placement,
                rotation: UnitQuaternion::identity(),
            });
        }

        let riders = cfg
            .riders
            .iter()
            .map(|r| RiderPlan {
                name: r.name.clone(),
                carrier: r.carrier.clone(),
                local_pose: Isometry3::translation(r.position[0], r.position[1], r.position[2]),
                connected: r.connected,
            })
            .collect();

        Ok(Self {
            name: cfg.name.clone().unwrap_or_else(|| "unnamed".to_string()),
            engine: cfg.engine.clone().unwrap_or_default(),
            solar_system,
            bodies,
            riders,
        })
    }

    /// Spawn every body and rider into a fresh simulation
    pub fn build(&self, physics: Box<dyn RigidBodyAdapter>) -> Result<Simulation, CommandError> {
        let mut sim = Simulation::new(self.engine.clone(), self.solar_system.clone(), physics)?;
        let mut ids = BTreeMap::new();
        for plan in self.bodies.iter() {
            let id = sim.spawn(SpawnRequest {
                kind: plan.kind.clone(),
                parent: plan.parent,
                placement: plan.placement,
                rotation: plan.rotation,
                angular_velocity: Vector3::zeros(),
            })?;
            ids.insert(plan.name.as_str(), id);
        }
        for rider in self.riders.iter() {
            if let Some(carrier) = ids.get(rider.carrier.as_str()) {
                sim.add_rider(rider.name.clone(), *carrier, rider.local_pose, rider.connected)?;
            }
        }
        info!(
            scenario = %self.name,
            bodies = self.bodies.len(),
            riders = self.riders.len(),
            "Scenario built"
        );
        Ok(sim)
    }
}

fn celestial(c: &config::Celestial) -> CelestialBody {
    CelestialBody {
        id: CelestialId(c.id),
        name: c.name.clone(),
        mu: c.mu,
        radius: c.radius,
        gravity_influence_radius: c.influence_radius.unwrap_or(f64::INFINITY),
        parent: c.parent.map(CelestialId),
        orbit: c.orbit,
    }
}

fn placement(p: &config::Placement) -> Option<Placement> {
    match (p.orbit, p.position, p.velocity) {
        (Some(elements), _, _) => Some(Placement::Elements {
            elements,
            epoch: p.epoch,
        }),
        (None, Some(position), Some(velocity)) => Some(Placement::StateVectors {
            position: position.into(),
            velocity: velocity.into(),
        }),
        _ => None,
    }
}

fn euler_degrees([roll, pitch, yaw]: [f64; 3]) -> UnitQuaternion<f64> {
    UnitQuaternion::from_euler_angles(roll.to_radians(), pitch.to_radians(), yaw.to_radians())
}

fn vessel_data(v: &config::Vessel) -> VesselData {
    VesselData {
        name: v.name.clone(),
        mass: Mass::from_kilograms(v.mass),
        hull_half_extents: v.hull_half_extents.into(),
        ports: v
            .ports
            .iter()
            .map(|p| PortSpec {
                id: PortId(p.id),
                name: p.name.clone().unwrap_or_else(|| format!("port-{}", p.id)),
                position: p.position.into(),
                rotation: euler_degrees(p.orientation),
            })
            .collect(),
        triggers: v
            .triggers
            .iter()
            .map(|t| TriggerSpec {
                id: TriggerId(t.id),
                name: t.name.clone().unwrap_or_else(|| format!("trigger-{}", t.id)),
                position: t.position.into(),
                paired_with: None,
            })
            .collect(),
        security: v.owner.as_ref().map(|owner| SecurityData {
            owner: owner.clone(),
            authorized: v.authorized.iter().cloned().collect(),
        }),
    }
}
