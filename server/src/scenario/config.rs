use dockyard_types::prelude::OrbitalElements;
use serde::Deserialize;
use std::{collections::HashSet, fs, path::Path};
use thiserror::Error;

use crate::{simulation::EngineConfig, solar_system::SolarSystemError};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config file")]
    Toml(#[from] toml::de::Error),
    #[error("Duplicate configuration entry for {kind} '{name}'")]
    Duplicate { kind: &'static str, name: String },
    #[error("Celestial body '{body}' references unknown parent {parent}")]
    UnknownParent { body: String, parent: u64 },
    #[error("Configuration entry for {kind} '{name}' references unknown celestial body {parent}")]
    UnknownCelestial {
        kind: &'static str,
        name: String,
        parent: u64,
    },
    #[error("Rider '{rider}' boards unknown body '{carrier}'")]
    UnknownCarrier { rider: String, carrier: String },
    #[error("Configuration entry for '{0}' needs either an orbit or a position and velocity")]
    MissingPlacement(String),
    #[error(transparent)]
    SolarSystem(#[from] SolarSystemError),
}

#[derive(Clone, PartialEq, Debug, Default, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct Config {
    pub name: Option<String>,
    pub engine: Option<EngineConfig>,
    #[serde(alias = "celestial")]
    pub celestials: Vec<Celestial>,
    #[serde(alias = "vessel")]
    pub vessels: Vec<Vessel>,
    #[serde(alias = "loose-object")]
    pub loose_objects: Vec<LooseObject>,
    #[serde(alias = "rider")]
    pub riders: Vec<Rider>,
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::from_str_checked(&content)
    }

    pub fn from_str_checked(s: &str) -> Result<Self, ConfigError> {
        let cfg: Config = toml::from_str(s)?;

        let mut ids = HashSet::new();
        for c in cfg.celestials.iter() {
            if !ids.insert(c.id) {
                return Err(ConfigError::Duplicate {
                    kind: "celestial body",
                    name: c.name.clone(),
                });
            }
        }
        for c in cfg.celestials.iter() {
            if let Some(parent) = c.parent.filter(|p| !ids.contains(p)) {
                return Err(ConfigError::UnknownParent {
                    body: c.name.clone(),
                    parent,
                });
            }
        }

        // Vessels and loose objects share one namespace so riders can board either
        let mut names = HashSet::new();
        for (kind, name, parent, placed) in cfg
            .vessels
            .iter()
            .map(|v| ("vessel", &v.name, v.parent, v.placement().is_some()))
            .chain(
                cfg.loose_objects
                    .iter()
                    .map(|l| ("loose object", &l.name, l.parent, l.placement().is_some())),
            )
        {
            if !names.insert(name) {
                return Err(ConfigError::Duplicate {
                    kind,
                    name: name.clone(),
                });
            }
            if !ids.contains(&parent) {
                return Err(ConfigError::UnknownCelestial {
                    kind,
                    name: name.clone(),
                    parent,
                });
            }
            if !placed {
                return Err(ConfigError::MissingPlacement(name.clone()));
            }
        }

        for v in cfg.vessels.iter() {
            let mut ports = HashSet::new();
            for p in v.ports.iter() {
                if !ports.insert(p.id) {
                    return Err(ConfigError::Duplicate {
                        kind: "port",
                        name: format!("{}:{}", v.name, p.id),
                    });
                }
            }
            let mut triggers = HashSet::new();
            for t in v.triggers.iter() {
                if !triggers.insert(t.id) {
                    return Err(ConfigError::Duplicate {
                        kind: "trigger",
                        name: format!("{}:{}", v.name, t.id),
                    });
                }
            }
        }

        let mut riders = HashSet::new();
        for r in cfg.riders.iter() {
            if !riders.insert(&r.name) {
                return Err(ConfigError::Duplicate {
                    kind: "rider",
                    name: r.name.clone(),
                });
            }
            if !names.contains(&r.carrier) {
                return Err(ConfigError::UnknownCarrier {
                    rider: r.name.clone(),
                    carrier: r.carrier.clone(),
                });
            }
        }

        Ok(cfg)
    }
}

#[derive(Clone, PartialEq, Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Celestial {
    pub id: u64,
    pub name: String,
    /// [m^3/s^2]
    pub mu: f64,
    /// [m]
    pub radius: f64,
    /// [m], unbounded when absent
    pub influence_radius: Option<f64>,
    pub parent: Option<u64>,
    pub orbit: Option<OrbitalElements>,
}

/// Where a body starts: either elements at `epoch` or parent-relative state
#[derive(Clone, PartialEq, Debug, Default, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct Placement {
    pub orbit: Option<OrbitalElements>,
    pub epoch: f64,
    pub position: Option<[f64; 3]>,
    pub velocity: Option<[f64; 3]>,
}

#[derive(Clone, PartialEq, Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Vessel {
    pub name: String,
    /// [kg]
    pub mass: f64,
    /// [m]
    pub hull_half_extents: [f64; 3],
    pub parent: u64,
    #[serde(flatten)]
    pub placement: Placement,
    /// Roll, pitch, yaw [deg]
    #[serde(default)]
    pub attitude: [f64; 3],
    pub owner: Option<String>,
    #[serde(default)]
    pub authorized: Vec<String>,
    #[serde(default, alias = "port")]
    pub ports: Vec<Port>,
    #[serde(default, alias = "trigger")]
    pub triggers: Vec<Trigger>,
}

impl Vessel {
    pub fn placement(&self) -> Option<&Placement> {
        self.placement.is_complete().then_some(&self.placement)
    }
}

impl Placement {
    fn is_complete(&self) -> bool {
        self.orbit.is_some() || (self.position.is_some() && self.velocity.is_some())
    }
}

#[derive(Clone, PartialEq, Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Port {
    pub id: u32,
    pub name: Option<String>,
    /// [m]
    pub position: [f64; 3],
    /// Roll, pitch, yaw [deg]; the port faces its local +Z
    #[serde(default)]
    pub orientation: [f64; 3],
}

#[derive(Clone, PartialEq, Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Trigger {
    pub id: u32,
    pub name: Option<String>,
    /// [m]
    pub position: [f64; 3],
}

#[derive(Clone, PartialEq, Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct LooseObject {
    pub name: String,
    /// [kg]
    pub mass: f64,
    pub parent: u64,
    #[serde(flatten)]
    pub placement: Placement,
}

impl LooseObject {
    pub fn placement(&self) -> Option<&Placement> {
        self.placement.is_complete().then_some(&self.placement)
    }
}

#[derive(Clone, PartialEq, Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Rider {
    pub name: String,
    /// Name of the vessel or loose object carrying the rider
    pub carrier: String,
    /// [m], in the carrier's frame
    #[serde(default)]
    pub position: [f64; 3],
    #[serde(default)]
    pub connected: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;

    const MINIMAL: &str = indoc! {r#"
        name = "minimal"

        [engine]
        separation-speed = 1.5

        [[celestial]]
        id = 1
        name = "Earth"
        mu = 3.986004418e14
        radius = 6.371e6

        [[vessel]]
        name = "core"
        mass = 4000.0
        hull-half-extents = [2.0, 2.0, 4.0]
        parent = 1
        orbit = { semi-major-axis = 7.0e6, eccentricity = 0.0 }

        [[vessel.port]]
        id = 1
        position = [0.0, 0.0, 4.0]

        [[rider]]
        name = "pilot"
        carrier = "core"
    "#};

    #[test]
    fn minimal_config_parses() {
        let cfg = Config::from_str_checked(MINIMAL).unwrap();
        assert_eq!(cfg.name.as_deref(), Some("minimal"));
        let engine = cfg.engine.unwrap();
        assert_eq!(engine.separation_speed, 1.5);
        assert_eq!(engine.cascade_iteration_cap, EngineConfig::default().cascade_iteration_cap);
        assert_eq!(cfg.vessels.len(), 1);
        assert_eq!(cfg.vessels[0].ports[0].orientation, [0.0; 3]);
        assert!(cfg.vessels[0].placement().is_some());
        assert_eq!(cfg.riders[0].carrier, "core");
    }

    #[test]
    fn duplicate_vessels_are_rejected() {
        let dup = format!(
            "{MINIMAL}\n{}",
            indoc! {r#"
                [[vessel]]
                name = "core"
                mass = 1.0
                hull-half-extents = [1.0, 1.0, 1.0]
                parent = 1
                position = [0.0, 0.0, 7.0e6]
                velocity = [7500.0, 0.0, 0.0]
            "#}
        );
        assert!(matches!(
            Config::from_str_checked(&dup),
            Err(ConfigError::Duplicate { kind: "vessel", .. })
        ));
    }

    #[test]
    fn unplaced_bodies_are_rejected() {
        let cfg = indoc! {r#"
            [[celestial]]
            id = 1
            name = "Earth"
            mu = 3.986004418e14
            radius = 6.371e6

            [[loose-object]]
            name = "crate"
            mass = 20.0
            parent = 1
            position = [7.0e6, 0.0, 0.0]
        "#};
        assert!(matches!(
            Config::from_str_checked(cfg),
            Err(ConfigError::MissingPlacement(name)) if name == "crate"
        ));
    }

    #[test]
    fn riders_need_a_carrier() {
        let cfg = MINIMAL.replace("carrier = \"core\"", "carrier = \"nowhere\"");
        assert!(matches!(
            Config::from_str_checked(&cfg),
            Err(ConfigError::UnknownCarrier { .. })
        ));
    }
}
