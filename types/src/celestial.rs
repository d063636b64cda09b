use crate::{ids::CelestialId, orbit::OrbitalElements};
use derive_more::Display;
use serde::{Deserialize, Serialize};

#[derive(Clone, PartialEq, Debug, Display, Serialize, Deserialize)]
#[display(fmt = "{{id: {}, name: {}, radius: {}, ...}}", "id", "name", "radius")]
pub struct CelestialBody {
    pub id: CelestialId,

    pub name: String,

    /// Standard gravitational parameter [m^3/s^2]
    pub mu: f64,

    /// Surface radius [m]
    pub radius: f64,

    /// Beyond this distance an artificial body's gravitational parent becomes
    /// this body's own parent [m]
    pub gravity_influence_radius: f64,

    /// None for the root of the system
    pub parent: Option<CelestialId>,

    /// Orbit around the parent; None keeps the body fixed relative to its parent
    pub orbit: Option<OrbitalElements>,
}

impl CelestialBody {
    pub fn new(id: CelestialId, name: impl Into<String>, mu: f64, radius: f64) -> Self {
        Self {
            id,
            name: name.into(),
            mu,
            radius,
            gravity_influence_radius: f64::INFINITY,
            parent: None,
            orbit: None,
        }
    }

    pub fn with_parent(mut self, parent: CelestialId, orbit: OrbitalElements) -> Self {
        self.parent = Some(parent);
        self.orbit = Some(orbit);
        self
    }

    pub fn with_influence_radius(mut self, radius: f64) -> Self {
        self.gravity_influence_radius = radius;
        self
    }

    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }
}
