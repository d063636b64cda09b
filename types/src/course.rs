use crate::{
    ids::{CelestialId, CourseId},
    orbit::OrbitalElements,
};
use derive_more::Display;
use serde::{Deserialize, Serialize};

/// A scheduled maneuver that carries a vessel onto a target orbit.
///
/// The vessel leaves its current orbit at `start_time` and arrives on `target`
/// (around `parent`) at `end_time`; the target's true anomaly is the one at
/// arrival.
#[derive(Copy, Clone, PartialEq, Debug, Display, Serialize, Deserialize)]
#[display(
    fmt = "{{id: {}, start: {}, end: {}, parent: {}}}",
    "id",
    "start_time",
    "end_time",
    "parent"
)]
pub struct CourseDefinition {
    pub id: CourseId,
    /// Simulation time [s]
    pub start_time: f64,
    /// Simulation time [s]
    pub end_time: f64,
    pub parent: CelestialId,
    pub target: OrbitalElements,
}

impl CourseDefinition {
    pub fn duration(&self) -> f64 {
        self.end_time - self.start_time
    }

    pub fn is_well_formed(&self) -> bool {
        self.start_time.is_finite() && self.end_time.is_finite() && self.end_time > self.start_time
    }
}
