use derive_more::Display;
use serde::{Deserialize, Serialize};

/// Classical orbital elements. Angles are in radians, lengths in meters.
///
/// For circular orbits the argument of periapsis is zero and the true anomaly is
/// measured from the ascending node; for equatorial orbits the longitude of the
/// ascending node is zero.
#[derive(Copy, Clone, PartialEq, Debug, Default, Display, Serialize, Deserialize)]
#[display(
    fmt = "{{a: {}, e: {}, i: {}, lan: {}, argpe: {}, ta: {}}}",
    "semi_major_axis",
    "eccentricity",
    "inclination",
    "lon_asc_node",
    "arg_periapsis",
    "true_anomaly"
)]
#[serde(rename_all = "kebab-case")]
pub struct OrbitalElements {
    /// Negative for hyperbolic trajectories
    pub semi_major_axis: f64,
    pub eccentricity: f64,
    #[serde(default)]
    pub inclination: f64,
    #[serde(default)]
    pub arg_periapsis: f64,
    #[serde(default)]
    pub lon_asc_node: f64,
    #[serde(default)]
    pub true_anomaly: f64,
}

impl OrbitalElements {
    pub fn circular(radius: f64) -> Self {
        Self {
            semi_major_axis: radius,
            eccentricity: 0.0,
            ..Default::default()
        }
    }

    /// Semi-latus rectum [m]
    pub fn semi_latus_rectum(&self) -> f64 {
        self.semi_major_axis * (1.0 - self.eccentricity * self.eccentricity)
    }

    pub fn periapsis_radius(&self) -> f64 {
        self.semi_major_axis * (1.0 - self.eccentricity)
    }

    pub fn is_hyperbolic(&self) -> bool {
        self.eccentricity > 1.0
    }
}

/// Position and velocity relative to a gravitational parent at a point in time
#[derive(Copy, Clone, PartialEq, Debug, Default, Display, Serialize, Deserialize)]
#[display(fmt = "{{t: {}, pos: {}, vel: {}}}", "time", "position", "velocity")]
pub struct StateVector {
    /// Position [m]
    pub position: na::Vector3<f64>,
    /// Velocity [m/s]
    pub velocity: na::Vector3<f64>,
    /// Simulation time [s]
    pub time: f64,
}

impl StateVector {
    pub fn new(position: na::Vector3<f64>, velocity: na::Vector3<f64>, time: f64) -> Self {
        Self {
            position,
            velocity,
            time,
        }
    }

    pub fn is_finite(&self) -> bool {
        self.position.iter().chain(self.velocity.iter()).all(|c| c.is_finite())
            && self.time.is_finite()
    }
}
