//! The orbital-mechanics seam.
//!
//! The engine only talks to orbits through [`OrbitModel`]; [`kepler::KeplerOrbit`]
//! is the two-body implementation used by the server and the tests.

use dockyard_types::prelude::*;
use serde::Serialize;

pub use self::kepler::KeplerOrbit;

pub mod kepler;

type Vector3 = na::Vector3<f64>;

/// A gravitational parent as seen by an orbit at its evaluation time
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct ParentFrame {
    pub id: CelestialId,
    /// Standard gravitational parameter [m^3/s^2]
    pub mu: f64,
    /// Surface radius [m]
    pub radius: f64,
    /// Absolute position [m]
    pub position: Vector3,
    /// Absolute velocity [m/s]
    pub velocity: Vector3,
}

impl ParentFrame {
    pub fn new(id: CelestialId, mu: f64, radius: f64) -> Self {
        Self {
            id,
            mu,
            radius,
            position: Vector3::zeros(),
            velocity: Vector3::zeros(),
        }
    }

    pub fn at(mut self, position: Vector3, velocity: Vector3) -> Self {
        self.position = position;
        self.velocity = velocity;
        self
    }
}

/// The element-based representation handed to the outbound sync boundary
#[derive(Copy, Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct OrbitSnapshot {
    pub parent: CelestialId,
    pub epoch: f64,
    pub elements: OrbitalElements,
}

pub trait OrbitModel: Send + Sync + std::fmt::Debug {
    fn init_from_elements(&mut self, parent: &ParentFrame, elements: &OrbitalElements, epoch: f64);

    /// When `relative` is false the vectors are absolute and are re-expressed
    /// relative to `parent`.
    fn init_from_state_vectors(
        &mut self,
        parent: &ParentFrame,
        position: Vector3,
        velocity: Vector3,
        time: f64,
        relative: bool,
    );

    fn advance(&mut self, time: f64);

    /// Take over another orbit's state. Unless `exact`, the copy is then
    /// advanced to `time`.
    fn copy_from(&mut self, other: &dyn OrbitModel, time: f64, exact: bool) {
        self.init_from_state_vectors(
            other.parent_frame(),
            other.relative_position(),
            other.relative_velocity(),
            other.time(),
            true,
        );
        if !exact {
            self.advance(time);
        }
    }

    /// Re-express the current state relative to `new_parent` and reseed
    fn change_parent(&mut self, new_parent: &ParentFrame);

    /// Update the parent's absolute state without touching the relative state
    fn refresh_parent(&mut self, parent: &ParentFrame);

    fn relative_position(&self) -> Vector3;

    fn relative_position_mut(&mut self) -> &mut Vector3;

    fn relative_velocity(&self) -> Vector3;

    fn relative_velocity_mut(&mut self) -> &mut Vector3;

    /// Re-derive the orbit curve from the current relative state vectors
    fn reseed(&mut self);

    fn is_valid(&self) -> bool;

    /// None while the orbit is degenerate
    fn fill_external_representation(&self) -> Option<OrbitSnapshot>;

    fn parent_frame(&self) -> &ParentFrame;

    fn time(&self) -> f64;

    fn boxed_clone(&self) -> Box<dyn OrbitModel>;

    fn absolute_position(&self) -> Vector3 {
        self.parent_frame().position + self.relative_position()
    }

    fn absolute_velocity(&self) -> Vector3 {
        self.parent_frame().velocity + self.relative_velocity()
    }

    fn state_vector(&self) -> StateVector {
        StateVector::new(
            self.relative_position(),
            self.relative_velocity(),
            self.time(),
        )
    }
}

impl Clone for Box<dyn OrbitModel> {
    fn clone(&self) -> Self {
        self.boxed_clone()
    }
}
