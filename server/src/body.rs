use dockyard_types::prelude::*;
use na::{Isometry3, Translation3, UnitQuaternion, Vector3};
use std::collections::BTreeSet;

use crate::{
    integrator::{self, AdvanceOutcome, IntegrationEnvironment, IntegrationError},
    orbit::OrbitModel,
    units::{Mass, Time},
    SimulationComponent,
};

#[derive(Clone, Debug, PartialEq)]
pub struct PortSpec {
    pub id: PortId,
    pub name: String,
    /// Pose relative to the vessel origin; the port faces along its local +Z
    pub position: Vector3<f64>,
    pub rotation: UnitQuaternion<f64>,
}

impl PortSpec {
    pub fn pose(&self) -> Isometry3<f64> {
        Isometry3::from_parts(Translation3::from(self.position), self.rotation)
    }
}

/// An interactive volume (airlock, hatch) that can be paired with a
/// counterpart across a docking seam
#[derive(Clone, Debug, PartialEq)]
pub struct TriggerSpec {
    pub id: TriggerId,
    pub name: String,
    pub position: Vector3<f64>,
    pub paired_with: Option<(BodyId, TriggerId)>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SecurityData {
    pub owner: String,
    pub authorized: BTreeSet<String>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct VesselData {
    pub name: String,
    pub mass: Mass,
    /// Half extents of the hull box, centered on the vessel origin [m]
    pub hull_half_extents: Vector3<f64>,
    pub ports: Vec<PortSpec>,
    pub triggers: Vec<TriggerSpec>,
    pub security: Option<SecurityData>,
}

impl VesselData {
    pub fn port(&self, id: PortId) -> Option<&PortSpec> {
        self.ports.iter().find(|p| p.id == id)
    }

    pub fn trigger_mut(&mut self, id: TriggerId) -> Option<&mut TriggerSpec> {
        self.triggers.iter_mut().find(|t| t.id == id)
    }
}

/// Carries riders that are not aboard any vessel
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct PivotData;

#[derive(Clone, Debug, PartialEq)]
pub struct LooseData {
    pub name: String,
    pub mass: Mass,
}

#[derive(Clone, Debug, PartialEq)]
pub enum BodyKind {
    Vessel(VesselData),
    Pivot(PivotData),
    Loose(LooseData),
}

impl BodyKind {
    pub fn is_thrust_capable(&self) -> bool {
        matches!(self, BodyKind::Vessel(_))
    }

    pub fn is_stabilizable(&self) -> bool {
        match self {
            BodyKind::Vessel(_) | BodyKind::Loose(_) => true,
            BodyKind::Pivot(_) => false,
        }
    }

    pub fn can_dock(&self) -> bool {
        matches!(self, BodyKind::Vessel(_))
    }

    pub fn mass(&self) -> Mass {
        match self {
            BodyKind::Vessel(v) => v.mass,
            BodyKind::Pivot(_) => Mass::default(),
            BodyKind::Loose(l) => l.mass,
        }
    }

    /// Bounding radius used for stabilization distance checks [m]
    pub fn radius(&self) -> f64 {
        match self {
            BodyKind::Vessel(v) => v.hull_half_extents.norm(),
            BodyKind::Pivot(_) | BodyKind::Loose(_) => 0.0,
        }
    }

    pub fn vessel(&self) -> Option<&VesselData> {
        match self {
            BodyKind::Vessel(v) => Some(v),
            _ => None,
        }
    }

    pub fn vessel_mut(&mut self) -> Option<&mut VesselData> {
        match self {
            BodyKind::Vessel(v) => Some(v),
            _ => None,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            BodyKind::Vessel(v) => &v.name,
            BodyKind::Pivot(_) => "pivot",
            BodyKind::Loose(l) => &l.name,
        }
    }
}

/// Pending per-tick motion requests. Engine and maneuvering accelerations and
/// the angular acceleration are in the body's local frame; physics corrections
/// are in the parent-relative frame.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct ThrustState {
    pub engine: Vector3<f64>,
    pub maneuvering: Vector3<f64>,
    pub rotation: Vector3<f64>,
    pub correction_position: Vector3<f64>,
    pub correction_velocity: Vector3<f64>,
}

impl Default for ThrustState {
    fn default() -> Self {
        Self {
            engine: Vector3::zeros(),
            maneuvering: Vector3::zeros(),
            rotation: Vector3::zeros(),
            correction_position: Vector3::zeros(),
            correction_velocity: Vector3::zeros(),
        }
    }
}

#[derive(Clone, Debug)]
pub enum CourseState {
    /// Waiting for the course window to open
    Engaged,
    Active {
        origin: Box<dyn OrbitModel>,
        target: Box<dyn OrbitModel>,
    },
}

#[derive(Clone, Debug)]
pub struct Course {
    pub definition: CourseDefinition,
    pub state: CourseState,
}

impl Course {
    pub fn new(definition: CourseDefinition) -> Self {
        Self {
            definition,
            state: CourseState::Engaged,
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self.state, CourseState::Active { .. })
    }
}

#[derive(Clone, Debug)]
pub struct DynamicBody {
    pub id: BodyId,
    pub kind: BodyKind,
    pub orbit: Box<dyn OrbitModel>,
    pub rotation: UnitQuaternion<f64>,
    /// Local frame [rad/s]
    pub angular_velocity: Vector3<f64>,
    pub thrust: ThrustState,
    pub course: Option<Course>,
    /// Set by a stabilization release; the next advance skips thrust work
    pub release_grace: bool,
    pub marked_for_destruction: bool,
}

impl DynamicBody {
    pub fn new(id: BodyId, kind: BodyKind, orbit: Box<dyn OrbitModel>) -> Self {
        Self {
            id,
            kind,
            orbit,
            rotation: UnitQuaternion::identity(),
            angular_velocity: Vector3::zeros(),
            thrust: ThrustState::default(),
            course: None,
            release_grace: false,
            marked_for_destruction: false,
        }
    }

    pub fn with_rotation(mut self, rotation: UnitQuaternion<f64>) -> Self {
        self.rotation = rotation;
        self
    }

    pub fn forward(&self) -> Vector3<f64> {
        self.rotation * Vector3::z()
    }

    pub fn up(&self) -> Vector3<f64> {
        self.rotation * Vector3::y()
    }

    pub fn mass(&self) -> Mass {
        self.kind.mass()
    }
}

impl<'a> SimulationComponent<'a> for DynamicBody {
    type SharedState = AdvanceOutcome;
    type Environment = IntegrationEnvironment<'a>;
    type Error = IntegrationError;

    /// Bring a freshly spawned body's parent frame up to the current time
    fn init(
        &mut self,
        env: &'a Self::Environment,
        _shared_state: &mut Self::SharedState,
    ) -> Result<(), Self::Error> {
        let parent = self.orbit.parent_frame().id;
        let frame = env
            .solar_system
            .parent_frame(parent, env.now)
            .ok_or(IntegrationError::UnknownParent {
                body: self.id,
                parent,
            })?;
        self.orbit.refresh_parent(&frame);
        Ok(())
    }

    fn step(
        &mut self,
        dt: Time,
        env: &'a Self::Environment,
        shared_state: &mut Self::SharedState,
    ) -> Result<(), Self::Error> {
        let outcome = integrator::advance(self, dt, env)?;
        shared_state.merge(outcome);
        Ok(())
    }
}
