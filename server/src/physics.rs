//! The rigid-body seam. The engine mirrors each independently moving group
//! into a physics body and asks the physics side for aggregate bounds when a
//! group's shape changes.

use dockyard_types::prelude::*;
use na::{Isometry3, Point3, Vector3};
use parry3d_f64::{
    bounding_volume::{Aabb, BoundingVolume},
    shape::{Shape, SharedShape},
};
use std::collections::BTreeMap;
use thiserror::Error;

/// One vessel's hull, posed relative to the group's main vessel origin
#[derive(Clone, Debug, PartialEq)]
pub struct HullPart {
    pub vessel: BodyId,
    pub half_extents: Vector3<f64>,
    pub pose: Isometry3<f64>,
}

#[derive(Clone, Debug)]
pub struct RigidBodyDesc {
    pub id: BodyId,
    pub parts: Vec<HullPart>,
    /// Mass [kg]
    pub mass: f64,
    pub pose: Isometry3<f64>,
    pub linear_velocity: Vector3<f64>,
    pub angular_velocity: Vector3<f64>,
}

#[derive(Debug, Error, PartialEq)]
pub enum PhysicsError {
    #[error("Rigid body {0} already exists")]
    AlreadyExists(BodyId),
    #[error("Rigid body {0} does not exist")]
    Unknown(BodyId),
    #[error("Rigid body {0} has no hull parts")]
    Empty(BodyId),
}

pub trait RigidBodyAdapter: Send + std::fmt::Debug {
    fn create(&mut self, desc: RigidBodyDesc) -> Result<(), PhysicsError>;

    /// Returns false if there was no such body
    fn remove(&mut self, id: BodyId) -> bool;

    fn set_pose(
        &mut self,
        id: BodyId,
        pose: Isometry3<f64>,
        linear_velocity: Vector3<f64>,
        angular_velocity: Vector3<f64>,
    ) -> Result<(), PhysicsError>;

    /// Bounds of the parts in the frame they are posed in
    fn compute_aggregate_bounds(&self, parts: &[HullPart]) -> Aabb;

    fn contains(&self, id: BodyId) -> bool;
}

#[derive(Clone)]
struct Record {
    shape: SharedShape,
    mass: f64,
    pose: Isometry3<f64>,
    linear_velocity: Vector3<f64>,
    angular_velocity: Vector3<f64>,
}

impl std::fmt::Debug for Record {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Record")
            .field("mass", &self.mass)
            .field("pose", &self.pose)
            .field("linear_velocity", &self.linear_velocity)
            .field("angular_velocity", &self.angular_velocity)
            .finish_non_exhaustive()
    }
}

/// Collision-shape bookkeeping backed by parry. Each body is a compound of
/// cuboid hulls.
#[derive(Debug, Default)]
pub struct ParryRigidBodies {
    bodies: BTreeMap<BodyId, Record>,
}

impl ParryRigidBodies {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.bodies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bodies.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = BodyId> + '_ {
        self.bodies.keys().copied()
    }

    pub fn mass(&self, id: BodyId) -> Option<f64> {
        self.bodies.get(&id).map(|r| r.mass)
    }

    pub fn pose(&self, id: BodyId) -> Option<Isometry3<f64>> {
        self.bodies.get(&id).map(|r| r.pose)
    }

    pub fn linear_velocity(&self, id: BodyId) -> Option<Vector3<f64>> {
        self.bodies.get(&id).map(|r| r.linear_velocity)
    }

    pub fn angular_velocity(&self, id: BodyId) -> Option<Vector3<f64>> {
        self.bodies.get(&id).map(|r| r.angular_velocity)
    }

    /// World-space bounds of a body at its last synchronized pose
    pub fn world_bounds(&self, id: BodyId) -> Option<Aabb> {
        self.bodies
            .get(&id)
            .map(|r| r.shape.compute_aabb(&r.pose))
    }
}

fn compound(parts: &[HullPart]) -> SharedShape {
    SharedShape::compound(
        parts
            .iter()
            .map(|p| {
                (
                    p.pose,
                    SharedShape::cuboid(p.half_extents.x, p.half_extents.y, p.half_extents.z),
                )
            })
            .collect(),
    )
}

impl RigidBodyAdapter for ParryRigidBodies {
    fn create(&mut self, desc: RigidBodyDesc) -> Result<(), PhysicsError> {
        if self.bodies.contains_key(&desc.id) {
            return Err(PhysicsError::AlreadyExists(desc.id));
        }
        if desc.parts.is_empty() {
            return Err(PhysicsError::Empty(desc.id));
        }
        self.bodies.insert(
            desc.id,
            Record {
                shape: compound(&desc.parts),
                mass: desc.mass,
                pose: desc.pose,
                linear_velocity: desc.linear_velocity,
                angular_velocity: desc.angular_velocity,
            },
        );
        Ok(())
    }

    fn remove(&mut self, id: BodyId) -> bool {
        self.bodies.remove(&id).is_some()
    }

    fn set_pose(
        &mut self,
        id: BodyId,
        pose: Isometry3<f64>,
        linear_velocity: Vector3<f64>,
        angular_velocity: Vector3<f64>,
    ) -> Result<(), PhysicsError> {
        let record = self.bodies.get_mut(&id).ok_or(PhysicsError::Unknown(id))?;
        record.pose = pose;
        record.linear_velocity = linear_velocity;
        record.angular_velocity = angular_velocity;
        Ok(())
    }

    fn compute_aggregate_bounds(&self, parts: &[HullPart]) -> Aabb {
        parts
            .iter()
            .map(|p| {
                SharedShape::cuboid(p.half_extents.x, p.half_extents.y, p.half_extents.z)
                    .compute_aabb(&p.pose)
            })
            .reduce(|acc, aabb| acc.merged(&aabb))
            .unwrap_or_else(|| Aabb::new(Point3::origin(), Point3::origin()))
    }

    fn contains(&self, id: BodyId) -> bool {
        self.bodies.contains_key(&id)
    }
}
