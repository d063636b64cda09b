//! Outbound motion state, ready for whatever transport sits outside the core.

use dockyard_types::prelude::*;
use na::{Isometry3, UnitQuaternion, Vector3};
use serde::Serialize;

use crate::{orbit::OrbitSnapshot, simulation::SimulationContext};

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "mode", rename_all = "kebab-case")]
pub enum MotionSnapshot {
    /// Clients propagate the elements themselves
    Orbit {
        body: BodyId,
        orbit: OrbitSnapshot,
        rotation: UnitQuaternion<f64>,
        angular_velocity: Vector3<f64>,
    },
    /// Raw parent-relative state for orbits that can't be expressed as elements
    Realtime {
        body: BodyId,
        parent: CelestialId,
        time: f64,
        position: Vector3<f64>,
        velocity: Vector3<f64>,
        rotation: UnitQuaternion<f64>,
        angular_velocity: Vector3<f64>,
    },
    Docked {
        body: BodyId,
        main: BodyId,
        relative_to_main: Isometry3<f64>,
    },
}

impl MotionSnapshot {
    pub fn body(&self) -> BodyId {
        match self {
            MotionSnapshot::Orbit { body, .. }
            | MotionSnapshot::Realtime { body, .. }
            | MotionSnapshot::Docked { body, .. } => *body,
        }
    }
}

pub fn orbit_or_realtime_snapshot(ctx: &SimulationContext, id: BodyId) -> Option<MotionSnapshot> {
    let body = ctx.bodies.get(&id)?;
    if ctx.tree.is_derived(id) {
        return Some(MotionSnapshot::Docked {
            body: id,
            main: ctx.main_of(id),
            relative_to_main: ctx.tree.relative_to_main(id),
        });
    }

    let orbit = body
        .orbit
        .is_valid()
        .then(|| body.orbit.fill_external_representation())
        .flatten();
    Some(match orbit {
        Some(orbit) => MotionSnapshot::Orbit {
            body: id,
            orbit,
            rotation: body.rotation,
            angular_velocity: body.angular_velocity,
        },
        None => MotionSnapshot::Realtime {
            body: id,
            parent: body.orbit.parent_frame().id,
            time: body.orbit.time(),
            position: body.orbit.relative_position(),
            velocity: body.orbit.relative_velocity(),
            rotation: body.rotation,
            angular_velocity: body.angular_velocity,
        },
    })
}

/// Every body, in id order
pub fn snapshot_all(ctx: &SimulationContext) -> Vec<MotionSnapshot> {
    ctx.bodies
        .keys()
        .filter_map(|id| orbit_or_realtime_snapshot(ctx, *id))
        .collect()
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct StabilizationSnapshot {
    pub dependent: BodyId,
    pub target: BodyId,
    pub offset: Vector3<f64>,
    pub attached_at: f64,
}

pub fn stabilization_snapshot(ctx: &SimulationContext, id: BodyId) -> Option<StabilizationSnapshot> {
    let dependent = ctx.main_of(id);
    ctx.links.get(dependent).map(|link| StabilizationSnapshot {
        dependent,
        target: link.target,
        offset: link.offset,
        attached_at: link.attached_at,
    })
}
