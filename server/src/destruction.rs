//! Deferred body removal. Bodies are only ever removed here, sequentially,
//! after the parallel passes of a tick have finished.

use dockyard_types::prelude::*;
use na::Isometry3;
use std::collections::BTreeSet;
use tracing::{info, warn};

use crate::{
    body::{BodyKind, PivotData},
    docking,
    event::SimulationEvent,
    simulation::SimulationContext,
    stabilization,
};

#[derive(Clone, Debug, Default)]
pub struct DestructionGate {
    requested: BTreeSet<BodyId>,
}

impl DestructionGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(&mut self, body: BodyId) {
        self.requested.insert(body);
    }

    pub fn is_requested(&self, body: BodyId) -> bool {
        self.requested.contains(&body)
    }

    pub fn pending(&self) -> usize {
        self.requested.len()
    }
}

/// Bodies due for removal this pass, in id order
fn collect(ctx: &mut SimulationContext) -> BTreeSet<BodyId> {
    let mut due = std::mem::take(&mut ctx.destruction.requested);
    due.retain(|id| ctx.bodies.contains_key(id));
    for (id, body) in ctx.bodies.iter() {
        let empty_pivot =
            matches!(body.kind, BodyKind::Pivot(_)) && !ctx.riders.is_carrying(*id);
        if body.marked_for_destruction || empty_pivot {
            due.insert(*id);
        }
    }
    due
}

/// Remove every marked, requested or empty-pivot body. Returns the removed ids.
pub fn run(ctx: &mut SimulationContext) -> Vec<BodyId> {
    let due = collect(ctx);
    let mut removed = Vec::with_capacity(due.len());
    for id in due {
        if destroy(ctx, id) {
            removed.push(id);
        }
    }
    removed
}

fn destroy(ctx: &mut SimulationContext, id: BodyId) -> bool {
    if !ctx.bodies.contains_key(&id) {
        return false;
    }

    stabilization::disable(ctx, id, true, false);

    for port in ctx.tree.docked_ports(id) {
        if let Err(e) = docking::undock(ctx, port) {
            warn!(body = %id, port = %port, err = %e, "Failed to undock a body being destroyed");
        }
    }

    evacuate_riders(ctx, id);

    ctx.physics.remove(id);
    if ctx.tree.contains(id) {
        ctx.tree.remove_vessel(id);
    }
    ctx.bodies.remove(&id);

    info!(body = %id, "Destroyed");
    ctx.emit(SimulationEvent::Destroyed { body: id });
    true
}

/// Riders aboard a body about to disappear get a pivot of their own at their
/// current world pose. A destroyed pivot hands its riders on the same way.
fn evacuate_riders(ctx: &mut SimulationContext, carrier: BodyId) {
    let aboard = ctx.riders.aboard(carrier);
    if aboard.is_empty() {
        return;
    }
    let Some(body) = ctx.bodies.get(&carrier) else {
        return;
    };
    let template = body.orbit.boxed_clone();
    let velocity = ctx.world_velocity(carrier);
    let carrier_pose = ctx.world_pose(carrier).unwrap_or_else(Isometry3::identity);

    for rider in aboard {
        let Some(local) = ctx.riders.get(rider).map(|r| r.local_pose) else {
            continue;
        };
        let world = carrier_pose * local;
        let mut orbit = template.boxed_clone();
        let parent = *orbit.parent_frame();
        *orbit.relative_position_mut() = world.translation.vector - parent.position;
        *orbit.relative_velocity_mut() = velocity - parent.velocity;
        orbit.reseed();

        let pivot = ctx.spawn_body(BodyKind::Pivot(PivotData), orbit, world.rotation);
        ctx.riders.transfer(rider, pivot, Isometry3::identity());
    }
}
