//! Dock and undock transitions.
//!
//! Both run sequentially under the simulation lock. Every precondition is
//! checked before anything is touched, so a rejected request leaves no trace.

use dockyard_types::prelude::*;
use na::{Isometry3, Point3, Vector3};
use ordered_float::OrderedFloat;
use std::{
    cmp::Reverse,
    collections::{BTreeMap, BTreeSet},
};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::{
    event::SimulationEvent,
    simulation::SimulationContext,
    stabilization,
};

#[derive(Debug, Error, PartialEq)]
pub enum DockingError {
    #[error("Unknown vessel {0}")]
    UnknownVessel(BodyId),
    #[error("Body {0} is not a vessel")]
    NotAVessel(BodyId),
    #[error("Unknown port {0}")]
    UnknownPort(PortRef),
    #[error("Vessel {0} cannot dock to itself")]
    SameVessel(BodyId),
    #[error("Port {0} is already docked")]
    AlreadyDocked(PortRef),
    #[error("Port {0} is not docked")]
    NotDocked(PortRef),
    #[error("Vessels {a} and {b} are already part of the same group")]
    CircularDocking { a: BodyId, b: BodyId },
    #[error("Vessel {0} is marked for destruction")]
    MarkedForDestruction(BodyId),
}

fn check_port(ctx: &SimulationContext, port: PortRef) -> Result<(), DockingError> {
    let body = ctx
        .bodies
        .get(&port.vessel)
        .ok_or(DockingError::UnknownVessel(port.vessel))?;
    let vessel = body
        .kind
        .vessel()
        .ok_or(DockingError::NotAVessel(port.vessel))?;
    if vessel.port(port.port).is_none() {
        return Err(DockingError::UnknownPort(port));
    }
    Ok(())
}

/// Dock port `a` to port `b`. Returns the main vessel of the merged group.
pub fn dock(ctx: &mut SimulationContext, a: PortRef, b: PortRef) -> Result<BodyId, DockingError> {
    check_port(ctx, a)?;
    check_port(ctx, b)?;
    if a.vessel == b.vessel {
        return Err(DockingError::SameVessel(a.vessel));
    }
    for port in [a, b] {
        if ctx.tree.is_docked(port) {
            return Err(DockingError::AlreadyDocked(port));
        }
    }
    let main_a = ctx.main_of(a.vessel);
    let main_b = ctx.main_of(b.vessel);
    if main_a == main_b {
        return Err(DockingError::CircularDocking {
            a: a.vessel,
            b: b.vessel,
        });
    }
    for main in [a.vessel, b.vessel, main_a, main_b] {
        if ctx.bodies.get(&main).map(|b| b.marked_for_destruction).unwrap_or(false) {
            return Err(DockingError::MarkedForDestruction(main));
        }
    }

    stabilization::disable(ctx, main_a, true, true);
    stabilization::disable(ctx, main_b, true, true);

    let side_a = ctx.tree.members(main_a);
    let side_b = ctx.tree.members(main_b);
    let all: BTreeSet<BodyId> = side_a.union(&side_b).copied().collect();
    let riders = ctx.rider_snapshot(&all);

    let mass_a = ctx.group_mass(main_a);
    let mass_b = ctx.group_mass(main_b);
    let total = (mass_a + mass_b).as_kilograms();
    let momentum = [(main_a, mass_a), (main_b, mass_b)]
        .into_iter()
        .filter_map(|(m, mass)| {
            ctx.bodies
                .get(&m)
                .map(|b| b.orbit.absolute_velocity() * mass.as_kilograms())
        })
        .fold(Vector3::zeros(), |acc, p| acc + p);

    // The heavier group's main survives; ties go to the initiator
    let (new_main, absorbed) = if mass_b > mass_a {
        (main_b, main_a)
    } else {
        (main_a, main_b)
    };
    let old_center = ctx
        .tree
        .group(new_main)
        .map(|g| g.mass_center)
        .unwrap_or_else(Vector3::zeros);

    ctx.physics.remove(main_a);
    ctx.physics.remove(main_b);
    ctx.tree.link(a, b);
    ctx.tree.rebuild_group(new_main, &ctx.bodies);

    let parts = ctx.hull_parts(new_main);
    let new_center = ctx.physics.compute_aggregate_bounds(&parts).center().coords;
    ctx.tree.set_mass_center(new_main, new_center);

    if let Some(body) = ctx.bodies.get_mut(&new_main) {
        let shift = body.rotation * (new_center - old_center);
        *body.orbit.relative_position_mut() += shift;
        if total > 0.0 {
            let parent_velocity = body.orbit.parent_frame().velocity;
            *body.orbit.relative_velocity_mut() = momentum / total - parent_velocity;
        }
        body.orbit.reseed();
    }
    if let Some(body) = ctx.bodies.get_mut(&absorbed) {
        body.thrust = Default::default();
        body.course = None;
        body.angular_velocity = Vector3::zeros();
    }
    // The merge is already committed; physics catches up on a later sync
    if let Err(e) = ctx.rebuild_physics_body(new_main) {
        warn!(body = %new_main, err = %e, "Failed to recreate physics body after docking");
    }

    ctx.replay_riders(&riders);
    pair_triggers(ctx, &side_a, &side_b);
    propagate_security(ctx, new_main);

    info!(main = %new_main, a = %a, b = %b, "Docked");
    ctx.emit(SimulationEvent::Docked {
        main: new_main,
        a,
        b,
    });
    Ok(new_main)
}

/// Undock `port` from whatever it is docked to. Returns the mains of the two
/// resulting groups, the side of `port` first.
pub fn undock(ctx: &mut SimulationContext, port: PortRef) -> Result<[BodyId; 2], DockingError> {
    check_port(ctx, port)?;
    let other = ctx.tree.docked_to(port).ok_or(DockingError::NotDocked(port))?;

    let main = ctx.main_of(port.vessel);
    stabilization::disable(ctx, main, true, true);

    let members = ctx.tree.members(main);
    let riders = ctx.rider_snapshot(&members);

    let Some(main_body) = ctx.bodies.get(&main) else {
        return Err(DockingError::UnknownVessel(main));
    };
    let pre_orbit = main_body.orbit.boxed_clone();
    let center = pre_orbit.absolute_position();
    let velocity = pre_orbit.absolute_velocity();
    let omega = main_body.rotation * main_body.angular_velocity;
    let poses: BTreeMap<BodyId, Isometry3<f64>> = members
        .iter()
        .filter_map(|m| ctx.world_pose(*m).map(|p| (*m, p)))
        .collect();
    let seam_normal = poses
        .get(&port.vessel)
        .zip(ctx.port_pose(port))
        .map(|(pose, port_pose)| (pose * port_pose).rotation * Vector3::z());

    ctx.physics.remove(main);
    ctx.tree.unlink(port);
    let roots = [port.vessel, other.vessel];
    let halves = ctx.tree.rebuild_groups(&roots, &ctx.bodies);

    let mut centers = [Vector3::zeros(); 2];
    let mut masses = [0.0; 2];
    for (i, root) in roots.iter().enumerate() {
        let parts = ctx.hull_parts(*root);
        let local_center = ctx.physics.compute_aggregate_bounds(&parts).center().coords;
        ctx.tree.set_mass_center(*root, local_center);
        masses[i] = ctx.group_mass(*root).as_kilograms();

        let Some(pose) = poses.get(root) else {
            continue;
        };
        let world_center = pose * Point3::from(local_center);
        centers[i] = world_center.coords;

        if let Some(body) = ctx.bodies.get_mut(root) {
            let mut orbit = pre_orbit.boxed_clone();
            let parent = *orbit.parent_frame();
            *orbit.relative_position_mut() = world_center.coords - parent.position;
            *orbit.relative_velocity_mut() =
                velocity + omega.cross(&(world_center.coords - center)) - parent.velocity;
            body.orbit = orbit;
            body.rotation = pose.rotation;
            body.angular_velocity = pose.rotation.inverse() * omega;
        }
    }

    // Momentum-conserving push apart along the line between the new centers
    let line = centers[1] - centers[0];
    let normal = if line.norm() > 1e-9 {
        line.normalize()
    } else {
        seam_normal.unwrap_or_else(Vector3::z)
    };
    let total = masses[0] + masses[1];
    if total > 0.0 {
        let s = ctx.config.separation_speed;
        let dv = [-normal * s * masses[1] / total, normal * s * masses[0] / total];
        for (root, dv) in roots.iter().zip(dv) {
            if let Some(body) = ctx.bodies.get_mut(root) {
                *body.orbit.relative_velocity_mut() += dv;
            }
        }
    }
    for root in roots {
        if let Some(body) = ctx.bodies.get_mut(&root) {
            body.orbit.reseed();
        }
        if let Err(e) = ctx.rebuild_physics_body(root) {
            warn!(body = %root, err = %e, "Failed to recreate physics body after undocking");
        }
    }

    ctx.replay_riders(&riders);
    if let [first, second] = halves.as_slice() {
        unpair_triggers(ctx, first, second);
    }

    info!(a = %port, b = %other, mains = ?roots, "Undocked");
    ctx.emit(SimulationEvent::Undocked {
        a: port,
        b: other,
        mains: roots,
    });
    Ok(roots)
}

fn trigger_positions(ctx: &SimulationContext, side: &BTreeSet<BodyId>) -> Vec<(BodyId, TriggerId, Vector3<f64>)> {
    side.iter()
        .filter_map(|id| {
            let pose = ctx.world_pose(*id)?;
            let vessel = ctx.bodies.get(id)?.kind.vessel()?;
            Some(
                vessel
                    .triggers
                    .iter()
                    .filter(|t| t.paired_with.is_none())
                    .map(|t| (*id, t.id, (pose * Point3::from(t.position)).coords))
                    .collect::<Vec<_>>(),
            )
        })
        .flatten()
        .collect()
}

/// Pair free triggers across the seam, closest pairs first
fn pair_triggers(ctx: &mut SimulationContext, side_a: &BTreeSet<BodyId>, side_b: &BTreeSet<BodyId>) {
    let limit = ctx.config.trigger_pairing_distance;
    let left = trigger_positions(ctx, side_a);
    let right = trigger_positions(ctx, side_b);

    let mut candidates = Vec::new();
    for (va, ta, pa) in left.iter() {
        for (vb, tb, pb) in right.iter() {
            let distance = (pa - pb).norm();
            if distance <= limit {
                candidates.push((OrderedFloat(distance), (*va, *ta), (*vb, *tb)));
            }
        }
    }
    candidates.sort();

    let mut used = BTreeSet::new();
    for (distance, a, b) in candidates {
        if used.contains(&a) || used.contains(&b) {
            continue;
        }
        used.insert(a);
        used.insert(b);
        set_pairing(ctx, a, Some(b));
        set_pairing(ctx, b, Some(a));
        debug!(a = ?a, b = ?b, distance = distance.0, "Triggers paired");
    }
}

fn unpair_triggers(ctx: &mut SimulationContext, side_a: &BTreeSet<BodyId>, side_b: &BTreeSet<BodyId>) {
    let mut crossing = Vec::new();
    for id in side_a.iter() {
        let Some(vessel) = ctx.bodies.get(id).and_then(|b| b.kind.vessel()) else {
            continue;
        };
        for t in vessel.triggers.iter() {
            if let Some(partner) = t.paired_with.filter(|(v, _)| side_b.contains(v)) {
                crossing.push(((*id, t.id), partner));
            }
        }
    }
    for (a, b) in crossing {
        set_pairing(ctx, a, None);
        set_pairing(ctx, b, None);
    }
}

fn set_pairing(ctx: &mut SimulationContext, (vessel, trigger): (BodyId, TriggerId), partner: Option<(BodyId, TriggerId)>) {
    if let Some(t) = ctx
        .bodies
        .get_mut(&vessel)
        .and_then(|b| b.kind.vessel_mut())
        .and_then(|v| v.trigger_mut(trigger))
    {
        t.paired_with = partner;
    }
}

/// The heaviest member carrying security data lends it to the whole group
fn propagate_security(ctx: &mut SimulationContext, main: BodyId) {
    let members = ctx.tree.members(main);
    let Some(security) = members
        .iter()
        .filter_map(|id| ctx.bodies.get(id))
        .filter_map(|b| b.kind.vessel().map(|v| (b.id, v)))
        .filter(|(_, v)| v.security.is_some())
        .max_by_key(|(id, v)| (OrderedFloat(v.mass.as_kilograms()), Reverse(*id)))
        .and_then(|(_, v)| v.security.clone())
    else {
        return;
    };
    for id in members {
        if let Some(vessel) = ctx.bodies.get_mut(&id).and_then(|b| b.kind.vessel_mut()) {
            vessel.security = Some(security.clone());
        }
    }
}
