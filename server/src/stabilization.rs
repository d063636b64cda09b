//! Soft follow links: a dependent body rides along with a target's orbit at a
//! fixed offset instead of integrating its own.
//!
//! Links are kept one level deep. Attaching resolves the target to the root of
//! its chain, and a body that becomes a dependent hands its own dependents over
//! to that root, so every copy-down reads an orbit that was integrated this tick.

use dockyard_types::prelude::*;
use na::Vector3;
use rayon::{prelude::*, ThreadPool};
use serde::Serialize;
use std::{
    collections::{BTreeMap, BTreeSet},
    ops::{Add, AddAssign},
    panic::{self, AssertUnwindSafe},
};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::{event::SimulationEvent, orbit::OrbitModel, simulation::SimulationContext};

/// Position and velocity folded into a dependent's orbit when its link is released
#[derive(Copy, Clone, Debug, PartialEq, Serialize)]
pub struct ReleaseCorrection {
    pub position: Vector3<f64>,
    pub velocity: Vector3<f64>,
}

impl Default for ReleaseCorrection {
    fn default() -> Self {
        Self {
            position: Vector3::zeros(),
            velocity: Vector3::zeros(),
        }
    }
}

impl Add for ReleaseCorrection {
    type Output = ReleaseCorrection;

    fn add(self, rhs: ReleaseCorrection) -> Self::Output {
        ReleaseCorrection {
            position: self.position + rhs.position,
            velocity: self.velocity + rhs.velocity,
        }
    }
}

impl AddAssign for ReleaseCorrection {
    fn add_assign(&mut self, rhs: ReleaseCorrection) {
        self.position += rhs.position;
        self.velocity += rhs.velocity;
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct StabilizationLink {
    pub target: BodyId,
    /// Dependent position minus target position at attach time [m]
    pub offset: Vector3<f64>,
    /// Simulation time [s]
    pub attached_at: f64,
    pub release: Option<ReleaseCorrection>,
}

#[derive(Debug, Error, PartialEq)]
pub enum StabilizationError {
    #[error("Unknown body {0}")]
    UnknownBody(BodyId),
    #[error("Body {0} cannot be stabilized")]
    NotStabilizable(BodyId),
    #[error("Body {0} cannot stabilize onto itself")]
    SelfTarget(BodyId),
    #[error("Body {target} is part of the same docked group as {dependent}")]
    SameGroup { dependent: BodyId, target: BodyId },
    #[error("Body {dependent} already follows {target}")]
    AlreadyStabilized { dependent: BodyId, target: BodyId },
    #[error("Stabilizing {dependent} onto {target} would form a cycle")]
    Cycle { dependent: BodyId, target: BodyId },
    #[error("Velocity divergence {divergence} m/s exceeds {limit} m/s")]
    VelocityDivergence { divergence: f64, limit: f64 },
    #[error("Separation {distance} m exceeds {limit} m")]
    DistanceDivergence { distance: f64, limit: f64 },
    #[error("Body {0} is not stabilized")]
    NotStabilized(BodyId),
}

/// The link table. Owns every link, the reverse dependent sets and the
/// tick-indexed queue of deferred releases.
#[derive(Clone, Debug, Default)]
pub struct StabilizationGraph {
    links: BTreeMap<BodyId, StabilizationLink>,
    dependents: BTreeMap<BodyId, BTreeSet<BodyId>>,
    deferred: BTreeMap<u64, Vec<BodyId>>,
}

impl StabilizationGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    pub fn get(&self, dependent: BodyId) -> Option<&StabilizationLink> {
        self.links.get(&dependent)
    }

    pub fn target_of(&self, dependent: BodyId) -> Option<BodyId> {
        self.links.get(&dependent).map(|l| l.target)
    }

    pub fn is_stabilized(&self, body: BodyId) -> bool {
        self.links.contains_key(&body)
    }

    /// Dependents in id order
    pub fn dependents_of(&self, target: BodyId) -> Vec<BodyId> {
        self.dependents
            .get(&target)
            .map(|d| d.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&BodyId, &StabilizationLink)> {
        self.links.iter()
    }

    /// Follow links from `body` to the end of its chain
    pub fn root_of(&self, body: BodyId, cap: usize) -> BodyId {
        let mut current = body;
        for _ in 0..cap {
            match self.target_of(current) {
                Some(next) => current = next,
                None => return current,
            }
        }
        error!(body = %body, cap, "Stabilization chain exceeded the iteration cap");
        current
    }

    fn link(&mut self, dependent: BodyId, link: StabilizationLink) {
        self.unlink(dependent);
        self.dependents
            .entry(link.target)
            .or_default()
            .insert(dependent);
        self.links.insert(dependent, link);
    }

    fn unlink(&mut self, dependent: BodyId) -> Option<StabilizationLink> {
        let link = self.links.remove(&dependent)?;
        if let Some(set) = self.dependents.get_mut(&link.target) {
            set.remove(&dependent);
            if set.is_empty() {
                self.dependents.remove(&link.target);
            }
        }
        Some(link)
    }

    fn schedule(&mut self, tick: u64, dependent: BodyId) {
        let queue = self.deferred.entry(tick).or_default();
        if !queue.contains(&dependent) {
            queue.push(dependent);
        }
    }

    fn take_due(&mut self, tick: u64) -> Vec<BodyId> {
        let later = self.deferred.split_off(&(tick + 1));
        let due = std::mem::replace(&mut self.deferred, later);
        let mut seen = BTreeSet::new();
        due.into_values()
            .flatten()
            .filter(|id| seen.insert(*id))
            .collect()
    }

    pub fn pending_releases(&self) -> usize {
        self.deferred.values().map(Vec::len).sum()
    }

    /// One level deep, no self links, reverse sets match the links
    pub fn check_invariants(&self) -> bool {
        let one_level = self
            .links
            .values()
            .all(|l| !self.links.contains_key(&l.target));
        let no_self = self.links.iter().all(|(d, l)| *d != l.target);
        let reverse = self.dependents.iter().all(|(t, deps)| {
            deps.iter()
                .all(|d| self.links.get(d).map(|l| l.target) == Some(*t))
        }) && self.links.iter().all(|(d, l)| {
            self.dependents
                .get(&l.target)
                .map(|s| s.contains(d))
                .unwrap_or(false)
        });
        one_level && no_self && reverse
    }
}

/// A dependent's orbit rebuilt from its target's plus the offset
fn follow(
    dependent: &dyn OrbitModel,
    target: &dyn OrbitModel,
    offset: &Vector3<f64>,
    now: f64,
) -> Box<dyn OrbitModel> {
    let mut orbit = dependent.boxed_clone();
    orbit.copy_from(target, now, false);
    *orbit.relative_position_mut() += offset;
    orbit.reseed();
    orbit
}

fn copy_down(ctx: &mut SimulationContext, dependent: BodyId) {
    let now = ctx.now();
    let Some(link) = ctx.links.get(dependent) else {
        return;
    };
    let (Some(dep), Some(target)) = (ctx.bodies.get(&dependent), ctx.bodies.get(&link.target))
    else {
        return;
    };
    let orbit = follow(dep.orbit.as_ref(), target.orbit.as_ref(), &link.offset, now);
    if let Some(dep) = ctx.bodies.get_mut(&dependent) {
        dep.orbit = orbit;
    }
}

fn apply_correction(ctx: &mut SimulationContext, body: BodyId, extra: &ReleaseCorrection) {
    if let Some(b) = ctx.bodies.get_mut(&body) {
        *b.orbit.relative_position_mut() += extra.position;
        *b.orbit.relative_velocity_mut() += extra.velocity;
        b.orbit.reseed();
    }
}

/// Attach `dependent` (resolved to its main vessel) to the root of `target`'s
/// chain. Returns the body actually followed.
pub fn attach(
    ctx: &mut SimulationContext,
    dependent: BodyId,
    target: BodyId,
    force: bool,
) -> Result<BodyId, StabilizationError> {
    for id in [dependent, target] {
        if !ctx.bodies.contains_key(&id) {
            return Err(StabilizationError::UnknownBody(id));
        }
    }
    if dependent == target {
        return Err(StabilizationError::SelfTarget(dependent));
    }

    let dep = ctx.main_of(dependent);
    let dep_body = ctx
        .bodies
        .get(&dep)
        .ok_or(StabilizationError::UnknownBody(dep))?;
    if !dep_body.kind.is_stabilizable() {
        return Err(StabilizationError::NotStabilizable(dep));
    }

    let target_main = ctx.main_of(target);
    if target_main == dep {
        return Err(StabilizationError::SameGroup { dependent, target });
    }
    let root = ctx
        .links
        .root_of(target_main, ctx.config.cascade_iteration_cap);
    if ctx.links.target_of(dep) == Some(root) {
        return Err(StabilizationError::AlreadyStabilized {
            dependent: dep,
            target: root,
        });
    }
    if root == dep {
        return Err(StabilizationError::Cycle {
            dependent: dep,
            target,
        });
    }

    let root_body = ctx
        .bodies
        .get(&root)
        .ok_or(StabilizationError::UnknownBody(root))?;
    let root_position = root_body.orbit.absolute_position();
    let offset = dep_body.orbit.absolute_position() - root_position;

    if !force {
        let divergence =
            (dep_body.orbit.absolute_velocity() - root_body.orbit.absolute_velocity()).norm();
        if divergence > ctx.config.max_stabilization_velocity {
            return Err(StabilizationError::VelocityDivergence {
                divergence,
                limit: ctx.config.max_stabilization_velocity,
            });
        }
        let distance = (offset.norm() - root_body.kind.radius()).max(0.0);
        if distance > ctx.config.max_stabilization_distance {
            return Err(StabilizationError::DistanceDivergence {
                distance,
                limit: ctx.config.max_stabilization_distance,
            });
        }
    }

    let now = ctx.now();

    if let Some(previous) = ctx.links.unlink(dep) {
        ctx.emit(SimulationEvent::Released {
            dependent: dep,
            target: previous.target,
        });
    }

    for handed in ctx.links.dependents_of(dep) {
        let Some(handed_body) = ctx.bodies.get(&handed) else {
            continue;
        };
        let handed_offset = handed_body.orbit.absolute_position() - root_position;
        let release = ctx.links.get(handed).and_then(|l| l.release);
        ctx.links.link(
            handed,
            StabilizationLink {
                target: root,
                offset: handed_offset,
                attached_at: now,
                release,
            },
        );
        debug!(dependent = %handed, from = %dep, to = %root, "Dependent handed over");
        ctx.emit(SimulationEvent::Stabilized {
            dependent: handed,
            target: root,
        });
    }

    ctx.links.link(
        dep,
        StabilizationLink {
            target: root,
            offset,
            attached_at: now,
            release: None,
        },
    );
    copy_down(ctx, dep);

    info!(dependent = %dep, target = %root, force, "Stabilized");
    ctx.emit(SimulationEvent::Stabilized {
        dependent: dep,
        target: root,
    });
    debug_assert!(ctx.links.check_invariants());

    Ok(root)
}

/// Detach `dependent` (resolved to its main vessel). Returns its former target.
pub fn detach(
    ctx: &mut SimulationContext,
    dependent: BodyId,
    cascade: bool,
) -> Result<BodyId, StabilizationError> {
    let dep = ctx.main_of(dependent);
    let link = ctx
        .links
        .unlink(dep)
        .ok_or(StabilizationError::NotStabilized(dep))?;

    info!(dependent = %dep, target = %link.target, "Released");
    ctx.emit(SimulationEvent::Released {
        dependent: dep,
        target: link.target,
    });
    release_dependents(ctx, dep, cascade);

    Ok(link.target)
}

/// Drop every link onto `body`. With `cascade` the first dependent in id order
/// becomes the new target of the others.
fn release_dependents(ctx: &mut SimulationContext, body: BodyId, cascade: bool) {
    let dependents = ctx.links.dependents_of(body);
    let Some((first, rest)) = dependents.split_first() else {
        return;
    };

    for d in dependents.iter() {
        ctx.links.unlink(*d);
        ctx.emit(SimulationEvent::Released {
            dependent: *d,
            target: body,
        });
    }

    if !cascade {
        return;
    }

    let cap = ctx.config.cascade_iteration_cap;
    for (iteration, d) in rest.iter().enumerate() {
        if iteration >= cap {
            error!(
                target = %body,
                cap,
                remaining = rest.len() - iteration,
                "Stabilization cascade hit the iteration cap"
            );
            break;
        }
        if let Err(e) = attach(ctx, *d, *first, true) {
            warn!(dependent = %d, target = %first, error = %e, "Failed to re-chain dependent");
        }
    }
}

/// Remove `body` from the link graph both as a dependent and as a target.
/// With `update_first` the pending copy-down and any scheduled release
/// corrections are applied before the links are dropped.
pub fn disable(ctx: &mut SimulationContext, body: BodyId, cascade: bool, update_first: bool) {
    if update_first {
        for d in ctx.links.dependents_of(body) {
            copy_down(ctx, d);
        }
        copy_down(ctx, body);
        let pending = ctx.links.get(body).and_then(|l| l.release);
        if let Some(extra) = pending {
            apply_correction(ctx, body, &extra);
        }
    }

    if let Some(link) = ctx.links.unlink(body) {
        debug!(dependent = %body, target = %link.target, "Stabilization disabled");
        ctx.emit(SimulationEvent::Released {
            dependent: body,
            target: link.target,
        });
    }
    release_dependents(ctx, body, cascade);
}

/// Schedule a release at the end of the current tick. Corrections requested
/// for the same release are summed.
pub fn detach_deferred(ctx: &mut SimulationContext, dependent: BodyId, extra: ReleaseCorrection) {
    let tick = ctx.info.tick;
    let Some(link) = ctx.links.links.get_mut(&dependent) else {
        warn!(dependent = %dependent, "Deferred release for a body that is not stabilized");
        return;
    };
    link.release = Some(match link.release {
        Some(prev) => prev + extra,
        None => extra,
    });
    ctx.links.schedule(tick, dependent);
    debug!(dependent = %dependent, tick, "Release scheduled");
}

/// Rewrite every dependent's orbit from its target. Reads run in parallel on
/// `pool`; writes are committed afterwards.
pub fn after_update(ctx: &mut SimulationContext, pool: &ThreadPool) {
    let now = ctx.now();
    let bodies = &ctx.bodies;
    let links = &ctx.links.links;
    let updates: Vec<(BodyId, Box<dyn OrbitModel>)> = pool.install(|| {
        links
            .par_iter()
            .filter_map(|(dep, link)| {
                let dep_body = bodies.get(dep)?;
                let target = bodies.get(&link.target)?;
                let res = panic::catch_unwind(AssertUnwindSafe(|| {
                    follow(dep_body.orbit.as_ref(), target.orbit.as_ref(), &link.offset, now)
                }));
                match res {
                    Ok(orbit) => Some((*dep, orbit)),
                    Err(_) => {
                        error!(dependent = %dep, target = %link.target, "Copy-down panicked, skipping");
                        None
                    }
                }
            })
            .collect()
    });

    for (id, orbit) in updates {
        if let Some(body) = ctx.bodies.get_mut(&id) {
            body.orbit = orbit;
        }
    }
}

/// Apply the releases scheduled up to the current tick. Each release folds in
/// its corrections once and grants the body a one-tick grace.
pub fn resolve_deferred(ctx: &mut SimulationContext) {
    for dep in ctx.links.take_due(ctx.info.tick) {
        let Some(extra) = ctx.links.get(dep).map(|l| l.release.unwrap_or_default()) else {
            continue;
        };
        if detach(ctx, dep, true).is_err() {
            continue;
        }
        apply_correction(ctx, dep, &extra);
        if let Some(body) = ctx.bodies.get_mut(&dep) {
            body.release_grace = true;
        }
        debug!(
            dependent = %dep,
            dv = ?extra.velocity,
            dp = ?extra.position,
            "Deferred release applied"
        );
    }
}
