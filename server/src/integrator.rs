//! Per-tick motion of independently moving bodies.

use dockyard_types::prelude::*;
use na::{UnitQuaternion, Vector3};
use thiserror::Error;
use tracing::debug;

use crate::{
    body::{CourseState, DynamicBody, ThrustState},
    event::SimulationEvent,
    orbit::ParentFrame,
    simulation::EngineConfig,
    solar_system::SolarSystem,
    stabilization::ReleaseCorrection,
    units::Time,
};

#[derive(Debug, Error, PartialEq)]
pub enum IntegrationError {
    #[error("Body {body} orbits unknown celestial body {parent}")]
    UnknownParent { body: BodyId, parent: CelestialId },
    #[error("Body {0} has a non-finite state")]
    NonFiniteState(BodyId),
}

/// Everything a body may read while it advances. Shared between worker threads.
#[derive(Copy, Clone, Debug)]
pub struct IntegrationEnvironment<'a> {
    /// Simulation time at the end of the tick [s]
    pub now: f64,
    pub solar_system: &'a SolarSystem,
    pub config: &'a EngineConfig,
    /// The body follows a stabilization target instead of integrating
    pub stabilized: bool,
    /// The body is a non-main member of a docked group
    pub derived: bool,
}

impl<'a> IntegrationEnvironment<'a> {
    fn parent_frame(&self, body: BodyId, parent: CelestialId) -> Result<ParentFrame, IntegrationError> {
        self.solar_system
            .parent_frame(parent, self.now)
            .ok_or(IntegrationError::UnknownParent { body, parent })
    }
}

#[derive(Debug, Default, PartialEq)]
pub struct AdvanceOutcome {
    pub events: Vec<SimulationEvent>,
    /// Corrections a stabilized body wants folded in when its link is released
    pub release: Option<ReleaseCorrection>,
}

impl AdvanceOutcome {
    pub fn merge(&mut self, other: AdvanceOutcome) {
        self.events.extend(other.events);
        self.release = match (self.release.take(), other.release) {
            (Some(a), Some(b)) => Some(a + b),
            (a, b) => a.or(b),
        };
    }
}

/// Advance one body to `env.now`.
///
/// Non-main members of docked groups are skipped; their pose derives from the
/// main vessel. Stabilized bodies do not integrate; thrust on them becomes a
/// release request in the outcome.
pub fn advance(
    body: &mut DynamicBody,
    dt: Time,
    env: &IntegrationEnvironment,
) -> Result<AdvanceOutcome, IntegrationError> {
    let mut outcome = AdvanceOutcome::default();
    if !dt.is_positive() || env.derived {
        return Ok(outcome);
    }
    let dt = dt.as_secs();

    let frame = env.parent_frame(body.id, body.orbit.parent_frame().id)?;
    body.orbit.refresh_parent(&frame);

    let grace = std::mem::take(&mut body.release_grace);
    if grace {
        body.thrust = ThrustState::default();
    }

    let on_course = !env.stabilized && follow_course(body, env, &mut outcome)?;
    let free = !on_course && !env.stabilized;

    if free {
        body.orbit.advance(env.now);
    }

    if !grace {
        let thrust = std::mem::take(&mut body.thrust);
        apply_thrust(body, &thrust, dt, env.stabilized, &mut outcome);
        apply_rotation(body, &thrust.rotation, dt, env.config.max_angular_rate);
    }

    if free {
        reassign_parent(body, env, &mut outcome)?;
    }

    let parent = body.orbit.parent_frame();
    if parent.radius > 0.0
        && body.orbit.relative_position().norm() < parent.radius + env.config.death_margin
        && !body.marked_for_destruction
    {
        debug!(body = %body.id, parent = %parent.id, "Body inside lethal distance");
        body.marked_for_destruction = true;
    }

    if !body.orbit.state_vector().is_finite() {
        return Err(IntegrationError::NonFiniteState(body.id));
    }

    Ok(outcome)
}

enum CourseProgress {
    Pending,
    Blending { position: Vector3<f64>, velocity: Vector3<f64> },
    Finished,
}

/// Returns true when the course supplied this tick's motion
fn follow_course(
    body: &mut DynamicBody,
    env: &IntegrationEnvironment,
    outcome: &mut AdvanceOutcome,
) -> Result<bool, IntegrationError> {
    let Some(course) = body.course.as_mut() else {
        return Ok(false);
    };
    let def = course.definition;
    if env.now < def.start_time {
        return Ok(false);
    }

    let target_frame = env.parent_frame(body.id, def.parent)?;

    if let CourseState::Engaged = course.state {
        let origin = body.orbit.boxed_clone();
        let mut target = body.orbit.boxed_clone();
        target.init_from_elements(&target_frame, &def.target, def.end_time);
        course.state = CourseState::Active { origin, target };
        debug!(body = %body.id, course = %def.id, "Course started");
        outcome.events.push(SimulationEvent::CourseStarted {
            body: body.id,
            course: def.id,
        });
    }

    let progress = match &mut course.state {
        CourseState::Active { origin, target } => {
            let origin_frame = env.parent_frame(body.id, origin.parent_frame().id)?;
            origin.refresh_parent(&origin_frame);
            origin.advance(env.now);
            target.refresh_parent(&target_frame);
            target.advance(env.now);

            let s = ((env.now - def.start_time) / def.duration()).clamp(0.0, 1.0);
            if s >= 1.0 {
                CourseProgress::Finished
            } else {
                let origin_pos = origin.absolute_position() - target_frame.position;
                let origin_vel = origin.absolute_velocity() - target_frame.velocity;
                let target_pos = target.relative_position();
                let target_vel = target.relative_velocity();
                CourseProgress::Blending {
                    position: origin_pos.lerp(&target_pos, s),
                    velocity: origin_vel.lerp(&target_vel, s)
                        + (target_pos - origin_pos) / def.duration(),
                }
            }
        }
        CourseState::Engaged => CourseProgress::Pending,
    };

    let from = body.orbit.parent_frame().id;
    if from != def.parent {
        outcome.events.push(SimulationEvent::ParentChanged {
            body: body.id,
            from,
            to: def.parent,
        });
    }

    match progress {
        CourseProgress::Pending => return Ok(false),
        CourseProgress::Blending { position, velocity } => {
            body.orbit
                .init_from_state_vectors(&target_frame, position, velocity, env.now, true);
        }
        CourseProgress::Finished => {
            if let Some(course) = body.course.take() {
                if let CourseState::Active { target, .. } = course.state {
                    body.orbit = target;
                }
            }
            debug!(body = %body.id, course = %def.id, "Course finished");
            outcome.events.push(SimulationEvent::CourseFinished {
                body: body.id,
                course: def.id,
            });
        }
    }

    Ok(true)
}

fn apply_thrust(
    body: &mut DynamicBody,
    thrust: &ThrustState,
    dt: f64,
    stabilized: bool,
    outcome: &mut AdvanceOutcome,
) {
    let dv = body.rotation * (thrust.engine + thrust.maneuvering) * dt + thrust.correction_velocity;
    let dp = thrust.correction_position;
    if dv == Vector3::zeros() && dp == Vector3::zeros() {
        return;
    }

    if stabilized {
        let extra = ReleaseCorrection {
            position: dp,
            velocity: dv,
        };
        outcome.release = Some(match outcome.release.take() {
            Some(prev) => prev + extra,
            None => extra,
        });
    } else {
        *body.orbit.relative_velocity_mut() += dv;
        *body.orbit.relative_position_mut() += dp;
        body.orbit.reseed();
    }
}

fn apply_rotation(body: &mut DynamicBody, angular_accel: &Vector3<f64>, dt: f64, max_rate: f64) {
    let omega = (body.angular_velocity + angular_accel * dt).map(|c| c.clamp(-max_rate, max_rate));
    if omega == Vector3::zeros() {
        body.angular_velocity = omega;
        return;
    }

    let before = body.rotation;
    let after = before * UnitQuaternion::from_scaled_axis(omega * dt);
    body.rotation = after;
    body.angular_velocity = (before.inverse() * after).scaled_axis() / dt;
}

fn reassign_parent(
    body: &mut DynamicBody,
    env: &IntegrationEnvironment,
    outcome: &mut AdvanceOutcome,
) -> Result<(), IntegrationError> {
    let from = body.orbit.parent_frame().id;
    let Some(to) = env
        .solar_system
        .influence_parent(from, &body.orbit.relative_position(), env.now)
    else {
        return Ok(());
    };

    let frame = env.parent_frame(body.id, to)?;
    body.orbit.change_parent(&frame);
    debug!(body = %body.id, %from, %to, "Gravity parent changed");
    outcome.events.push(SimulationEvent::ParentChanged {
        body: body.id,
        from,
        to,
    });

    if let Some(course) = body.course.take() {
        debug!(body = %body.id, course = %course.definition.id, "Course invalidated");
        outcome.events.push(SimulationEvent::CourseInvalidated {
            body: body.id,
            course: course.definition.id,
        });
    }

    Ok(())
}
