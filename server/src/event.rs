use dockyard_types::prelude::*;
use serde::Serialize;

use crate::channel::TracedMessage;

/// Notifications raised by the engine for observers outside the core
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum SimulationEvent {
    CourseStarted {
        body: BodyId,
        course: CourseId,
    },
    CourseFinished {
        body: BodyId,
        course: CourseId,
    },
    CourseInvalidated {
        body: BodyId,
        course: CourseId,
    },
    ParentChanged {
        body: BodyId,
        from: CelestialId,
        to: CelestialId,
    },
    Stabilized {
        dependent: BodyId,
        target: BodyId,
    },
    Released {
        dependent: BodyId,
        target: BodyId,
    },
    Docked {
        main: BodyId,
        a: PortRef,
        b: PortRef,
    },
    Undocked {
        a: PortRef,
        b: PortRef,
        mains: [BodyId; 2],
    },
    RiderCorrected {
        rider: RiderId,
        carrier: BodyId,
    },
    Destroyed {
        body: BodyId,
    },
}

impl TracedMessage for SimulationEvent {
    fn name(&self) -> &'static str {
        match self {
            SimulationEvent::CourseStarted { .. } => "course_started",
            SimulationEvent::CourseFinished { .. } => "course_finished",
            SimulationEvent::CourseInvalidated { .. } => "course_invalidated",
            SimulationEvent::ParentChanged { .. } => "parent_changed",
            SimulationEvent::Stabilized { .. } => "stabilized",
            SimulationEvent::Released { .. } => "released",
            SimulationEvent::Docked { .. } => "docked",
            SimulationEvent::Undocked { .. } => "undocked",
            SimulationEvent::RiderCorrected { .. } => "rider_corrected",
            SimulationEvent::Destroyed { .. } => "destroyed",
        }
    }
}
