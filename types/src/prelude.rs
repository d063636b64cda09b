pub use crate::{
    celestial::CelestialBody,
    course::CourseDefinition,
    ids::{BodyId, CelestialId, CourseId, PortId, PortRef, RiderId, TriggerId},
    orbit::{OrbitalElements, StateVector},
};
