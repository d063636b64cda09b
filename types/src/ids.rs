use derive_more::Display;
use serde::{Deserialize, Serialize};

/// Stable identity of any simulated dynamic body (vessel, pivot, loose object)
#[derive(
    Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Display, Serialize, Deserialize,
)]
#[display(fmt = "{}", "_0")]
#[serde(transparent)]
pub struct BodyId(pub u64);

/// A planet, moon or star; the gravitational parent of an orbit
#[derive(
    Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Display, Serialize, Deserialize,
)]
#[display(fmt = "{}", "_0")]
#[serde(transparent)]
pub struct CelestialId(pub u64);

/// Docking port index, unique within its vessel
#[derive(
    Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Display, Serialize, Deserialize,
)]
#[display(fmt = "{}", "_0")]
#[serde(transparent)]
pub struct PortId(pub u32);

/// Trigger sub-object index, unique within its vessel
#[derive(
    Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Display, Serialize, Deserialize,
)]
#[display(fmt = "{}", "_0")]
#[serde(transparent)]
pub struct TriggerId(pub u32);

/// A player, corpse or loose item riding on a carrier body
#[derive(
    Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Display, Serialize, Deserialize,
)]
#[display(fmt = "{}", "_0")]
#[serde(transparent)]
pub struct RiderId(pub u64);

#[derive(
    Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Display, Serialize, Deserialize,
)]
#[display(fmt = "{}", "_0")]
#[serde(transparent)]
pub struct CourseId(pub u64);

/// A specific port on a specific vessel
#[derive(
    Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Display, Serialize, Deserialize,
)]
#[display(fmt = "{}:{}", "vessel", "port")]
pub struct PortRef {
    pub vessel: BodyId,
    pub port: PortId,
}

impl PortRef {
    pub fn new(vessel: BodyId, port: PortId) -> Self {
        Self { vessel, port }
    }
}

impl From<u64> for BodyId {
    fn from(value: u64) -> Self {
        BodyId(value)
    }
}

impl From<u64> for CelestialId {
    fn from(value: u64) -> Self {
        CelestialId(value)
    }
}

impl From<u32> for PortId {
    fn from(value: u32) -> Self {
        PortId(value)
    }
}

impl From<u32> for TriggerId {
    fn from(value: u32) -> Self {
        TriggerId(value)
    }
}
