//! Players and loose objects carried by vessels and pivots.
//!
//! A rider's pose is stored relative to its carrier. Whenever a carrier's
//! world pose is rewritten (dock, undock, destruction) the riders aboard are
//! snapshotted in world space first and replayed against the new carrier poses.

use dockyard_types::prelude::*;
use na::Isometry3;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

use crate::event::SimulationEvent;

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct Rider {
    pub id: RiderId,
    pub name: String,
    pub carrier: BodyId,
    /// Pose in the carrier's frame
    pub local_pose: Isometry3<f64>,
    /// Driven by a connected client, which owns its own pose
    pub connected: bool,
    /// One-shot pose the client must adopt
    pub pending_correction: Option<Isometry3<f64>>,
}

impl Rider {
    pub fn new(id: RiderId, name: impl Into<String>, carrier: BodyId, local_pose: Isometry3<f64>) -> Self {
        Self {
            id,
            name: name.into(),
            carrier,
            local_pose,
            connected: false,
            pending_correction: None,
        }
    }

    pub fn connected(mut self) -> Self {
        self.connected = true;
        self
    }
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct RiderSnapshot {
    pub rider: RiderId,
    pub carrier: BodyId,
    pub world: Isometry3<f64>,
}

#[derive(Clone, Debug, Default)]
pub struct RiderRegistry {
    riders: BTreeMap<RiderId, Rider>,
}

impl RiderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, rider: Rider) -> Option<Rider> {
        self.riders.insert(rider.id, rider)
    }

    pub fn remove(&mut self, id: RiderId) -> Option<Rider> {
        self.riders.remove(&id)
    }

    pub fn get(&self, id: RiderId) -> Option<&Rider> {
        self.riders.get(&id)
    }

    pub fn get_mut(&mut self, id: RiderId) -> Option<&mut Rider> {
        self.riders.get_mut(&id)
    }

    pub fn len(&self) -> usize {
        self.riders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.riders.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Rider> {
        self.riders.values()
    }

    pub fn aboard(&self, carrier: BodyId) -> Vec<RiderId> {
        self.riders
            .values()
            .filter(|r| r.carrier == carrier)
            .map(|r| r.id)
            .collect()
    }

    pub fn is_carrying(&self, carrier: BodyId) -> bool {
        self.riders.values().any(|r| r.carrier == carrier)
    }

    /// World poses of every rider aboard one of `carriers`
    pub fn snapshot(
        &self,
        carriers: &BTreeSet<BodyId>,
        world_pose: impl Fn(BodyId) -> Option<Isometry3<f64>>,
    ) -> Vec<RiderSnapshot> {
        self.riders
            .values()
            .filter(|r| carriers.contains(&r.carrier))
            .filter_map(|r| {
                world_pose(r.carrier).map(|carrier_pose| RiderSnapshot {
                    rider: r.id,
                    carrier: r.carrier,
                    world: carrier_pose * r.local_pose,
                })
            })
            .collect()
    }

    /// Re-express snapshotted riders against their carriers' new world poses.
    /// Unconnected riders snap to the new local pose; connected riders are sent
    /// a correction instead.
    pub fn replay(
        &mut self,
        snapshots: &[RiderSnapshot],
        carrier_poses: &BTreeMap<BodyId, Isometry3<f64>>,
    ) -> Vec<SimulationEvent> {
        let mut events = Vec::new();
        for snap in snapshots {
            let Some(rider) = self.riders.get_mut(&snap.rider) else {
                continue;
            };
            let Some(carrier_pose) = carrier_poses.get(&rider.carrier) else {
                continue;
            };
            let local = carrier_pose.inverse() * snap.world;
            if rider.connected {
                rider.pending_correction = Some(local);
                events.push(SimulationEvent::RiderCorrected {
                    rider: rider.id,
                    carrier: rider.carrier,
                });
            } else {
                rider.local_pose = local;
            }
        }
        events
    }

    /// Move a rider onto a new carrier, keeping its world pose
    pub fn transfer(&mut self, id: RiderId, carrier: BodyId, local_pose: Isometry3<f64>) {
        if let Some(rider) = self.riders.get_mut(&id) {
            debug!(rider = %id, from = %rider.carrier, to = %carrier, "Rider transferred");
            rider.carrier = carrier;
            rider.local_pose = local_pose;
            rider.pending_correction = rider.connected.then_some(local_pose);
        }
    }

    /// Consumes the pending correction, adopting it as the local pose
    pub fn take_correction(&mut self, id: RiderId) -> Option<Isometry3<f64>> {
        let rider = self.riders.get_mut(&id)?;
        let correction = rider.pending_correction.take()?;
        rider.local_pose = correction;
        Some(correction)
    }
}
