use dockyard_types::prelude::*;
use std::collections::BTreeMap;
use thiserror::Error;

use crate::orbit::{kepler, ParentFrame};

type Vector3 = na::Vector3<f64>;

/// Upper bound on the celestial tree depth walked when resolving absolute states
const MAX_DEPTH: usize = 32;

#[derive(Debug, Error, PartialEq)]
pub enum SolarSystemError {
    #[error("Celestial body {0} is defined more than once")]
    Duplicate(CelestialId),
    #[error("Celestial body {body} references unknown parent {parent}")]
    UnknownParent {
        body: CelestialId,
        parent: CelestialId,
    },
}

/// The tree of celestial bodies. Celestials move on fixed Keplerian orbits
/// around their parents, evaluated from epoch zero.
#[derive(Clone, Debug, Default)]
pub struct SolarSystem {
    celestials: BTreeMap<CelestialId, CelestialBody>,
}

impl SolarSystem {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parents must be added before their children
    pub fn add(&mut self, body: CelestialBody) -> Result<(), SolarSystemError> {
        if self.celestials.contains_key(&body.id) {
            return Err(SolarSystemError::Duplicate(body.id));
        }
        if let Some(parent) = body.parent {
            if !self.celestials.contains_key(&parent) {
                return Err(SolarSystemError::UnknownParent {
                    body: body.id,
                    parent,
                });
            }
        }
        self.celestials.insert(body.id, body);
        Ok(())
    }

    pub fn get(&self, id: CelestialId) -> Option<&CelestialBody> {
        self.celestials.get(&id)
    }

    pub fn contains(&self, id: CelestialId) -> bool {
        self.celestials.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.celestials.len()
    }

    pub fn is_empty(&self) -> bool {
        self.celestials.is_empty()
    }

    pub fn children(&self, id: CelestialId) -> impl Iterator<Item = &CelestialBody> {
        self.celestials
            .values()
            .filter(move |c| c.parent == Some(id))
    }

    /// Absolute position and velocity of a celestial at `time`
    pub fn absolute_state(&self, id: CelestialId, time: f64) -> Option<(Vector3, Vector3)> {
        let mut position = Vector3::zeros();
        let mut velocity = Vector3::zeros();
        let mut current = self.celestials.get(&id)?;

        for _ in 0..MAX_DEPTH {
            let (Some(parent_id), Some(orbit)) = (current.parent, current.orbit.as_ref()) else {
                return Some((position, velocity));
            };
            let parent = self.celestials.get(&parent_id)?;
            let (p, v) = kepler::state_at(parent.mu, orbit, time);
            position += p;
            velocity += v;
            current = parent;
        }

        None
    }

    pub fn parent_frame(&self, id: CelestialId, time: f64) -> Option<ParentFrame> {
        let body = self.celestials.get(&id)?;
        let (position, velocity) = self.absolute_state(id, time)?;
        Some(ParentFrame::new(id, body.mu, body.radius).at(position, velocity))
    }

    /// The celestial an artificial body at `relative_position` around `current`
    /// should orbit instead, if any. Leaving the current parent's influence
    /// radius moves up the tree; entering a child's radius moves down.
    pub fn influence_parent(
        &self,
        current: CelestialId,
        relative_position: &Vector3,
        time: f64,
    ) -> Option<CelestialId> {
        let body = self.celestials.get(&current)?;

        if relative_position.norm() > body.gravity_influence_radius {
            if let Some(parent) = body.parent {
                return Some(parent);
            }
        }

        let (current_position, _) = self.absolute_state(current, time)?;
        let absolute = current_position + relative_position;
        self.children(current)
            .filter_map(|child| {
                let (p, _) = self.absolute_state(child.id, time)?;
                let distance = (absolute - p).norm();
                (distance < child.gravity_influence_radius).then_some((child.id, distance))
            })
            .min_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(id, _)| id)
    }
}
