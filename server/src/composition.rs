//! The docking forest.
//!
//! Docking edges are stored symmetrically by port. Each connected group has one
//! main vessel; every member's transform relative to its parent and to the main
//! is derived from the port alignments along its path and rebuilt whenever the
//! group's topology changes.

use dockyard_types::prelude::*;
use na::{Isometry3, Translation3, UnitQuaternion, Vector3};
use std::{
    collections::{BTreeMap, BTreeSet, VecDeque},
    f64::consts::PI,
};
use thiserror::Error;

use crate::{
    body::{DynamicBody, PortSpec},
    units::Mass,
};

#[derive(Debug, Error, PartialEq)]
pub enum CompositionError {
    #[error("Vessel {vessel} resolves to main {main}, which resolves to {main_of_main}")]
    MainNotIdempotent {
        vessel: BodyId,
        main: BodyId,
        main_of_main: BodyId,
    },
    #[error("Docking edge {0} is not symmetric")]
    AsymmetricEdge(PortRef),
    #[error("Group {0} contains a cycle")]
    Cycle(BodyId),
    #[error("Vessel {0} is not a member of its main's group")]
    Orphan(BodyId),
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum VesselState {
    Standalone,
    DockedMain,
    DockedChild { main: BodyId },
    Destroyed,
}

#[derive(Clone, Debug, PartialEq)]
pub struct VesselNode {
    pub main: BodyId,
    /// The vessel this one hangs off in the current group layout
    pub parent: Option<BodyId>,
    pub children: Vec<BodyId>,
    pub relative_to_parent: Isometry3<f64>,
    pub relative_to_main: Isometry3<f64>,
}

impl VesselNode {
    fn standalone(id: BodyId) -> Self {
        Self {
            main: id,
            parent: None,
            children: Vec::new(),
            relative_to_parent: Isometry3::identity(),
            relative_to_main: Isometry3::identity(),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct GroupData {
    pub members: BTreeSet<BodyId>,
    pub mass: Mass,
    /// Composite mass center in the main vessel's frame [m]
    pub mass_center: Vector3<f64>,
}

/// Pose of a child vessel in its parent's frame when `child_port` is docked to
/// `parent_port`: the ports face each other, rotated half a turn about up.
pub fn port_alignment(parent_port: &PortSpec, child_port: &PortSpec) -> Isometry3<f64> {
    let facing = UnitQuaternion::from_axis_angle(&Vector3::y_axis(), PI);
    parent_port.pose() * Isometry3::from_parts(Translation3::identity(), facing) * child_port.pose().inverse()
}

#[derive(Clone, Debug, Default)]
pub struct CompositionTree {
    edges: BTreeMap<PortRef, PortRef>,
    nodes: BTreeMap<BodyId, VesselNode>,
    groups: BTreeMap<BodyId, GroupData>,
    destroyed: BTreeSet<BodyId>,
}

impl CompositionTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_vessel(&mut self, id: BodyId, mass: Mass) {
        self.nodes.insert(id, VesselNode::standalone(id));
        self.groups.insert(
            id,
            GroupData {
                members: BTreeSet::from([id]),
                mass,
                mass_center: Vector3::zeros(),
            },
        );
        self.destroyed.remove(&id);
    }

    /// The vessel must already be undocked
    pub fn remove_vessel(&mut self, id: BodyId) {
        debug_assert!(self.docked_ports(id).is_empty());
        self.nodes.remove(&id);
        self.groups.remove(&id);
        self.destroyed.insert(id);
    }

    pub fn contains(&self, id: BodyId) -> bool {
        self.nodes.contains_key(&id)
    }

    pub fn main_vessel(&self, id: BodyId) -> Option<BodyId> {
        self.nodes.get(&id).map(|n| n.main)
    }

    pub fn is_main(&self, id: BodyId) -> bool {
        self.main_vessel(id) == Some(id)
    }

    /// Non-main member of a group; its pose derives from the main
    pub fn is_derived(&self, id: BodyId) -> bool {
        self.main_vessel(id).map(|m| m != id).unwrap_or(false)
    }

    pub fn state(&self, id: BodyId) -> Option<VesselState> {
        if self.destroyed.contains(&id) {
            return Some(VesselState::Destroyed);
        }
        let node = self.nodes.get(&id)?;
        let group_size = self
            .groups
            .get(&node.main)
            .map(|g| g.members.len())
            .unwrap_or(1);
        Some(if node.main != id {
            VesselState::DockedChild { main: node.main }
        } else if group_size > 1 {
            VesselState::DockedMain
        } else {
            VesselState::Standalone
        })
    }

    pub fn node(&self, id: BodyId) -> Option<&VesselNode> {
        self.nodes.get(&id)
    }

    pub fn relative_to_main(&self, id: BodyId) -> Isometry3<f64> {
        self.nodes
            .get(&id)
            .map(|n| n.relative_to_main)
            .unwrap_or_else(Isometry3::identity)
    }

    pub fn group(&self, main: BodyId) -> Option<&GroupData> {
        self.groups.get(&main)
    }

    pub fn group_of(&self, id: BodyId) -> Option<&GroupData> {
        self.main_vessel(id).and_then(|m| self.groups.get(&m))
    }

    pub fn mains(&self) -> impl Iterator<Item = BodyId> + '_ {
        self.groups.keys().copied()
    }

    /// Members of the group containing `id`, including itself
    pub fn members(&self, id: BodyId) -> BTreeSet<BodyId> {
        self.group_of(id)
            .map(|g| g.members.clone())
            .unwrap_or_else(|| BTreeSet::from([id]))
    }

    pub fn set_mass_center(&mut self, main: BodyId, center: Vector3<f64>) {
        if let Some(g) = self.groups.get_mut(&main) {
            g.mass_center = center;
        }
    }

    pub fn docked_to(&self, port: PortRef) -> Option<PortRef> {
        self.edges.get(&port).copied()
    }

    pub fn is_docked(&self, port: PortRef) -> bool {
        self.edges.contains_key(&port)
    }

    pub fn docked_ports(&self, vessel: BodyId) -> Vec<PortRef> {
        self.edges
            .range(PortRef::new(vessel, PortId(0))..=PortRef::new(vessel, PortId(u32::MAX)))
            .map(|(p, _)| *p)
            .collect()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len() / 2
    }

    pub fn link(&mut self, a: PortRef, b: PortRef) {
        self.edges.insert(a, b);
        self.edges.insert(b, a);
    }

    /// Returns the port that was docked to `port`
    pub fn unlink(&mut self, port: PortRef) -> Option<PortRef> {
        let other = self.edges.remove(&port)?;
        self.edges.remove(&other);
        Some(other)
    }

    /// Sum of member masses, recomputed from the bodies
    pub fn recompute_mass(&mut self, main: BodyId, bodies: &BTreeMap<BodyId, DynamicBody>) -> Mass {
        let Some(group) = self.groups.get_mut(&main) else {
            return Mass::default();
        };
        group.mass = group
            .members
            .iter()
            .filter_map(|m| bodies.get(m))
            .map(|b| b.mass())
            .sum();
        group.mass
    }

    /// Re-derive the group reachable from `root` with `root` as its main.
    /// Returns the members.
    pub fn rebuild_group(
        &mut self,
        root: BodyId,
        bodies: &BTreeMap<BodyId, DynamicBody>,
    ) -> BTreeSet<BodyId> {
        let members = self.relayout(root, bodies);
        debug_assert_eq!(self.check_invariants(), Ok(()));
        members
    }

    /// Re-derive several groups after a split. The tree is only consistent
    /// once every half has been laid out again.
    pub fn rebuild_groups(
        &mut self,
        roots: &[BodyId],
        bodies: &BTreeMap<BodyId, DynamicBody>,
    ) -> Vec<BTreeSet<BodyId>> {
        let groups = roots.iter().map(|r| self.relayout(*r, bodies)).collect();
        debug_assert_eq!(self.check_invariants(), Ok(()));
        groups
    }

    /// Breadth-first walk over the port graph from `root`
    fn relayout(&mut self, root: BodyId, bodies: &BTreeMap<BodyId, DynamicBody>) -> BTreeSet<BodyId> {
        let mut members = BTreeSet::from([root]);
        let mut queue = VecDeque::from([root]);
        let mut layout: BTreeMap<BodyId, VesselNode> = BTreeMap::new();
        layout.insert(root, VesselNode::standalone(root));

        while let Some(current) = queue.pop_front() {
            let current_to_main = layout
                .get(&current)
                .map(|n| n.relative_to_main)
                .unwrap_or_else(Isometry3::identity);

            for own_port in self.docked_ports(current) {
                let Some(other_port) = self.docked_to(own_port) else {
                    continue;
                };
                let child = other_port.vessel;
                if !members.insert(child) {
                    continue;
                }

                let relative_to_parent = port_spec(bodies, own_port)
                    .zip(port_spec(bodies, other_port))
                    .map(|(parent, child)| port_alignment(parent, child))
                    .unwrap_or_else(Isometry3::identity);

                layout.insert(
                    child,
                    VesselNode {
                        main: root,
                        parent: Some(current),
                        children: Vec::new(),
                        relative_to_parent,
                        relative_to_main: current_to_main * relative_to_parent,
                    },
                );
                if let Some(parent) = layout.get_mut(&current) {
                    parent.children.push(child);
                }
                queue.push_back(child);
            }
        }

        let mass_center = match self.nodes.get(&root) {
            Some(node) if node.main == root => self
                .groups
                .get(&root)
                .map(|g| g.mass_center)
                .unwrap_or_else(Vector3::zeros),
            _ => Vector3::zeros(),
        };

        for member in members.iter() {
            let Some(old_main) = self.nodes.get(member).map(|n| n.main) else {
                continue;
            };
            let now_empty = match self.groups.get_mut(&old_main) {
                Some(group) => {
                    group.members.remove(member);
                    group.members.is_empty()
                }
                None => false,
            };
            if now_empty {
                self.groups.remove(&old_main);
            }
        }
        self.nodes.extend(layout);

        let mass = members
            .iter()
            .filter_map(|m| bodies.get(m))
            .map(|b| b.mass())
            .sum();
        self.groups.insert(
            root,
            GroupData {
                members: members.clone(),
                mass,
                mass_center,
            },
        );
        members
    }

    pub fn check_invariants(&self) -> Result<(), CompositionError> {
        for (port, other) in self.edges.iter() {
            if self.edges.get(other) != Some(port) {
                return Err(CompositionError::AsymmetricEdge(*port));
            }
        }

        for (id, node) in self.nodes.iter() {
            let main_of_main = self
                .nodes
                .get(&node.main)
                .map(|n| n.main)
                .unwrap_or(node.main);
            if main_of_main != node.main {
                return Err(CompositionError::MainNotIdempotent {
                    vessel: *id,
                    main: node.main,
                    main_of_main,
                });
            }
            let in_group = self
                .groups
                .get(&node.main)
                .map(|g| g.members.contains(id))
                .unwrap_or(false);
            if !in_group {
                return Err(CompositionError::Orphan(*id));
            }
        }

        // A connected group is a tree iff it has exactly members - 1 edges
        for (main, group) in self.groups.iter() {
            let edges = group
                .members
                .iter()
                .map(|m| self.docked_ports(*m).len())
                .sum::<usize>()
                / 2;
            if edges + 1 != group.members.len() {
                return Err(CompositionError::Cycle(*main));
            }
        }

        Ok(())
    }
}

fn port_spec(bodies: &BTreeMap<BodyId, DynamicBody>, port: PortRef) -> Option<&PortSpec> {
    bodies
        .get(&port.vessel)
        .and_then(|b| b.kind.vessel())
        .and_then(|v| v.port(port.port))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        body::{BodyKind, VesselData},
        orbit::{KeplerOrbit, ParentFrame},
    };
    use approx::assert_relative_eq;

    fn vessel(id: u64, mass: f64, ports: &[(u32, Vector3<f64>)]) -> DynamicBody {
        let data = VesselData {
            name: format!("v{id}"),
            mass: Mass::from_kilograms(mass),
            hull_half_extents: Vector3::new(1.0, 1.0, 1.0),
            ports: ports
                .iter()
                .map(|(p, pos)| PortSpec {
                    id: PortId(*p),
                    name: format!("port-{p}"),
                    position: *pos,
                    // Ports face outward along their offset
                    rotation: if pos.z < 0.0 {
                        UnitQuaternion::from_axis_angle(&Vector3::y_axis(), PI)
                    } else {
                        UnitQuaternion::identity()
                    },
                })
                .collect(),
            triggers: Vec::new(),
            security: None,
        };
        let orbit = KeplerOrbit::new(ParentFrame::new(CelestialId(0), 0.0, 0.0));
        DynamicBody::new(BodyId(id), BodyKind::Vessel(data), Box::new(orbit))
    }

    fn setup() -> (CompositionTree, BTreeMap<BodyId, DynamicBody>) {
        let z = Vector3::z();
        let bodies: BTreeMap<BodyId, DynamicBody> = [
            vessel(1, 1000.0, &[(1, z)]),
            vessel(2, 4000.0, &[(1, z), (2, -z)]),
            vessel(3, 500.0, &[(1, z)]),
        ]
        .into_iter()
        .map(|b| (b.id, b))
        .collect();
        let mut tree = CompositionTree::new();
        for b in bodies.values() {
            tree.insert_vessel(b.id, b.mass());
        }
        (tree, bodies)
    }

    fn port(v: u64, p: u32) -> PortRef {
        PortRef::new(BodyId(v), PortId(p))
    }

    #[test]
    fn chain_rebuild_composes_alignments() {
        let (mut tree, bodies) = setup();
        tree.link(port(1, 1), port(2, 1));
        tree.link(port(2, 2), port(3, 1));
        let members = tree.rebuild_group(BodyId(2), &bodies);

        assert_eq!(members.len(), 3);
        assert_eq!(tree.state(BodyId(2)), Some(VesselState::DockedMain));
        assert_eq!(
            tree.state(BodyId(1)),
            Some(VesselState::DockedChild { main: BodyId(2) })
        );
        assert_eq!(tree.group(BodyId(2)).unwrap().mass, Mass::from_kilograms(5500.0));
        assert!(tree.group(BodyId(1)).is_none());
        assert!(tree.group(BodyId(3)).is_none());

        // Port 1 of each vessel sits one meter forward; facing ports put vessel
        // 1's origin two meters ahead of vessel 2's
        assert_relative_eq!(
            tree.relative_to_main(BodyId(1)).translation.vector,
            Vector3::new(0.0, 0.0, 2.0),
            epsilon = 1e-12
        );
        assert_relative_eq!(
            tree.relative_to_main(BodyId(3)).translation.vector,
            Vector3::new(0.0, 0.0, -2.0),
            epsilon = 1e-12
        );
        assert_eq!(tree.check_invariants(), Ok(()));
    }

    #[test]
    fn main_resolution_is_idempotent() {
        let (mut tree, bodies) = setup();
        tree.link(port(1, 1), port(2, 1));
        tree.rebuild_group(BodyId(1), &bodies);
        for id in [1, 2, 3].map(BodyId) {
            let main = tree.main_vessel(id).unwrap();
            assert_eq!(tree.main_vessel(main), Some(main));
        }
    }

    #[test]
    fn mass_recompute_is_idempotent() {
        let (mut tree, bodies) = setup();
        tree.link(port(1, 1), port(2, 1));
        tree.rebuild_group(BodyId(2), &bodies);
        let first = tree.recompute_mass(BodyId(2), &bodies);
        let second = tree.recompute_mass(BodyId(2), &bodies);
        assert_eq!(first, second);
        assert_eq!(first, Mass::from_kilograms(5000.0));
    }

    #[test]
    fn unlink_then_rebuild_splits() {
        let (mut tree, bodies) = setup();
        tree.link(port(1, 1), port(2, 1));
        tree.rebuild_group(BodyId(2), &bodies);

        assert_eq!(tree.unlink(port(2, 1)), Some(port(1, 1)));
        tree.rebuild_groups(&[BodyId(1), BodyId(2)], &bodies);

        assert_eq!(tree.state(BodyId(1)), Some(VesselState::Standalone));
        assert_eq!(tree.state(BodyId(2)), Some(VesselState::Standalone));
        assert_eq!(tree.relative_to_main(BodyId(1)), Isometry3::identity());
        assert_eq!(tree.group(BodyId(1)).unwrap().mass, Mass::from_kilograms(1000.0));
        assert_eq!(tree.check_invariants(), Ok(()));
    }

    #[test]
    fn cycle_is_detected() {
        let (mut tree, bodies) = setup();
        tree.link(port(1, 1), port(2, 1));
        tree.link(port(2, 2), port(3, 1));
        tree.rebuild_group(BodyId(2), &bodies);

        // Bypass the coordinator's precondition
        tree.edges.insert(port(1, 9), port(3, 9));
        tree.edges.insert(port(3, 9), port(1, 9));
        assert_eq!(tree.check_invariants(), Err(CompositionError::Cycle(BodyId(2))));
    }
}
