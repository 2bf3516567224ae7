//! Dependency graph discovery.
//!
//! [`build_graph`] walks backwards from the network's terminal nodes. Each
//! popped node's inlets are inspected; an inlet holding another node's outlet
//! records an edge and queues that producer if it has not been seen. Nodes not
//! reachable from a terminal are never part of the graph.
//!
//! The resulting [`DependencyGraph`] keeps discovery order as its listing
//! order, which is the starting point the scheduler relocates from.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use crate::error::GraphError;
use crate::node::NodeId;
use crate::patch::Network;

/// Map from node to the nodes it reads from, plus a listing order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyGraph {
    listing: Vec<NodeId>,
    dependencies: BTreeMap<NodeId, BTreeSet<NodeId>>,
}

impl DependencyGraph {
    /// Builds a graph from explicit `(node, dependencies)` pairs.
    ///
    /// The listing order is the order of `entries`. Every dependency must be
    /// listed itself, and the graph must be acyclic.
    pub fn from_entries(
        entries: impl IntoIterator<Item = (NodeId, BTreeSet<NodeId>)>,
    ) -> Result<Self, GraphError> {
        let mut listing = Vec::new();
        let mut dependencies = BTreeMap::new();
        for (node, deps) in entries {
            if deps.contains(&node) {
                return Err(GraphError::SelfDependency(node));
            }
            listing.push(node);
            dependencies.insert(node, deps);
        }
        for (node, deps) in &dependencies {
            if let Some(missing) = deps.iter().find(|d| !dependencies.contains_key(d)) {
                return Err(GraphError::MissingNode {
                    from: *node,
                    missing: *missing,
                });
            }
        }
        let graph = Self {
            listing,
            dependencies,
        };
        graph.check_acyclic()?;
        Ok(graph)
    }

    /// Nodes in listing order.
    pub fn nodes(&self) -> &[NodeId] {
        &self.listing
    }

    /// Direct dependencies of `node`.
    pub fn dependencies(&self, node: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        self.dependencies.get(&node).into_iter().flatten().copied()
    }

    /// Whether `node` is part of the graph.
    pub fn contains(&self, node: NodeId) -> bool {
        self.dependencies.contains_key(&node)
    }

    /// Number of nodes.
    pub fn len(&self) -> usize {
        self.listing.len()
    }

    /// True for a graph with no nodes.
    pub fn is_empty(&self) -> bool {
        self.listing.is_empty()
    }

    /// Three-colour depth-first search over every node.
    fn check_acyclic(&self) -> Result<(), GraphError> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            Visiting,
            Done,
        }

        let mut marks: BTreeMap<NodeId, Mark> = BTreeMap::new();
        for &root in &self.listing {
            if marks.contains_key(&root) {
                continue;
            }
            // Stack of (node, remaining dependencies).
            let mut stack: Vec<(NodeId, Vec<NodeId>)> =
                vec![(root, self.dependencies(root).collect())];
            marks.insert(root, Mark::Visiting);
            while let Some((node, pending)) = stack.last_mut() {
                let node = *node;
                match pending.pop() {
                    Some(dep) => match marks.get(&dep) {
                        Some(Mark::Visiting) => return Err(GraphError::Cycle(dep)),
                        Some(Mark::Done) => {}
                        None => {
                            marks.insert(dep, Mark::Visiting);
                            stack.push((dep, self.dependencies(dep).collect()));
                        }
                    },
                    None => {
                        marks.insert(node, Mark::Done);
                        stack.pop();
                    }
                }
            }
        }
        Ok(())
    }
}

/// Discovers every node reachable from the network's terminals.
///
/// Fails on a node that reads its own outlet and on any dependency cycle.
pub fn build_graph(network: &Network) -> Result<DependencyGraph, GraphError> {
    if network.terminals().is_empty() {
        return Err(GraphError::NoSinks);
    }

    let mut listing = Vec::new();
    let mut dependencies: BTreeMap<NodeId, BTreeSet<NodeId>> = BTreeMap::new();
    let mut seen: BTreeSet<NodeId> = network.terminals().iter().copied().collect();
    let mut remaining: VecDeque<NodeId> = network.terminals().iter().copied().collect();

    while let Some(id) = remaining.pop_front() {
        let node = network.node(id).ok_or(GraphError::MissingNode {
            from: id,
            missing: id,
        })?;
        let mut deps = BTreeSet::new();
        for (_, value) in node.inlets() {
            let Some(outlet) = value.outlet() else {
                continue;
            };
            if outlet.node == id {
                return Err(GraphError::SelfDependency(id));
            }
            if network.node(outlet.node).is_none() {
                return Err(GraphError::MissingNode {
                    from: id,
                    missing: outlet.node,
                });
            }
            deps.insert(outlet.node);
            if seen.insert(outlet.node) {
                remaining.push_back(outlet.node);
            }
        }
        listing.push(id);
        dependencies.insert(id, deps);
    }

    let graph = DependencyGraph {
        listing,
        dependencies,
    };
    graph.check_acyclic()?;
    tracing::debug!(nodes = graph.len(), "dependency graph built");
    Ok(graph)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Patch;

    fn ids(raw: &[u32]) -> BTreeSet<NodeId> {
        raw.iter().map(|&i| NodeId::new(i)).collect()
    }

    #[test]
    fn discovers_only_reachable_nodes() {
        let patch = Patch::new();
        let a = patch.sine(1.0);
        let _orphan = patch.sine(2.0);
        let sum = a + 1.0;
        let out = patch.out(sum);
        let (out, sum, a) = (out.id(), sum.id(), a.id());
        let network = patch.finish().unwrap();

        let graph = build_graph(&network).unwrap();
        assert_eq!(graph.nodes(), [out, sum, a]);
        assert_eq!(graph.dependencies(sum).collect::<Vec<_>>(), [a]);
        assert_eq!(graph.dependencies(a).count(), 0);
    }

    #[test]
    fn shared_producer_is_listed_once() {
        let patch = Patch::new();
        let a = patch.sine(1.0);
        patch.out(a);
        patch.out(a * 2.0);
        let a = a.id();
        let network = patch.finish().unwrap();
        let graph = build_graph(&network).unwrap();
        assert_eq!(graph.len(), 4);
        assert!(graph.contains(a));
    }

    #[test]
    fn cycle_through_set_input_is_detected() {
        let patch = Patch::new();
        let a = patch.add(1.0, 0.0);
        let b = patch.add(a, 1.0);
        patch.set_input(a, "in1", b);
        patch.out(b);
        let network = patch.finish().unwrap();
        assert!(matches!(build_graph(&network), Err(GraphError::Cycle(_))));
    }

    #[test]
    fn network_without_sinks_is_rejected() {
        let patch = Patch::new();
        patch.sine(1.0);
        let network = patch.finish().unwrap();
        assert_eq!(build_graph(&network), Err(GraphError::NoSinks));
    }

    #[test]
    fn explicit_entries_reject_self_and_missing() {
        let err = DependencyGraph::from_entries([(NodeId::new(0), ids(&[0]))]).unwrap_err();
        assert_eq!(err, GraphError::SelfDependency(NodeId::new(0)));

        let err = DependencyGraph::from_entries([(NodeId::new(0), ids(&[1]))]).unwrap_err();
        assert!(matches!(err, GraphError::MissingNode { .. }));
    }

    #[test]
    fn explicit_entries_reject_cycles() {
        let err = DependencyGraph::from_entries([
            (NodeId::new(0), ids(&[1])),
            (NodeId::new(1), ids(&[2])),
            (NodeId::new(2), ids(&[0])),
        ])
        .unwrap_err();
        assert!(matches!(err, GraphError::Cycle(_)));
    }
}
