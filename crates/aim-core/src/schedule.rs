//! Execution order.
//!
//! Starting from the graph's listing order, positions are scanned left to
//! right. When the node at position `i` has a dependency sitting later in the
//! list, that dependency is moved to position `i` and the same position is
//! checked again. Once every dependency of the node at `i` precedes it, the
//! scan advances.
//!
//! Every relocation strictly lowers one dependency's position, and the graph
//! is known to be acyclic, so the scan terminates. Ties keep their listing
//! order.

use crate::graph::DependencyGraph;
use crate::node::NodeId;

/// Orders the graph so that every node follows all of its dependencies.
pub fn execution_order(graph: &DependencyGraph) -> Vec<NodeId> {
    let mut order = graph.nodes().to_vec();
    let mut i = 0;
    while i < order.len() {
        let current = order[i];
        let late = graph
            .dependencies(current)
            .find_map(|dep| order.iter().position(|&n| n == dep).filter(|&at| at > i));
        match late {
            Some(at) => {
                let dep = order.remove(at);
                order.insert(i, dep);
            }
            None => i += 1,
        }
    }
    tracing::debug!(?order, "execution order");
    order
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Patch;
    use crate::graph::build_graph;
    use crate::node::{Input, NodeKind};

    fn position(order: &[NodeId], id: NodeId) -> usize {
        order.iter().position(|&n| n == id).unwrap()
    }

    #[test]
    fn sources_first_sink_last() {
        let patch = Patch::new();
        let a = patch.midi("default");
        let b = patch.sine(440.0);
        let c = patch.add(b, a);
        let d = patch.add(a, c);
        let out = patch.out(d);
        let (a, b, c, d, out) = (a.id(), b.id(), c.id(), d.id(), out.id());
        let network = patch.finish().unwrap();

        let order = execution_order(&build_graph(&network).unwrap());
        assert_eq!(order.len(), 5);
        let first_two = [order[0], order[1]];
        assert!(first_two.contains(&a) && first_two.contains(&b));
        assert_eq!(order[2], c);
        assert_eq!(order[3], d);
        assert_eq!(order[4], out);
    }

    #[test]
    fn nested_chain_runs_innermost_first() {
        let patch = Patch::new();
        let mut inner = patch.add(9.0, 0.0);
        for i in (0..9).rev() {
            inner = patch.add(f64::from(i), inner);
        }
        let out = patch.out(inner);
        let out = out.id();
        let network = patch.finish().unwrap();

        let order = execution_order(&build_graph(&network).unwrap());
        let firsts: Vec<f64> = order
            .iter()
            .filter_map(|&id| match network.node(id).unwrap().kind() {
                NodeKind::Math {
                    in0: Input::Number(v),
                    ..
                } => Some(*v),
                _ => None,
            })
            .collect();
        assert_eq!(firsts, (0..10).rev().map(f64::from).collect::<Vec<_>>());
        assert_eq!(*order.last().unwrap(), out);
    }

    #[test]
    fn diamond_orders_join_after_both_branches() {
        let patch = Patch::new();
        let src = patch.saw(3.0);
        let left = src * 2.0;
        let right = src + 1.0;
        let join = left - right;
        patch.out(join);
        let (src, left, right, join) = (src.id(), left.id(), right.id(), join.id());
        let network = patch.finish().unwrap();

        let order = execution_order(&build_graph(&network).unwrap());
        assert!(position(&order, src) < position(&order, left));
        assert!(position(&order, src) < position(&order, right));
        assert!(position(&order, left) < position(&order, join));
        assert!(position(&order, right) < position(&order, join));
    }
}
