use hashbrown::HashSet;

use crate::core::graph::Graph;

/// Fill-reducing elimination ordering over the symbolic node adjacency.
///
/// The adjacency is purely structural (edge presence between nodes,
/// ignoring dof-block contents); the returned permutation lists node
/// indices in elimination order, `perm[k]` being the node placed at
/// position `k`.
pub trait Ordering {
    fn compute(&self, adjacency: &[Vec<usize>]) -> Vec<usize>;
}

/// Greedy minimum-degree ordering with clique fill on elimination.
/// Ties break toward the lower node index so the order is deterministic.
#[derive(Debug, Clone, Copy, Default)]
pub struct MinimumDegree;

impl Ordering for MinimumDegree {
    fn compute(&self, adjacency: &[Vec<usize>]) -> Vec<usize> {
        let n = adjacency.len();
        let mut neighbors: Vec<HashSet<usize>> = adjacency
            .iter()
            .enumerate()
            .map(|(i, adj)| adj.iter().copied().filter(|&j| j != i).collect())
            .collect();
        let mut alive = vec![true; n];
        let mut order = Vec::with_capacity(n);

        for _ in 0..n {
            let Some(next) = (0..n)
                .filter(|&i| alive[i])
                .min_by_key(|&i| (neighbors[i].len(), i))
            else {
                break;
            };
            order.push(next);
            alive[next] = false;

            let adjacent: Vec<usize> = neighbors[next].iter().copied().collect();
            for &i in &adjacent {
                neighbors[i].remove(&next);
            }
            // eliminating a node connects its remaining neighbors
            for (k, &i) in adjacent.iter().enumerate() {
                for &j in &adjacent[k + 1..] {
                    neighbors[i].insert(j);
                    neighbors[j].insert(i);
                }
            }
        }
        order
    }
}

/// Structural node adjacency of a graph: for every node, the sorted list of
/// nodes it shares an edge with.
pub fn node_adjacency(graph: &Graph) -> Vec<Vec<usize>> {
    let mut adjacency = vec![Vec::new(); graph.nodes().len()];
    for edge in graph.edges() {
        let (a, b) = edge.nodes();
        if a != b {
            adjacency[a].push(b);
            adjacency[b].push(a);
        }
    }
    for adj in &mut adjacency {
        adj.sort_unstable();
        adj.dedup();
    }
    adjacency
}

/// Expands a node permutation to the flattened state vector, respecting
/// each node's dof block. Returns `map` with `map[old_index] = new_index`.
pub fn expand_to_state_permutation(perm: &[usize], graph: &Graph) -> Vec<usize> {
    debug_assert_eq!(perm.len(), graph.nodes().len());
    let mut block_offset = vec![0usize; perm.len()];
    let mut acc = 0;
    for &node in perm {
        block_offset[node] = acc;
        acc += graph.nodes()[node].dof();
    }
    let mut map = vec![0usize; graph.state_length()];
    for (node, n) in graph.nodes().iter().enumerate() {
        let old = graph.state_index(node);
        for d in 0..n.dof() {
            map[old + d] = block_offset[node] + d;
        }
    }
    map
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::edge::{Edge, XytEdge};
    use crate::core::node::{Node, XyNode, XytNode};
    use nalgebra::{Matrix3, Vector2, Vector3};

    fn star_graph(leaves: usize) -> Graph {
        let mut graph = Graph::new();
        for _ in 0..=leaves {
            graph.add_node(Node::Xyt(XytNode::new(Vector3::zeros())));
        }
        for leaf in 1..=leaves {
            graph
                .add_edge(Edge::Xyt(
                    XytEdge::new(0, leaf, Vector3::zeros(), Matrix3::identity()).unwrap(),
                ))
                .unwrap();
        }
        graph
    }

    #[test]
    fn minimum_degree_defers_the_hub() {
        let graph = star_graph(4);
        let order = MinimumDegree.compute(&node_adjacency(&graph));
        assert_eq!(order.len(), 5);
        // leaves have degree 1, so the hub cannot be eliminated while more
        // than one of them is left
        let hub_position = order.iter().position(|&n| n == 0).unwrap();
        assert!(hub_position >= 3, "hub eliminated too early: {:?}", order);
        let mut sorted = order.clone();
        sorted.sort_unstable();
        assert_eq!(sorted, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn state_permutation_respects_blocks() {
        let mut graph = Graph::new();
        graph.add_node(Node::Xyt(XytNode::new(Vector3::zeros())));
        graph.add_node(Node::Xy(XyNode::new(Vector2::zeros())));
        // order: node 1 first, node 0 second
        let map = expand_to_state_permutation(&[1, 0], &graph);
        assert_eq!(map, vec![2, 3, 4, 0, 1]);
    }

    #[test]
    fn adjacency_ignores_duplicates_and_direction() {
        let mut graph = star_graph(2);
        graph
            .add_edge(Edge::Xyt(
                XytEdge::new(2, 0, Vector3::zeros(), Matrix3::identity()).unwrap(),
            ))
            .unwrap();
        let adjacency = node_adjacency(&graph);
        assert_eq!(adjacency[0], vec![1, 2]);
        assert_eq!(adjacency[2], vec![0]);
    }
}
