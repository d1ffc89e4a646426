//! Fast approximate initialization: for every node reachable from a
//! reference, the minimum-uncertainty composed rigid transform found by a
//! best-first search over the graph's rigid (XYT) constraints.
//!
//! This is not Dijkstra over scalar path lengths: candidates are ranked by
//! the composed covariance's goodness, and the first time a node is popped
//! its projection is final.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use nalgebra::{Matrix3, Vector3};
use nohash_hasher::{IntMap, IntSet};

use crate::core::edge::Edge;
use crate::core::error::{GraphError, Result};
use crate::core::graph::Graph;
use crate::core::math::{xyt_compose, xyt_compose_jacobians};

/// Composed rigid transform from the reference node, with its first-order
/// propagated covariance.
#[derive(Debug, Clone, PartialEq)]
pub struct XytProjection {
    pub xyt: Vector3<f64>,
    pub cov: Matrix3<f64>,
}

impl XytProjection {
    fn identity() -> Self {
        XytProjection {
            xyt: Vector3::zeros(),
            cov: Matrix3::zeros(),
        }
    }

    /// Priority of this projection: smaller covariance determinant means a
    /// better path.
    pub fn goodness(&self) -> f64 {
        1.0 / (1.0 + self.cov.determinant())
    }

    /// This projection extended by one traversed edge.
    fn through(&self, z: &Vector3<f64>, cov: &Matrix3<f64>) -> XytProjection {
        let (ja, jb) = xyt_compose_jacobians(&self.xyt, z);
        XytProjection {
            xyt: xyt_compose(&self.xyt, z),
            cov: ja * self.cov * ja.transpose() + jb * cov * jb.transpose(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ProjectionParams {
    /// Edge indices the search may not traverse (e.g. loop closures, to
    /// project along a spanning structure).
    pub forbidden_edges: IntSet<usize>,
    /// When set, the search stops as soon as all of these nodes have a
    /// finalized projection.
    pub needed_nodes: Option<IntSet<usize>>,
}

struct Candidate {
    goodness: f64,
    node: usize,
    projection: XytProjection,
}

impl PartialEq for Candidate {
    fn eq(&self, other: &Self) -> bool {
        self.goodness == other.goodness
    }
}
impl Eq for Candidate {}
impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> Ordering {
        // goodness lives in (0, 1]; NaN would mean a broken covariance
        self.goodness
            .partial_cmp(&other.goodness)
            .unwrap_or(Ordering::Equal)
    }
}

/// Best-first projection of every reachable node onto the reference frame
/// of `reference`. Nodes with no path over non-forbidden XYT edges are
/// absent from the result; callers check for missing entries.
pub fn dijkstra_projection(
    graph: &Graph,
    reference: usize,
    params: &ProjectionParams,
) -> Result<IntMap<usize, XytProjection>> {
    if reference >= graph.nodes().len() {
        return Err(GraphError::MissingNode(reference));
    }

    // rigid constraints only, bidirectional
    let mut incidence = vec![Vec::new(); graph.nodes().len()];
    for (e, edge) in graph.edges().iter().enumerate() {
        if let Edge::Xyt(_) = edge {
            let (a, b) = edge.nodes();
            incidence[a].push(e);
            if b != a {
                incidence[b].push(e);
            }
        }
    }

    let mut projections = IntMap::default();
    let mut needed = params.needed_nodes.clone();
    let mut queue = BinaryHeap::new();
    queue.push(Candidate {
        goodness: 1.0,
        node: reference,
        projection: XytProjection::identity(),
    });

    while let Some(candidate) = queue.pop() {
        if projections.contains_key(&candidate.node) {
            // already reached over a better path
            continue;
        }
        let node = candidate.node;
        projections.insert(node, candidate.projection);
        if let Some(needed) = needed.as_mut() {
            needed.remove(&node);
            if needed.is_empty() {
                break;
            }
        }

        for &e in &incidence[node] {
            if params.forbidden_edges.contains(&e) {
                continue;
            }
            let Edge::Xyt(edge) = &graph.edges()[e] else {
                continue;
            };
            let forward = edge.a == node;
            let dest = if forward { edge.b } else { edge.a };
            if projections.contains_key(&dest) {
                continue;
            }
            let projection = if forward {
                projections[&node].through(&edge.z, edge.covariance())
            } else {
                let inverted = edge.invert()?;
                projections[&node].through(&inverted.z, inverted.covariance())
            };
            queue.push(Candidate {
                goodness: projection.goodness(),
                node: dest,
                projection,
            });
        }
    }
    Ok(projections)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::edge::XytEdge;
    use crate::core::node::{Node, XytNode};
    use approx::assert_relative_eq;
    use nalgebra::Vector3;

    fn pose_at_origin() -> Node {
        Node::Xyt(XytNode::new(Vector3::zeros()))
    }

    fn tight() -> Matrix3<f64> {
        Matrix3::from_diagonal(&Vector3::new(0.01, 0.01, 0.001))
    }

    fn add_xyt(graph: &mut Graph, a: usize, b: usize, z: Vector3<f64>, p: Matrix3<f64>) -> usize {
        graph
            .add_edge(Edge::Xyt(XytEdge::new(a, b, z, p).unwrap()))
            .unwrap()
    }

    #[test]
    fn tree_projection_is_the_exact_path_composition() {
        // on a tree there is exactly one path, so the projection must be
        // the plain composition of its measurements
        let mut graph = Graph::new();
        for _ in 0..4 {
            graph.add_node(pose_at_origin());
        }
        let z1 = Vector3::new(1.0, 0.2, std::f64::consts::FRAC_PI_2);
        let z2 = Vector3::new(0.5, -0.1, 0.3);
        let z3 = Vector3::new(-0.3, 0.8, -0.7);
        add_xyt(&mut graph, 0, 1, z1, tight());
        add_xyt(&mut graph, 1, 2, z2, tight());
        add_xyt(&mut graph, 1, 3, z3, tight());

        let result = dijkstra_projection(&graph, 0, &ProjectionParams::default()).unwrap();
        assert_eq!(result.len(), 4);
        let expected2 = xyt_compose(&z1, &z2);
        let expected3 = xyt_compose(&z1, &z3);
        assert_relative_eq!((result[&1].xyt - z1).norm(), 0.0, epsilon = 1e-12);
        assert_relative_eq!((result[&2].xyt - expected2).norm(), 0.0, epsilon = 1e-12);
        assert_relative_eq!((result[&3].xyt - expected3).norm(), 0.0, epsilon = 1e-12);
        // one hop from the identity projection carries the edge covariance
        // through unchanged
        matrixcompare::assert_matrix_eq!(result[&1].cov, tight(), comp = abs, tol = 1e-12);
        // uncertainty accumulates along the path
        assert!(result[&2].cov.determinant() > result[&1].cov.determinant());
        assert!(result[&1].goodness() > result[&2].goodness());
    }

    #[test]
    fn backward_traversal_uses_the_inverted_edge() {
        let mut graph = Graph::new();
        graph.add_node(pose_at_origin());
        graph.add_node(pose_at_origin());
        let z = Vector3::new(1.0, -0.5, 0.4);
        add_xyt(&mut graph, 1, 0, z, tight());

        let result = dijkstra_projection(&graph, 0, &ProjectionParams::default()).unwrap();
        let expected = crate::core::math::xyt_inverse(&z);
        assert_relative_eq!((result[&1].xyt - expected).norm(), 0.0, epsilon = 1e-12);
    }

    #[test]
    fn forbidden_closure_reproduces_the_chain_composition() {
        // inconsistent loop: with the closing edge forbidden, nodes 1 and 2
        // must project exactly like a plain chain
        let mut graph = Graph::new();
        for _ in 0..4 {
            graph.add_node(pose_at_origin());
        }
        let step = Vector3::new(1.0, 0.0, 0.0);
        for i in 0..3 {
            add_xyt(&mut graph, i, i + 1, step, tight());
        }
        let closing = add_xyt(&mut graph, 3, 0, step, Matrix3::identity());

        let mut params = ProjectionParams::default();
        params.forbidden_edges.insert(closing);
        let result = dijkstra_projection(&graph, 0, &params).unwrap();

        assert_relative_eq!((result[&1].xyt - Vector3::new(1.0, 0.0, 0.0)).norm(), 0.0, epsilon = 1e-12);
        assert_relative_eq!((result[&2].xyt - Vector3::new(2.0, 0.0, 0.0)).norm(), 0.0, epsilon = 1e-12);
        assert_relative_eq!((result[&3].xyt - Vector3::new(3.0, 0.0, 0.0)).norm(), 0.0, epsilon = 1e-12);
    }

    #[test]
    fn loop_prefers_the_lower_uncertainty_path() {
        // two paths from 0 to 2: a tight two-hop chain and a sloppy direct
        // edge; the chain wins on goodness despite more hops
        let mut graph = Graph::new();
        for _ in 0..3 {
            graph.add_node(pose_at_origin());
        }
        let step = Vector3::new(1.0, 0.0, 0.0);
        add_xyt(&mut graph, 0, 1, step, tight());
        add_xyt(&mut graph, 1, 2, step, tight());
        add_xyt(
            &mut graph,
            0,
            2,
            Vector3::new(2.5, 0.0, 0.0),
            Matrix3::identity() * 10.0,
        );

        let result = dijkstra_projection(&graph, 0, &ProjectionParams::default()).unwrap();
        assert_relative_eq!((result[&2].xyt - Vector3::new(2.0, 0.0, 0.0)).norm(), 0.0, epsilon = 1e-12);
    }

    #[test]
    fn unreachable_nodes_are_absent() {
        let mut graph = Graph::new();
        for _ in 0..4 {
            graph.add_node(pose_at_origin());
        }
        add_xyt(&mut graph, 0, 1, Vector3::new(1.0, 0.0, 0.0), tight());
        let bridge = add_xyt(&mut graph, 1, 2, Vector3::new(1.0, 0.0, 0.0), tight());
        // node 3 has no edges at all

        let mut params = ProjectionParams::default();
        params.forbidden_edges.insert(bridge);
        let result = dijkstra_projection(&graph, 0, &params).unwrap();
        assert!(result.contains_key(&1));
        assert!(!result.contains_key(&2));
        assert!(!result.contains_key(&3));
    }

    #[test]
    fn needed_set_terminates_the_search_early() {
        let mut graph = Graph::new();
        for _ in 0..6 {
            graph.add_node(pose_at_origin());
        }
        for i in 0..5 {
            add_xyt(&mut graph, i, i + 1, Vector3::new(1.0, 0.0, 0.0), tight());
        }
        let mut params = ProjectionParams::default();
        params.needed_nodes = Some([1usize].into_iter().collect());
        let result = dijkstra_projection(&graph, 0, &params).unwrap();
        assert!(result.contains_key(&1));
        // the far end of the chain was never finalized
        assert!(!result.contains_key(&4));
        assert!(!result.contains_key(&5));
    }
}
