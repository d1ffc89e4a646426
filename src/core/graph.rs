use std::cell::RefCell;

use nalgebra::Vector2;
use serde::{Deserialize, Serialize};

use crate::core::edge::Edge;
use crate::core::error::{GraphError, Result};
use crate::core::math::{rigid_align_2d, wrap_to_pi};
use crate::core::node::Node;

/// Aggregate error measures of a graph, see [`Graph::error_stats`].
#[derive(Debug, Clone, Copy)]
pub struct ErrorStats {
    /// Total chi-squared over all edges.
    pub chi2: f64,
    /// `chi2` divided by the degree-of-freedom surplus of the system.
    pub chi2_normalized: f64,
    /// Mean squared position error against ground truth after rigid
    /// alignment; `None` when no node carries truth.
    pub mean_squared_distance_error: Option<f64>,
    /// Mean squared heading error against ground truth, corrected for the
    /// alignment rotation; `None` when no pose node carries truth.
    pub mean_squared_theta_error: Option<f64>,
}

/// Ordered collection of nodes and edges plus the derived layout of the
/// flattened global state vector.
///
/// Nodes and edges are only ever appended; the offset cache is extended
/// lazily as the layout of new nodes is first asked for.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Graph {
    nodes: Vec<Node>,
    edges: Vec<Edge>,
    #[serde(skip)]
    state_offsets: RefCell<Vec<usize>>,
}

impl Graph {
    pub fn new() -> Self {
        Graph::default()
    }

    /// Appends a node, returning its index.
    pub fn add_node(&mut self, node: Node) -> usize {
        self.nodes.push(node);
        self.nodes.len() - 1
    }

    /// Appends an edge after checking that both endpoints exist, have the
    /// dimension the edge expects and that the covariance is invertible.
    pub fn add_edge(&mut self, edge: Edge) -> Result<usize> {
        self.check_edge(&edge)?;
        self.edges.push(edge);
        Ok(self.edges.len() - 1)
    }

    fn check_edge(&self, edge: &Edge) -> Result<()> {
        let (a, b) = edge.nodes();
        for idx in [a, b] {
            let node = self.node(idx)?;
            if matches!(edge, Edge::Xyt(_)) && node.dof() != 3 {
                return Err(GraphError::NodeDofMismatch {
                    node: idx,
                    required: 3,
                    actual: node.dof(),
                });
            }
        }
        edge.validate()
    }

    /// Re-checks every edge; used after deserializing a stored graph.
    pub fn validate(&self) -> Result<()> {
        for edge in &self.edges {
            self.check_edge(edge)?;
        }
        Ok(())
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn nodes_mut(&mut self) -> &mut [Node] {
        &mut self.nodes
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    pub fn node(&self, index: usize) -> Result<&Node> {
        self.nodes.get(index).ok_or(GraphError::MissingNode(index))
    }

    pub fn node_mut(&mut self, index: usize) -> Result<&mut Node> {
        self.nodes
            .get_mut(index)
            .ok_or(GraphError::MissingNode(index))
    }

    /// Total dimension of the flattened state vector.
    pub fn state_length(&self) -> usize {
        if self.nodes.is_empty() {
            return 0;
        }
        let last = self.nodes.len() - 1;
        self.state_index(last) + self.nodes[last].dof()
    }

    /// Offset of a node's state within the flattened state vector.
    pub fn state_index(&self, node: usize) -> usize {
        assert!(node < self.nodes.len(), "node {} out of range", node);
        let mut offsets = self.state_offsets.borrow_mut();
        if offsets.is_empty() {
            offsets.push(0);
        }
        while offsets.len() <= node {
            let i = offsets.len();
            let next = offsets[i - 1] + self.nodes[i - 1].dof();
            offsets.push(next);
        }
        offsets[node]
    }

    /// Total chi-squared over all edges at the current state.
    pub fn chi2(&self) -> Result<f64> {
        let mut total = 0.0;
        for edge in &self.edges {
            total += edge.chi2(self)?;
        }
        Ok(total)
    }

    pub fn error_stats(&self) -> Result<ErrorStats> {
        let chi2 = self.chi2()?;
        let edge_dof: usize = self.edges.iter().map(|e| e.dof()).sum();
        let surplus = edge_dof.saturating_sub(self.state_length()).max(1);

        let mut est = Vec::new();
        let mut truth = Vec::new();
        for node in &self.nodes {
            if let Some(t) = node.truth() {
                est.push(node.position());
                truth.push(Vector2::new(t[0], t[1]));
            }
        }

        let mut mean_squared_distance_error = None;
        let mut mean_squared_theta_error = None;
        if !est.is_empty() {
            let (theta, t) = rigid_align_2d(&est, &truth);
            let (s, c) = theta.sin_cos();
            let mut dist_sq = 0.0;
            for (p, q) in est.iter().zip(&truth) {
                let aligned = Vector2::new(c * p.x - s * p.y + t.x, s * p.x + c * p.y + t.y);
                dist_sq += (aligned - q).norm_squared();
            }
            mean_squared_distance_error = Some(dist_sq / est.len() as f64);

            let mut theta_sq = 0.0;
            let mut theta_n = 0usize;
            for node in &self.nodes {
                if let (Some(h), Some(tr)) = (node.heading(), node.truth()) {
                    if tr.len() == 3 {
                        let err = wrap_to_pi(h + theta - tr[2]);
                        theta_sq += err * err;
                        theta_n += 1;
                    }
                }
            }
            if theta_n > 0 {
                mean_squared_theta_error = Some(theta_sq / theta_n as f64);
            }
        }

        Ok(ErrorStats {
            chi2,
            chi2_normalized: chi2 / surplus as f64,
            mean_squared_distance_error,
            mean_squared_theta_error,
        })
    }
}
