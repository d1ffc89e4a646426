use log::debug;

use crate::core::edge::Linearization;
use crate::core::error::{GraphError, Result};
use crate::core::graph::Graph;
use crate::nonlinear::solver::{IterationReport, Solver};

#[derive(Debug, Clone, Copy)]
pub struct GaussSeidelParams {
    /// Nominal weight for per-node state entries no incident edge
    /// constrains (same conditioning rule as the direct solver).
    pub w0: f64,
}

impl Default for GaussSeidelParams {
    fn default() -> Self {
        GaussSeidelParams { w0: 1.0 }
    }
}

/// Relaxation solver: every sweep visits the nodes in index order and
/// solves each node's small normal system against the latest state of its
/// neighbors, applying the update immediately.
///
/// Node 0 is the pinned gauge reference and is never moved; without that
/// the sweep would drift freely along the graph's rigid-transform null
/// space. There is no built-in convergence detection
/// ([`can_iterate`](Solver::can_iterate) stays true); callers stop on an
/// iteration budget or a chi-squared plateau.
///
/// Incidence lists and one linearization buffer per edge are built lazily
/// and extended as the graph grows, so a front-end can interleave appends
/// with sweeps without rebuilding the solver.
pub struct GaussSeidelSolver {
    pub params: GaussSeidelParams,
    /// edge indices incident to each node
    incidence: Vec<Vec<usize>>,
    edges_seen: usize,
    /// pooled per-edge buffers, refreshed in place on every relaxation
    linearizations: Vec<Linearization>,
    jtwj: nalgebra::DMatrix<f64>,
    jtwr: nalgebra::DVector<f64>,
}

impl Default for GaussSeidelSolver {
    fn default() -> Self {
        Self::new()
    }
}

impl GaussSeidelSolver {
    pub fn new() -> Self {
        GaussSeidelSolver {
            params: GaussSeidelParams::default(),
            incidence: Vec::new(),
            edges_seen: 0,
            linearizations: Vec::new(),
            jtwj: nalgebra::DMatrix::zeros(0, 0),
            jtwr: nalgebra::DVector::zeros(0),
        }
    }

    fn sync(&mut self, graph: &Graph) {
        while self.incidence.len() < graph.nodes().len() {
            self.incidence.push(Vec::new());
        }
        for e in self.edges_seen..graph.edges().len() {
            let (a, b) = graph.edges()[e].nodes();
            self.incidence[a].push(e);
            if b != a {
                self.incidence[b].push(e);
            }
            self.linearizations.push(Linearization::default());
        }
        self.edges_seen = graph.edges().len();
    }

    /// Re-solves node `i` with all of its neighbors held fixed.
    fn relax_node(&mut self, graph: &mut Graph, i: usize) -> Result<()> {
        if i == 0 || self.incidence[i].is_empty() {
            return Ok(());
        }
        let dof = graph.nodes()[i].dof();
        self.jtwj.resize_mut(dof, dof, 0.0);
        self.jtwj.fill(0.0);
        self.jtwr.resize_vertically_mut(dof, 0.0);
        self.jtwr.fill(0.0);

        for k in 0..self.incidence[i].len() {
            let e = self.incidence[i][k];
            let edge = &graph.edges()[e];
            let lin = &mut self.linearizations[e];
            edge.linearize(graph, lin)?;
            let (a, _) = edge.nodes();
            let j = if a == i { &lin.ja } else { &lin.jb };
            self.jtwj += j.transpose() * (&lin.w * j);
            self.jtwr += j.transpose() * (&lin.w * &lin.r);
        }

        for d in 0..dof {
            if self.jtwj[(d, d)] == 0.0 {
                self.jtwj[(d, d)] = self.params.w0;
            }
        }
        let inv = self
            .jtwj
            .clone()
            .try_inverse()
            .ok_or(GraphError::NotPositiveDefinite)?;
        let dx = inv * &self.jtwr;
        graph.nodes_mut()[i].apply_delta(dx.as_slice());
        Ok(())
    }
}

impl Solver for GaussSeidelSolver {
    fn iterate(&mut self, graph: &mut Graph) -> Result<IterationReport> {
        self.sync(graph);
        let chi2_before = graph.chi2()?;
        for i in 0..graph.nodes().len() {
            self.relax_node(graph, i)?;
        }
        let chi2 = graph.chi2()?;
        debug!("gauss-seidel sweep: chi2 {:.6e} -> {:.6e}", chi2_before, chi2);
        Ok(IterationReport { chi2_before, chi2 })
    }
}
