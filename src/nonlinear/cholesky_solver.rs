use log::debug;

use crate::core::edge::Linearization;
use crate::core::error::Result;
use crate::core::graph::Graph;
use crate::linear::ordering::{expand_to_state_permutation, node_adjacency, MinimumDegree, Ordering};
use crate::linear::sparse_cholesky::NormalEquations;
use crate::nonlinear::solver::{IterationReport, Solver};

#[derive(Debug, Clone, Copy)]
pub struct CholeskySolverParams {
    /// Nominal weight given to unconstrained state entries and to the
    /// diagonal block of node 0 (the gauge anchor).
    pub w0: f64,
    /// Extra `lambda * I` on the normal equations; zero for a plain
    /// Gauss-Newton step. The Levenberg-Marquardt wrapper drives this.
    pub damping: f64,
}

impl Default for CholeskySolverParams {
    fn default() -> Self {
        CholeskySolverParams {
            w0: 1.0,
            damping: 0.0,
        }
    }
}

/// Direct solver: each iteration assembles the Gauss-Newton normal
/// equations blockwise, factorizes them with sparse Cholesky under an
/// optional fill-reducing ordering and applies `state -= dx`.
pub struct CholeskySolver {
    pub params: CholeskySolverParams,
    ordering: Option<Box<dyn Ordering>>,
}

impl Default for CholeskySolver {
    fn default() -> Self {
        Self::new()
    }
}

impl CholeskySolver {
    /// Solver with minimum-degree ordering.
    pub fn new() -> Self {
        Self::with_ordering(MinimumDegree)
    }

    pub fn with_ordering<O: Ordering + 'static>(ordering: O) -> Self {
        CholeskySolver {
            params: CholeskySolverParams::default(),
            ordering: Some(Box::new(ordering)),
        }
    }

    /// Solver factorizing in natural node order.
    pub fn without_ordering() -> Self {
        CholeskySolver {
            params: CholeskySolverParams::default(),
            ordering: None,
        }
    }

    /// One Gauss-Newton update without the chi2 bookkeeping of
    /// [`Solver::iterate`].
    pub(crate) fn step(&self, graph: &mut Graph) -> Result<()> {
        if graph.nodes().is_empty() || graph.edges().is_empty() {
            return Ok(());
        }
        let dim = graph.state_length();

        // state-index permutation from the node ordering; assembling in
        // permuted coordinates is the same as permuting A and b afterwards
        let perm = self.ordering.as_ref().map(|ordering| {
            let node_order = ordering.compute(&node_adjacency(graph));
            expand_to_state_permutation(&node_order, graph)
        });
        let index = |i: usize| perm.as_ref().map_or(i, |p| p[i]);

        let mut sys = NormalEquations::new(dim);
        let mut lin = Linearization::default();
        for edge in graph.edges() {
            edge.linearize(graph, &mut lin)?;
            let (a, b) = edge.nodes();
            let oa = index(graph.state_index(a));
            let ob = index(graph.state_index(b));

            let wja = &lin.w * &lin.ja;
            let wjb = &lin.w * &lin.jb;
            let wr = &lin.w * &lin.r;
            let jat = lin.ja.transpose();
            let jbt = lin.jb.transpose();

            sys.add_block(oa, oa, &(&jat * &wja));
            sys.add_block(oa, ob, &(&jat * &wjb));
            sys.add_block(ob, oa, &(&jbt * &wja));
            sys.add_block(ob, ob, &(&jbt * &wjb));
            sys.add_rhs(oa, &(&jat * &wr));
            sys.add_rhs(ob, &(&jbt * &wr));
        }

        let patched = sys.condition(self.params.w0);
        if patched > 0 {
            debug!("conditioned {} unconstrained state entries", patched);
        }
        // pose graphs are defined up to a rigid transform; weighting node
        // 0's diagonal block removes the null space
        let anchor = index(graph.state_index(0));
        for d in 0..graph.nodes()[0].dof() {
            sys.add_diagonal(anchor + d, self.params.w0);
        }
        sys.add_damping(self.params.damping);

        let dx = sys.solve()?;
        let mut buf = [0.0f64; 3];
        for i in 0..graph.nodes().len() {
            let off = index(graph.state_index(i));
            let dof = graph.nodes()[i].dof();
            for (d, slot) in buf[..dof].iter_mut().enumerate() {
                *slot = dx[off + d];
            }
            graph.nodes_mut()[i].apply_delta(&buf[..dof]);
        }
        Ok(())
    }
}

impl Solver for CholeskySolver {
    fn iterate(&mut self, graph: &mut Graph) -> Result<IterationReport> {
        let chi2_before = graph.chi2()?;
        self.step(graph)?;
        let chi2 = graph.chi2()?;
        debug!("cholesky iteration: chi2 {:.6e} -> {:.6e}", chi2_before, chi2);
        Ok(IterationReport { chi2_before, chi2 })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::core::edge::{Edge, XytEdge};
    use crate::core::math::xyt_compose;
    use crate::core::node::{Node, XytNode};
    use approx::assert_relative_eq;
    use nalgebra::{Matrix3, Vector3};

    fn pose(x: f64, y: f64, t: f64) -> Node {
        Node::Xyt(XytNode::new(Vector3::new(x, y, t)))
    }

    fn xyt_edge(a: usize, b: usize, z: Vector3<f64>, p: Matrix3<f64>) -> Edge {
        Edge::Xyt(XytEdge::new(a, b, z, p).unwrap())
    }

    fn tight() -> Matrix3<f64> {
        Matrix3::from_diagonal(&Vector3::new(0.01, 0.01, 0.001))
    }

    fn solve(solver: &mut CholeskySolver, graph: &mut Graph, iterations: usize) {
        for _ in 0..iterations {
            let report = solver.iterate(graph).unwrap();
            if (report.chi2_before - report.chi2).abs() < 1e-14 {
                break;
            }
        }
    }

    /// Chain graph used across the solver tests.
    pub(crate) fn chain_graph() -> Graph {
        let mut graph = Graph::new();
        for _ in 0..3 {
            graph.add_node(pose(0.0, 0.0, 0.0));
        }
        graph
            .add_edge(xyt_edge(0, 1, Vector3::new(1.0, 0.0, 0.0), tight()))
            .unwrap();
        graph
            .add_edge(xyt_edge(1, 2, Vector3::new(1.0, 0.0, 0.0), tight()))
            .unwrap();
        graph
    }

    #[test]
    fn chain_converges_from_zero_guess() {
        let mut graph = chain_graph();
        let mut solver = CholeskySolver::new();
        solve(&mut solver, &mut graph, 20);
        let n1 = graph.node(1).unwrap().xyt().unwrap();
        let n2 = graph.node(2).unwrap().xyt().unwrap();
        assert_relative_eq!((n1 - Vector3::new(1.0, 0.0, 0.0)).norm(), 0.0, epsilon = 1e-9);
        assert_relative_eq!((n2 - Vector3::new(2.0, 0.0, 0.0)).norm(), 0.0, epsilon = 1e-9);
        assert!(graph.chi2().unwrap() < 1e-12);
    }

    /// Inconsistent square loop: the four measured displacements sum to a
    /// net translation, so the residual cannot vanish anywhere.
    pub(crate) fn inconsistent_loop() -> Graph {
        let mut graph = Graph::new();
        for i in 0..4 {
            graph.add_node(pose(i as f64, 0.0, 0.0));
        }
        for i in 0..3 {
            graph
                .add_edge(xyt_edge(i, i + 1, Vector3::new(1.0, 0.0, 0.0), tight()))
                .unwrap();
        }
        // loose closing edge claiming node 0 is one meter past node 3
        graph
            .add_edge(xyt_edge(
                3,
                0,
                Vector3::new(1.0, 0.0, 0.0),
                Matrix3::from_diagonal(&Vector3::new(1.0, 1.0, 0.1)),
            ))
            .unwrap();
        graph
    }

    #[test]
    fn loop_error_lands_on_the_loose_edge() {
        let mut graph = inconsistent_loop();
        let mut solver = CholeskySolver::new();
        solve(&mut solver, &mut graph, 30);

        let chi2 = graph.chi2().unwrap();
        assert!(chi2 > 1.0, "residual conflict must survive: {}", chi2);

        // least squares splits the 4m conflict by inverse covariance:
        // each tight edge absorbs 1/100th of what the loose one does
        let r_chain = graph.edges()[0].linearized(&graph).unwrap().r[0];
        let r_close = graph.edges()[3].linearized(&graph).unwrap().r[0];
        assert_relative_eq!(r_close / r_chain, 100.0, epsilon = 1e-6);
        assert_relative_eq!(r_chain * 3.0 + r_close, -4.0, epsilon = 1e-9);
    }

    #[test]
    fn ordering_does_not_change_the_solution() {
        let mut ordered = inconsistent_loop();
        let mut natural = inconsistent_loop();
        solve(&mut CholeskySolver::new(), &mut ordered, 30);
        solve(&mut CholeskySolver::without_ordering(), &mut natural, 30);
        for i in 0..4 {
            let a = ordered.node(i).unwrap().xyt().unwrap();
            let b = natural.node(i).unwrap().xyt().unwrap();
            assert_relative_eq!((a - b).norm(), 0.0, epsilon = 1e-9);
        }
    }

    #[test]
    fn anchored_solutions_are_gauge_related() {
        // same measurements, second graph initialized in a frame moved by
        // a rigid transform; anchored solves must differ by exactly it
        let z1 = Vector3::new(1.0, 0.0, 0.2);
        let z2 = Vector3::new(0.8, 0.1, -0.1);
        let z_direct = Vector3::new(1.9, 0.4, 0.2); // disagrees with z1+z2
        let gauge = Vector3::new(2.0, -1.0, 0.7);

        let build = |origin: Vector3<f64>| {
            let mut graph = Graph::new();
            let x0 = origin;
            let x1 = xyt_compose(&x0, &z1);
            let x2 = xyt_compose(&x1, &z2);
            for x in [x0, x1, x2] {
                graph.add_node(Node::Xyt(XytNode::new(x)));
            }
            graph.add_edge(xyt_edge(0, 1, z1, tight())).unwrap();
            graph.add_edge(xyt_edge(1, 2, z2, tight())).unwrap();
            graph.add_edge(xyt_edge(0, 2, z_direct, tight())).unwrap();
            graph
        };

        let mut at_origin = build(Vector3::zeros());
        let mut transformed = build(gauge);
        solve(&mut CholeskySolver::new(), &mut at_origin, 40);
        solve(&mut CholeskySolver::new(), &mut transformed, 40);

        for i in 0..3 {
            let a = at_origin.node(i).unwrap().xyt().unwrap();
            let b = transformed.node(i).unwrap().xyt().unwrap();
            let expected = xyt_compose(&gauge, &a);
            assert_relative_eq!((b - expected).norm(), 0.0, epsilon = 1e-6);
        }
    }

    #[test]
    fn unconstrained_nodes_do_not_break_the_factorization() {
        let mut graph = chain_graph();
        // a node nothing references; conditioning must keep A factorizable
        graph.add_node(pose(5.0, 5.0, 0.0));
        let mut solver = CholeskySolver::new();
        solve(&mut solver, &mut graph, 20);
        let drifter = graph.node(3).unwrap().xyt().unwrap();
        assert_relative_eq!((drifter - Vector3::new(5.0, 5.0, 0.0)).norm(), 0.0, epsilon = 1e-12);
        assert!(graph.chi2().unwrap() < 1e-12);
    }
}
