pub use crate::{
    core::{
        edge::{Edge, Linearization, XyEdge, XytEdge},
        error::{GraphError, Result},
        graph::{ErrorStats, Graph},
        math::wrap_to_pi,
        node::{AttributeValue, Node, XyNode, XytNode},
    },
    linear::ordering::{MinimumDegree, Ordering},
    nonlinear::{
        cholesky_solver::{CholeskySolver, CholeskySolverParams},
        gauss_seidel::{GaussSeidelParams, GaussSeidelSolver},
        levenberg_marquardt::{LmParams, LmSolver},
        solver::{IterationReport, Solver},
    },
    projection::{dijkstra_projection, ProjectionParams, XytProjection},
};
