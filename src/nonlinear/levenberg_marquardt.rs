use log::{debug, warn};

use crate::core::error::Result;
use crate::core::graph::Graph;
use crate::nonlinear::cholesky_solver::CholeskySolver;
use crate::nonlinear::solver::{IterationReport, Solver};

#[derive(Debug, Clone, Copy)]
pub struct LmParams {
    pub min_damping: f64,
    pub max_damping: f64,
    /// Multiplicative step for damping adjustment.
    pub scale_factor: f64,
}

impl Default for LmParams {
    fn default() -> Self {
        LmParams {
            min_damping: 1e-9,
            max_damping: 1e6,
            scale_factor: 10.0,
        }
    }
}

/// Levenberg-Marquardt control loop around [`CholeskySolver`].
///
/// Every iteration snapshots the graph, runs one damped Gauss-Newton step
/// and keeps it only if the total chi-squared did not increase. A rejected
/// step is rolled back, damping is stiffened and the step is retried once;
/// a second rejection rolls back again and leaves the stiffer damping for
/// the next call. The adopted chi-squared therefore never increases.
pub struct LmSolver {
    inner: CholeskySolver,
    pub params: LmParams,
    lambda: f64,
    last_iteration_failed: bool,
}

impl Default for LmSolver {
    fn default() -> Self {
        Self::new()
    }
}

impl LmSolver {
    pub fn new() -> Self {
        Self::with_params(LmParams::default())
    }

    pub fn with_params(params: LmParams) -> Self {
        LmSolver {
            inner: CholeskySolver::new(),
            params,
            lambda: params.min_damping,
            last_iteration_failed: false,
        }
    }

    /// Current damping value, clamped to `[min_damping, max_damping]`.
    pub fn damping(&self) -> f64 {
        self.lambda
    }

    pub fn last_iteration_failed(&self) -> bool {
        self.last_iteration_failed
    }

    fn damped_step(&mut self, graph: &mut Graph) -> Result<()> {
        self.inner.params.damping = self.lambda;
        self.inner.step(graph)
    }
}

impl Solver for LmSolver {
    fn iterate(&mut self, graph: &mut Graph) -> Result<IterationReport> {
        let snapshot = graph.clone();
        let chi2_before = graph.chi2()?;

        self.damped_step(graph)?;
        let mut chi2 = graph.chi2()?;

        if chi2 > chi2_before {
            // bad step: restore, stiffen, one bounded retry
            *graph = snapshot.clone();
            self.lambda = (self.lambda * self.params.scale_factor).min(self.params.max_damping);
            self.last_iteration_failed = true;
            debug!(
                "lm step rejected (chi2 {:.6e} -> {:.6e}), damping now {:.1e}",
                chi2_before, chi2, self.lambda
            );

            self.damped_step(graph)?;
            chi2 = graph.chi2()?;
            if chi2 > chi2_before {
                *graph = snapshot;
                chi2 = chi2_before;
                if self.lambda >= self.params.max_damping {
                    warn!("lm cannot decrease error at max damping {:.1e}", self.lambda);
                }
            }
        } else {
            self.lambda = (self.lambda / self.params.scale_factor).max(self.params.min_damping);
            self.last_iteration_failed = false;
        }

        Ok(IterationReport { chi2_before, chi2 })
    }

    /// True while the previous step had to be rolled back, i.e. "keep
    /// damping until a step succeeds". On its own that signal would never
    /// terminate on a graph no damping can improve, so it is additionally
    /// cut off once damping saturates at `max_damping`.
    fn can_iterate(&self) -> bool {
        self.last_iteration_failed && self.lambda < self.params.max_damping
    }
}
