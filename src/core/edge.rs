use std::cell::OnceCell;

use nalgebra::{DMatrix, DVector, Matrix2, Matrix3, Vector2, Vector3};
use serde::{Deserialize, Serialize};

use crate::core::error::{GraphError, Result};
use crate::core::graph::Graph;
use crate::core::math::{wrap_to_pi, xyt_inverse, xyt_inverse_jacobian, xyt_relative};

/// First-order expansion of one edge's residual around the current state:
/// Jacobians with respect to both endpoints, residual and weight matrix.
///
/// Buffers are dynamically sized because edge dof varies; solvers keep one
/// instance per edge and refresh it in place each iteration.
#[derive(Debug, Clone)]
pub struct Linearization {
    /// Jacobian of the residual w.r.t. endpoint `a` (dof x a.dof).
    pub ja: DMatrix<f64>,
    /// Jacobian of the residual w.r.t. endpoint `b` (dof x b.dof).
    pub jb: DMatrix<f64>,
    /// Residual `predicted - measured`, heading component wrapped.
    pub r: DVector<f64>,
    /// Weight matrix (the edge's information matrix).
    pub w: DMatrix<f64>,
}

impl Default for Linearization {
    fn default() -> Self {
        Linearization {
            ja: DMatrix::zeros(0, 0),
            jb: DMatrix::zeros(0, 0),
            r: DVector::zeros(0),
            w: DMatrix::zeros(0, 0),
        }
    }
}

/// Rigid planar constraint `(dx, dy, dtheta)` between two pose nodes:
/// the measured transform carrying endpoint `a`'s frame onto `b`'s.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct XytEdge {
    pub a: usize,
    pub b: usize,
    pub z: Vector3<f64>,
    pub truth: Option<Vector3<f64>>,
    p: Matrix3<f64>,
    #[serde(skip)]
    w: OnceCell<Matrix3<f64>>,
}

impl XytEdge {
    /// Fails with [`GraphError::SingularCovariance`] if `p` cannot be
    /// inverted; a singular measurement covariance is a modeling fault.
    pub fn new(a: usize, b: usize, z: Vector3<f64>, p: Matrix3<f64>) -> Result<Self> {
        let edge = XytEdge {
            a,
            b,
            z,
            truth: None,
            p,
            w: OnceCell::new(),
        };
        edge.information()?;
        Ok(edge)
    }

    pub fn with_truth(
        a: usize,
        b: usize,
        z: Vector3<f64>,
        p: Matrix3<f64>,
        truth: Vector3<f64>,
    ) -> Result<Self> {
        let mut edge = Self::new(a, b, z, p)?;
        edge.truth = Some(truth);
        Ok(edge)
    }

    /// Measurement covariance; immutable after construction.
    pub fn covariance(&self) -> &Matrix3<f64> {
        &self.p
    }

    /// Information matrix `P^-1`, computed once on first use.
    pub fn information(&self) -> Result<&Matrix3<f64>> {
        if let Some(w) = self.w.get() {
            return Ok(w);
        }
        let w = self
            .p
            .try_inverse()
            .ok_or(GraphError::SingularCovariance)?;
        Ok(self.w.get_or_init(|| w))
    }

    fn residual(&self, xa: &Vector3<f64>, xb: &Vector3<f64>) -> Vector3<f64> {
        let pred = xyt_relative(xa, xb);
        Vector3::new(
            pred.x - self.z.x,
            pred.y - self.z.y,
            wrap_to_pi(pred.z - self.z.z),
        )
    }

    fn jacobians(xa: &Vector3<f64>, xb: &Vector3<f64>) -> (Matrix3<f64>, Matrix3<f64>) {
        let (s, c) = xa.z.sin_cos();
        let dx = xb.x - xa.x;
        let dy = xb.y - xa.y;
        let ja = Matrix3::new(
            -c, -s, -s * dx + c * dy, //
            s, -c, -c * dx - s * dy, //
            0.0, 0.0, -1.0,
        );
        let jb = Matrix3::new(
            c, s, 0.0, //
            -s, c, 0.0, //
            0.0, 0.0, 1.0,
        );
        (ja, jb)
    }

    /// Swapped-endpoint edge with the measurement inverted through the
    /// rigid-inverse rule and covariance propagated `P' = J P J^T`.
    pub fn invert(&self) -> Result<XytEdge> {
        let j = xyt_inverse_jacobian(&self.z);
        let mut edge = XytEdge::new(self.b, self.a, xyt_inverse(&self.z), j * self.p * j.transpose())?;
        edge.truth = self.truth.as_ref().map(xyt_inverse);
        Ok(edge)
    }
}

/// Position-only constraint `(dx, dy)` between two nodes: endpoint `b`'s
/// position expressed in endpoint `a`'s frame (axis-aligned when `a`
/// carries no heading).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct XyEdge {
    pub a: usize,
    pub b: usize,
    pub z: Vector2<f64>,
    pub truth: Option<Vector2<f64>>,
    p: Matrix2<f64>,
    #[serde(skip)]
    w: OnceCell<Matrix2<f64>>,
}

impl XyEdge {
    pub fn new(a: usize, b: usize, z: Vector2<f64>, p: Matrix2<f64>) -> Result<Self> {
        let edge = XyEdge {
            a,
            b,
            z,
            truth: None,
            p,
            w: OnceCell::new(),
        };
        edge.information()?;
        Ok(edge)
    }

    pub fn with_truth(
        a: usize,
        b: usize,
        z: Vector2<f64>,
        p: Matrix2<f64>,
        truth: Vector2<f64>,
    ) -> Result<Self> {
        let mut edge = Self::new(a, b, z, p)?;
        edge.truth = Some(truth);
        Ok(edge)
    }

    pub fn covariance(&self) -> &Matrix2<f64> {
        &self.p
    }

    pub fn information(&self) -> Result<&Matrix2<f64>> {
        if let Some(w) = self.w.get() {
            return Ok(w);
        }
        let w = self
            .p
            .try_inverse()
            .ok_or(GraphError::SingularCovariance)?;
        Ok(self.w.get_or_init(|| w))
    }

    /// Swapped-endpoint edge. The inversion map is the negation; its
    /// Jacobian `-I` leaves the covariance unchanged.
    pub fn invert(&self) -> Result<XyEdge> {
        let mut edge = XyEdge::new(self.b, self.a, -self.z, self.p)?;
        edge.truth = self.truth.map(|t| -t);
        Ok(edge)
    }
}

/// A relative-measurement constraint between two nodes. Like [`Node`],
/// the concrete kinds are a closed enum with stable serde tags.
///
/// [`Node`]: crate::core::node::Node
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Edge {
    #[serde(rename = "xyt_edge")]
    Xyt(XytEdge),
    #[serde(rename = "xy_edge")]
    Xy(XyEdge),
}

impl Edge {
    /// Endpoint node indices `(a, b)`.
    pub fn nodes(&self) -> (usize, usize) {
        match self {
            Edge::Xyt(e) => (e.a, e.b),
            Edge::Xy(e) => (e.a, e.b),
        }
    }

    /// Measurement dimension.
    pub fn dof(&self) -> usize {
        match self {
            Edge::Xyt(_) => 3,
            Edge::Xy(_) => 2,
        }
    }

    pub fn z(&self) -> &[f64] {
        match self {
            Edge::Xyt(e) => e.z.as_slice(),
            Edge::Xy(e) => e.z.as_slice(),
        }
    }

    pub fn truth(&self) -> Option<&[f64]> {
        match self {
            Edge::Xyt(e) => e.truth.as_ref().map(|t| t.as_slice()),
            Edge::Xy(e) => e.truth.as_ref().map(|t| t.as_slice()),
        }
    }

    /// Forces the memoized information matrix; surfaces a singular
    /// covariance on edges that bypassed the constructors (deserialization).
    pub fn validate(&self) -> Result<()> {
        match self {
            Edge::Xyt(e) => e.information().map(|_| ()),
            Edge::Xy(e) => e.information().map(|_| ()),
        }
    }

    /// Mahalanobis distance squared between the transform implied by the
    /// endpoints' current state and the measurement.
    pub fn chi2(&self, graph: &Graph) -> Result<f64> {
        match self {
            Edge::Xyt(e) => {
                let (xa, xb) = xyt_endpoints(graph, e.a, e.b)?;
                let r = e.residual(&xa, &xb);
                Ok((r.transpose() * e.information()? * r)[0])
            }
            Edge::Xy(e) => {
                let r = xy_residual(graph, e)?;
                Ok((r.transpose() * e.information()? * r)[0])
            }
        }
    }

    /// Fills `lin` with the Jacobians, residual and weight of this edge
    /// evaluated at the endpoints' current state.
    pub fn linearize(&self, graph: &Graph, lin: &mut Linearization) -> Result<()> {
        match self {
            Edge::Xyt(e) => {
                let (xa, xb) = xyt_endpoints(graph, e.a, e.b)?;
                let (ja, jb) = XytEdge::jacobians(&xa, &xb);
                let r = e.residual(&xa, &xb);
                lin.ja.resize_mut(3, 3, 0.0);
                lin.ja.copy_from(&ja);
                lin.jb.resize_mut(3, 3, 0.0);
                lin.jb.copy_from(&jb);
                lin.r.resize_vertically_mut(3, 0.0);
                lin.r.copy_from(&r);
                lin.w.resize_mut(3, 3, 0.0);
                lin.w.copy_from(e.information()?);
                Ok(())
            }
            Edge::Xy(e) => {
                let na = graph.node(e.a)?;
                let nb = graph.node(e.b)?;
                let pa = na.position();
                let pb = nb.position();
                let ta = na.heading().unwrap_or(0.0);
                let (s, c) = ta.sin_cos();
                let dx = pb.x - pa.x;
                let dy = pb.y - pa.y;

                lin.ja.resize_mut(2, na.dof(), 0.0);
                lin.ja[(0, 0)] = -c;
                lin.ja[(0, 1)] = -s;
                lin.ja[(1, 0)] = s;
                lin.ja[(1, 1)] = -c;
                if na.dof() == 3 {
                    lin.ja[(0, 2)] = -s * dx + c * dy;
                    lin.ja[(1, 2)] = -c * dx - s * dy;
                }
                // b's heading (if any) never enters a position measurement
                lin.jb.resize_mut(2, nb.dof(), 0.0);
                lin.jb[(0, 0)] = c;
                lin.jb[(0, 1)] = s;
                lin.jb[(1, 0)] = -s;
                lin.jb[(1, 1)] = c;
                if nb.dof() == 3 {
                    lin.jb[(0, 2)] = 0.0;
                    lin.jb[(1, 2)] = 0.0;
                }

                let r = xy_residual(graph, e)?;
                lin.r.resize_vertically_mut(2, 0.0);
                lin.r.copy_from(&r);
                lin.w.resize_mut(2, 2, 0.0);
                lin.w.copy_from(e.information()?);
                Ok(())
            }
        }
    }

    /// Convenience form of [`linearize`](Self::linearize) that allocates.
    pub fn linearized(&self, graph: &Graph) -> Result<Linearization> {
        let mut lin = Linearization::default();
        self.linearize(graph, &mut lin)?;
        Ok(lin)
    }

    /// Edge with its endpoints swapped and the measurement carried through
    /// the corresponding inversion map.
    pub fn invert(&self) -> Result<Edge> {
        match self {
            Edge::Xyt(e) => Ok(Edge::Xyt(e.invert()?)),
            Edge::Xy(e) => Ok(Edge::Xy(e.invert()?)),
        }
    }
}

fn xyt_endpoints(graph: &Graph, a: usize, b: usize) -> Result<(Vector3<f64>, Vector3<f64>)> {
    let na = graph.node(a)?;
    let nb = graph.node(b)?;
    let xa = na.xyt().ok_or(GraphError::NodeDofMismatch {
        node: a,
        required: 3,
        actual: na.dof(),
    })?;
    let xb = nb.xyt().ok_or(GraphError::NodeDofMismatch {
        node: b,
        required: 3,
        actual: nb.dof(),
    })?;
    Ok((xa, xb))
}

fn xy_residual(graph: &Graph, e: &XyEdge) -> Result<Vector2<f64>> {
    let na = graph.node(e.a)?;
    let nb = graph.node(e.b)?;
    let d = nb.position() - na.position();
    let ta = na.heading().unwrap_or(0.0);
    let (s, c) = ta.sin_cos();
    let pred = Vector2::new(c * d.x + s * d.y, -s * d.x + c * d.y);
    Ok(pred - e.z)
}
