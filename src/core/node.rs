use std::collections::BTreeMap;

use nalgebra::{Vector2, Vector3};
use serde::{Deserialize, Serialize};

use crate::core::math::wrap_to_pi;

/// Named payload attached to a node (raw scan points, debug labels, ...).
///
/// Attributes are carried for persistence and debugging only; no solver
/// reads them. The serde tag doubles as the codec identifier, so a stored
/// graph stays self-describing without reflective type lookup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "codec", content = "value", rename_all = "snake_case")]
pub enum AttributeValue {
    Doubles(Vec<f64>),
    Integers(Vec<i64>),
    Text(String),
    Bytes(Vec<u8>),
}

pub type Attributes = BTreeMap<String, AttributeValue>;

/// Planar pose variable: `(x, y, heading)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct XytNode {
    /// Current estimate, updated in place by the solvers.
    pub state: Vector3<f64>,
    init: Vector3<f64>,
    pub truth: Option<Vector3<f64>>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: Attributes,
}

impl XytNode {
    pub fn new(init: Vector3<f64>) -> Self {
        XytNode {
            state: init,
            init,
            truth: None,
            attributes: Attributes::new(),
        }
    }

    pub fn with_truth(init: Vector3<f64>, truth: Vector3<f64>) -> Self {
        XytNode {
            truth: Some(truth),
            ..Self::new(init)
        }
    }

    /// Initial estimate at creation time; never changes afterwards.
    pub fn init(&self) -> &Vector3<f64> {
        &self.init
    }
}

/// Planar point variable: `(x, y)`, e.g. a landmark.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct XyNode {
    pub state: Vector2<f64>,
    init: Vector2<f64>,
    pub truth: Option<Vector2<f64>>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: Attributes,
}

impl XyNode {
    pub fn new(init: Vector2<f64>) -> Self {
        XyNode {
            state: init,
            init,
            truth: None,
            attributes: Attributes::new(),
        }
    }

    pub fn with_truth(init: Vector2<f64>, truth: Vector2<f64>) -> Self {
        XyNode {
            truth: Some(truth),
            ..Self::new(init)
        }
    }

    pub fn init(&self) -> &Vector2<f64> {
        &self.init
    }
}

/// A latent variable of the graph. Concrete kinds are a closed enum; the
/// serde tag is the stable name each kind is stored under.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Node {
    #[serde(rename = "xyt_node")]
    Xyt(XytNode),
    #[serde(rename = "xy_node")]
    Xy(XyNode),
}

impl Node {
    pub fn dof(&self) -> usize {
        match self {
            Node::Xyt(_) => 3,
            Node::Xy(_) => 2,
        }
    }

    pub fn state(&self) -> &[f64] {
        match self {
            Node::Xyt(n) => n.state.as_slice(),
            Node::Xy(n) => n.state.as_slice(),
        }
    }

    pub fn init(&self) -> &[f64] {
        match self {
            Node::Xyt(n) => n.init().as_slice(),
            Node::Xy(n) => n.init().as_slice(),
        }
    }

    pub fn truth(&self) -> Option<&[f64]> {
        match self {
            Node::Xyt(n) => n.truth.as_ref().map(|t| t.as_slice()),
            Node::Xy(n) => n.truth.as_ref().map(|t| t.as_slice()),
        }
    }

    pub fn position(&self) -> Vector2<f64> {
        match self {
            Node::Xyt(n) => n.state.xy(),
            Node::Xy(n) => n.state,
        }
    }

    /// Heading component, for kinds that carry one.
    pub fn heading(&self) -> Option<f64> {
        match self {
            Node::Xyt(n) => Some(n.state.z),
            Node::Xy(_) => None,
        }
    }

    /// Full planar pose, for kinds whose state is one.
    pub fn xyt(&self) -> Option<Vector3<f64>> {
        match self {
            Node::Xyt(n) => Some(n.state),
            Node::Xy(_) => None,
        }
    }

    pub fn attributes(&self) -> &Attributes {
        match self {
            Node::Xyt(n) => &n.attributes,
            Node::Xy(n) => &n.attributes,
        }
    }

    pub fn attributes_mut(&mut self) -> &mut Attributes {
        match self {
            Node::Xyt(n) => &mut n.attributes,
            Node::Xy(n) => &mut n.attributes,
        }
    }

    /// Gauss-Newton style update `state -= dx`, re-wrapping the heading.
    /// `dx` length must equal `dof()`.
    pub fn apply_delta(&mut self, dx: &[f64]) {
        debug_assert_eq!(dx.len(), self.dof());
        match self {
            Node::Xyt(n) => {
                n.state.x -= dx[0];
                n.state.y -= dx[1];
                n.state.z = wrap_to_pi(n.state.z - dx[2]);
            }
            Node::Xy(n) => {
                n.state.x -= dx[0];
                n.state.y -= dx[1];
            }
        }
    }

    /// Overwrites the state estimate. `state` length must equal `dof()`.
    pub fn set_state(&mut self, state: &[f64]) {
        debug_assert_eq!(state.len(), self.dof());
        match self {
            Node::Xyt(n) => n.state = Vector3::from_column_slice(state),
            Node::Xy(n) => n.state = Vector2::from_column_slice(state),
        }
    }
}
