use thiserror::Error;

/// Errors surfaced by graph construction, solving and persistence.
///
/// The first three variants are configuration/modeling faults: they indicate
/// a malformed problem (singular measurement covariance, an edge naming a
/// node that does not exist or has the wrong dimension, an under-constrained
/// normal system) and are never retried internally.
#[derive(Error, Debug)]
pub enum GraphError {
    #[error("measurement covariance is singular")]
    SingularCovariance,
    #[error("normal equations not positive definite (disconnected or under-constrained graph)")]
    NotPositiveDefinite,
    #[error("edge references node {0} which is not in the graph")]
    MissingNode(usize),
    #[error("node {node} has {actual} dof, edge endpoint requires {required}")]
    NodeDofMismatch {
        node: usize,
        required: usize,
        actual: usize,
    },
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed graph file: {0}")]
    Format(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, GraphError>;
