//! Error types for fitting synthesis.
//!
//! Fatal problems are `FittingError` and propagate with `?`. Recoverable
//! problems (a node the routing cannot fit, a gap no straight run can span,
//! a section that cannot be labeled) are plain records collected into a
//! `BuildReport` so one bad branch does not discard the rest of the network.

use pf_core::{CompId, CoreError, NodeId, Pt3, Real};
use pf_flow::FlowError;
use thiserror::Error;

pub type FittingResult<T> = Result<T, FittingError>;

#[derive(Error, Debug)]
pub enum FittingError {
    #[error("Cannot make connection at ({x:.3}, {y:.3}, {z:.3}): {reason}")]
    CannotMakeConnection {
        reason: String,
        x: Real,
        y: Real,
        z: Real,
    },

    #[error("No fitting layout for a node with {incoming} incoming and {outgoing} outgoing connections")]
    UnsupportedTopology { incoming: usize, outgoing: usize },

    #[error("Branch angle {angle:.1} deg is not in the allowed set")]
    UnsupportedBranchAngle { angle: Real },

    #[error("Component {0} is not in the tree")]
    MissingComponent(CompId),

    #[error("Flow node {0} has no outgoing connection")]
    MissingOutgoing(NodeId),

    #[error("Absorbed nodes on the branch side are not supported")]
    BranchSideAbsorbed,

    #[error("Coincident ports have different diameters ({a} vs {b})")]
    CoincidentDiameterMismatch { a: Real, b: Real },

    #[error("{what}")]
    LinkInvariant { what: String },

    #[error("{what}")]
    BadOperation { what: String },

    #[error("Pipe is too short: {available:.4} m left for a {needed:.4} m insert")]
    PipeTooShort { needed: Real, available: Real },

    #[error(transparent)]
    Flow(#[from] FlowError),

    #[error(transparent)]
    Serde(#[from] serde_json::Error),

    #[error(transparent)]
    Core(#[from] CoreError),
}

impl FittingError {
    pub fn cannot_connect(reason: impl Into<String>, at: Pt3) -> Self {
        FittingError::CannotMakeConnection {
            reason: reason.into(),
            x: at.x,
            y: at.y,
            z: at.z,
        }
    }
}

/// A node the routing could not turn into a fitting.
#[derive(Debug, Clone)]
pub struct ConnectionFailure {
    pub node: NodeId,
    pub position: Pt3,
    pub reason: String,
}

/// A branch-side port that could not be joined by a straight run.
///
/// `end` is the best candidate port on the other side, when one was found.
#[derive(Debug, Clone)]
pub struct SegmentFailure {
    pub component: CompId,
    pub start: Pt3,
    pub end: Option<Pt3>,
}

/// A section whose components could not be put in a linear order.
#[derive(Debug, Clone)]
pub struct LabelingFailure {
    pub section_key: String,
    pub reason: String,
}

/// Everything recoverable that went wrong during a build.
#[derive(Debug, Default)]
pub struct BuildReport {
    pub connection_failures: Vec<ConnectionFailure>,
    pub segment_failures: Vec<SegmentFailure>,
    pub labeling_failures: Vec<LabelingFailure>,
    pub solver_failures: Vec<String>,
}

impl BuildReport {
    pub fn is_clean(&self) -> bool {
        self.connection_failures.is_empty()
            && self.segment_failures.is_empty()
            && self.labeling_failures.is_empty()
            && self.solver_failures.is_empty()
    }
}
