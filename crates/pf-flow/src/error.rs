use pf_core::NodeId;
use thiserror::Error;

pub type FlowResult<T> = Result<T, FlowError>;

#[derive(Error, Debug)]
pub enum FlowError {
    #[error("Tree has no outlet node")]
    NoOutlet,

    #[error("Tree already has an outlet node")]
    OutletExists,

    #[error("Unknown node {0}")]
    UnknownNode(NodeId),

    #[error("Connection endpoints are the same node {0}")]
    SelfConnection(NodeId),

    #[error("Section key {0:?} not found")]
    UnknownSection(String),
}
