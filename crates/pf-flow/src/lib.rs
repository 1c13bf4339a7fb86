//! pf-flow: the abstract flow tree.
//!
//! A flow tree is the design-intent side of a piping network: nodes in
//! space joined by sized, directed connections, with exactly one outlet.
//! Loop-marked connections close cycles without breaking the tree shape
//! that the rest of the pipeline assumes.
//!
//! Sections group maximal unbranched runs of connections under durable
//! string keys ("0" is the trunk section, "0,1" the second branch into
//! its far junction, and so on).

pub mod error;
pub mod sections;
pub mod tree;

pub use error::{FlowError, FlowResult};
pub use sections::Section;
pub use tree::{Connection, FlowNode, FlowTree, NodeKind};
