//! pf-fittings: lowering a flow tree into a physical fitting network.
//!
//! The build pipeline walks a [`pf_flow::FlowTree`] from the outlet outward,
//! picks a fitting for each node from its local topology, joins the fitting
//! ports with straight runs and reducers, balances residual port offsets
//! into terminal shifts, and labels the result section by section. The
//! output is a [`FittingTree`]: an arena of linked components addressable
//! by stable handles and by (section key, index).
//!
//! Recoverable problems during a build are collected into a
//! [`BuildReport`]; only structural failures abort with a
//! [`FittingError`].

pub mod arena;
pub mod builder;
pub mod catalog;
pub mod component;
pub mod edit;
pub mod error;
pub mod export;
pub mod locator;
pub mod piping;
pub mod port;
pub mod routing;
pub mod sections;
pub mod shift;
pub mod solve;

pub use arena::{FittingTree, PortRef};
pub use builder::{BuildOptions, build};
pub use catalog::{
    CouplerPart, CrossPart, ElbowPart, FittingCatalog, ReducerPart, TeePart,
};
pub use component::{Body, Component};
pub use error::{
    BuildReport, ConnectionFailure, FittingError, FittingResult, LabelingFailure,
    SegmentFailure,
};
pub use export::{from_json, to_dot, to_json};
pub use locator::FittingLocator;
pub use port::{FlowData, Port, PortDimensions};
pub use routing::{FittingTreeRouting, NodeRouter, RoutedNode};
pub use sections::{assign_labels, check_labeling};
pub use shift::{PendingShift, ShiftDirection};
pub use solve::{
    BranchDelta, FlowAssigner, FlowDirection, LeafFlowUpdate, PressureCalculator,
    PressureDelta, SolveOutcome, assign_port_pressures, solve,
};
