//! Hydraulic models for solving a built fitting tree.
//!
//! This crate supplies the pluggable pieces the solver in `pf-fittings`
//! iterates with: a full-flow assigner that pushes every leaf demand down
//! its trunk path, a Hazen-Williams pressure calculator with equivalent
//! length tables for fittings, and a pressure-driven demand update for
//! k-factor discharge devices.

pub mod equivalent_length;
pub mod error;
pub mod fluid;
pub mod full_flow;
pub mod hazen_williams;
pub mod update;

pub use equivalent_length::{
    c_factor_multiplier, elbow_equivalent_length, wye_equivalent_length,
};
pub use error::{AnalysisError, AnalysisResult};
pub use fluid::{DEFAULT_C_FACTOR, FluidProperties, k_factor_flow_rate};
pub use full_flow::FullFlow;
pub use hazen_williams::HazenWilliamsPressure;
pub use update::{DEFAULT_FLOW_TOLERANCE, PressureFlowUpdate};
