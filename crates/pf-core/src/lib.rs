//! pf-core: stable foundation for pipefit.
//!
//! Contains:
//! - ids (stable compact IDs for flow/fitting objects)
//! - numeric (Real + tolerances + float helpers)
//! - geometry (vector/angle helpers over nalgebra)
//! - error (shared error types)

pub mod error;
pub mod geometry;
pub mod ids;
pub mod numeric;

// Re-exports: nice ergonomics for downstream crates
pub use error::{CoreError, CoreResult};
pub use geometry::*;
pub use ids::*;
pub use numeric::*;
