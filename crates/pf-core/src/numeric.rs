use serde::{Deserialize, Serialize};

use crate::CoreError;

/// Floating point type used throughout the system.
pub type Real = f64;

/// Geometric tolerances used when matching ports and directions.
///
/// Distances are in meters, angles in degrees.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct Tolerances {
    pub distance: Real,
    pub angle_deg: Real,
}

impl Default for Tolerances {
    fn default() -> Self {
        Self {
            distance: 1e-3,
            angle_deg: 0.1,
        }
    }
}

/// Absolute-difference comparison.
pub fn approx_eq(a: Real, b: Real, eps: Real) -> bool {
    (a - b).abs() <= eps
}

/// Round an angle to the nearest multiple of `step` degrees.
pub fn round_angle(angle_deg: Real, step: Real) -> Real {
    if step <= 0.0 {
        return angle_deg;
    }
    (angle_deg / step).round() * step
}

pub fn ensure_finite(v: Real, what: &'static str) -> Result<Real, CoreError> {
    if v.is_finite() {
        Ok(v)
    } else {
        Err(CoreError::NonFinite { what, value: v })
    }
}
