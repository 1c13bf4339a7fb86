//! Fluid properties and the basic hydraulic formulas.
//!
//! Everything is SI: metres, m^3/s, Pa. The defaults describe water at
//! roughly room temperature.

use std::f64::consts::PI;

use serde::{Deserialize, Serialize};

use pf_core::Real;

/// Default Hazen-Williams roughness coefficient for the pipes we size.
pub const DEFAULT_C_FACTOR: Real = 130.0;

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct FluidProperties {
    /// Density in kg/m^3.
    pub rho: Real,
    /// Dynamic viscosity in Pa*s.
    pub mu: Real,
    /// Acceleration due to gravity in m/s^2.
    pub gravity: Real,
    /// Interior roughness of the pipe wall in mm.
    pub wall_roughness: Real,
}

impl Default for FluidProperties {
    fn default() -> Self {
        Self {
            rho: 1000.0,
            mu: 0.001,
            gravity: 9.81,
            wall_roughness: 0.025,
        }
    }
}

impl FluidProperties {
    /// Hydrostatic pressure change over an elevation difference.
    pub fn static_gain(&self, height_delta: Real) -> Real {
        self.rho * self.gravity * height_delta
    }

    /// Mean velocity of a full circular pipe.
    pub fn velocity(&self, flow_rate: Real, diameter: Real) -> Real {
        if diameter <= 0.0 {
            return 0.0;
        }
        flow_rate / (PI * diameter * diameter / 4.0)
    }

    pub fn dynamic_pressure(&self, velocity: Real) -> Real {
        0.5 * self.rho * velocity * velocity
    }

    /// Hazen-Williams pressure drop per metre of pipe, in Pa/m.
    pub fn hazen_williams_drop(&self, c_factor: Real, flow_rate: Real, diameter: Real) -> Real {
        if flow_rate <= 0.0 || diameter <= 0.0 {
            return 0.0;
        }
        let slope =
            10.67 * flow_rate.powf(1.852) / (c_factor.powf(1.852) * diameter.powf(4.8704));
        self.rho * self.gravity * slope
    }
}

/// Discharge through a k-factor orifice at the given static pressure.
pub fn k_factor_flow_rate(pressure: Real, k_factor: Real) -> Real {
    if pressure <= 0.0 {
        return 0.0;
    }
    k_factor * pressure.sqrt()
}


#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn drop_grows_with_flow(
            q1 in 1e-5_f64..0.1, q2 in 1e-5_f64..0.1, d in 0.01_f64..0.3,
        ) {
            let f = FluidProperties::default();
            let lo = q1.min(q2);
            let hi = q1.max(q2);
            let drop_lo = f.hazen_williams_drop(DEFAULT_C_FACTOR, lo, d);
            let drop_hi = f.hazen_williams_drop(DEFAULT_C_FACTOR, hi, d);
            prop_assert!(drop_lo <= drop_hi);
        }

        #[test]
        fn drop_shrinks_with_bore(
            q in 1e-5_f64..0.1, d1 in 0.01_f64..0.3, d2 in 0.01_f64..0.3,
        ) {
            let f = FluidProperties::default();
            let narrow = d1.min(d2);
            let wide = d1.max(d2);
            prop_assert!(
                f.hazen_williams_drop(DEFAULT_C_FACTOR, q, wide)
                    <= f.hazen_williams_drop(DEFAULT_C_FACTOR, q, narrow)
            );
        }
    }
}
