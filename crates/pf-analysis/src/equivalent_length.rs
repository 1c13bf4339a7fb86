//! Equivalent pipe lengths for fittings.
//!
//! Lengths come from a Schedule 40 steel table and are stated for a C
//! factor of 120; a multiplier interpolated from the C factor adjusts them
//! for other roughness values.

use pf_core::Real;

use crate::error::{AnalysisError, AnalysisResult};

const C_FACTOR_MULTIPLIERS: [(Real, Real); 5] = [
    (100.0, 0.713),
    (120.0, 1.0),
    (130.0, 1.16),
    (140.0, 1.33),
    (150.0, 1.51),
];

const WYE_LENGTHS: [(Real, Real); 15] = [
    (0.015, 0.9),
    (0.020, 1.2),
    (0.025, 1.5),
    (0.032, 1.8),
    (0.040, 2.4),
    (0.050, 3.0),
    (0.065, 3.7),
    (0.080, 4.6),
    (0.090, 5.2),
    (0.100, 6.1),
    (0.125, 7.6),
    (0.150, 9.1),
    (0.200, 10.7),
    (0.250, 15.2),
    (0.300, 18.3),
];

const ELBOW_90_LENGTHS: [(Real, Real); 15] = [
    (0.015, 0.3),
    (0.020, 0.6),
    (0.025, 0.6),
    (0.032, 0.9),
    (0.040, 1.2),
    (0.050, 1.5),
    (0.065, 1.8),
    (0.080, 2.1),
    (0.090, 2.4),
    (0.100, 3.0),
    (0.125, 3.7),
    (0.150, 4.3),
    (0.200, 5.5),
    (0.250, 6.7),
    (0.300, 8.2),
];

/// Linear interpolation of the table multiplier for a C factor.
pub fn c_factor_multiplier(c_factor: Real) -> AnalysisResult<Real> {
    if !(100.0..=150.0).contains(&c_factor) {
        return Err(AnalysisError::CFactorOutOfRange(c_factor));
    }
    let mut lower = C_FACTOR_MULTIPLIERS[0];
    for &(c, m) in &C_FACTOR_MULTIPLIERS {
        if c_factor <= c {
            if (c - c_factor).abs() < 1e-12 || (c - lower.0).abs() < 1e-12 {
                return Ok(m);
            }
            return Ok(lower.1 + (c_factor - lower.0) / (c - lower.0) * (m - lower.1));
        }
        lower = (c, m);
    }
    Ok(C_FACTOR_MULTIPLIERS[C_FACTOR_MULTIPLIERS.len() - 1].1)
}

/// First table entry at or above `size`.
fn size_or_larger(size: Real, table: &[(Real, Real)]) -> AnalysisResult<Real> {
    table
        .iter()
        .find(|(d, _)| *d >= size)
        .map(|&(_, v)| v)
        .ok_or(AnalysisError::DiameterOffTable(size))
}

/// Equivalent length of a wye, looked up on its trunk diameter.
pub fn wye_equivalent_length(trunk_diameter: Real, c_factor: Real) -> AnalysisResult<Real> {
    Ok(c_factor_multiplier(c_factor)? * size_or_larger(trunk_diameter, &WYE_LENGTHS)?)
}

/// Equivalent length of a 90 degree elbow, looked up on its bore.
pub fn elbow_equivalent_length(diameter: Real, c_factor: Real) -> AnalysisResult<Real> {
    Ok(c_factor_multiplier(c_factor)? * size_or_larger(diameter, &ELBOW_90_LENGTHS)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn multiplier_hits_table_points() {
        assert!((c_factor_multiplier(120.0).unwrap() - 1.0).abs() < 1e-12);
        assert!((c_factor_multiplier(130.0).unwrap() - 1.16).abs() < 1e-12);
        assert!((c_factor_multiplier(100.0).unwrap() - 0.713).abs() < 1e-12);
    }

    #[test]
    fn multiplier_interpolates_between_points() {
        let m = c_factor_multiplier(125.0).unwrap();
        assert!((m - 1.08).abs() < 1e-12);
    }

    #[test]
    fn multiplier_rejects_out_of_range() {
        assert!(c_factor_multiplier(99.0).is_err());
        assert!(c_factor_multiplier(151.0).is_err());
    }

    #[test]
    fn lookup_rounds_up_to_next_size() {
        // 0.045 rounds up to the 0.050 row
        let len = wye_equivalent_length(0.045, 120.0).unwrap();
        assert!((len - 3.0).abs() < 1e-12);
        let len = elbow_equivalent_length(0.045, 120.0).unwrap();
        assert!((len - 1.5).abs() < 1e-12);
    }

    #[test]
    fn oversized_bore_is_an_error() {
        assert!(wye_equivalent_length(0.4, 120.0).is_err());
    }
}
