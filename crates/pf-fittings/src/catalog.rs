//! Part catalog lookup.
//!
//! A catalog carries the parts actually purchasable for a network. Routing
//! consults it for real side lengths, port extensions, and reducer bodies;
//! with no catalog every fitting falls back to diameter-proportional
//! defaults. All lookups return `None` on a miss, never an error.

use serde::{Deserialize, Serialize};

use pf_core::{Real, approx_eq};

const LOOKUP_ANGLE_TOLERANCE: Real = 1.0;
const LOOKUP_DIAMETER_TOLERANCE: Real = 1e-6;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ElbowPart {
    pub diameter: Real,
    /// Bend angle in degrees.
    pub angle: Real,
    pub side_length: Real,
    pub extension: Real,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TeePart {
    pub trunk_diameter: Real,
    pub branch_diameter: Real,
    /// Branch takeoff angle in degrees.
    pub angle: Real,
    pub trunk_distance: Real,
    pub branch_distance: Real,
    pub extension: Real,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrossPart {
    pub pipe_diameter: Real,
    pub branch_a_diameter: Real,
    pub branch_b_diameter: Real,
    /// Takeoff angles of the two side branches, in degrees.
    pub angle_a: Real,
    pub angle_b: Real,
    pub pipe_distance: Real,
    pub branch_distance: Real,
    pub extension: Real,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReducerPart {
    pub diameter_large: Real,
    pub diameter_small: Real,
    pub length: Real,
    pub extension_large: Real,
    pub extension_small: Real,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CouplerPart {
    pub diameter: Real,
    pub length: Real,
    pub extension: Real,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FittingCatalog {
    pub elbows: Vec<ElbowPart>,
    pub tees: Vec<TeePart>,
    pub crosses: Vec<CrossPart>,
    pub reducers: Vec<ReducerPart>,
    pub couplers: Vec<CouplerPart>,
    /// Available pipe diameters, sorted ascending.
    pub pipe_diameters: Vec<Real>,
}

fn angle_matches(a: Real, b: Real) -> bool {
    (a - b).abs() <= LOOKUP_ANGLE_TOLERANCE
}

fn diameter_matches(a: Real, b: Real) -> bool {
    approx_eq(a, b, LOOKUP_DIAMETER_TOLERANCE)
}

impl FittingCatalog {
    /// The first stocked diameter at or above `diameter`, else the largest
    /// stocked one.
    pub fn closest_diameter(&self, diameter: Real) -> Option<Real> {
        self.pipe_diameters
            .iter()
            .copied()
            .find(|&d| diameter_matches(d, diameter) || d > diameter)
            .or_else(|| self.pipe_diameters.last().copied())
    }

    /// Best elbow for the given diameter and bend angle. A 135 degree bend
    /// is served by a 45 degree part installed mirrored.
    pub fn best_elbow(&self, diameter: Real, angle: Real) -> Option<&ElbowPart> {
        let wanted = if angle_matches(angle, 135.0) { 45.0 } else { angle };
        self.elbows
            .iter()
            .filter(|p| angle_matches(p.angle, wanted))
            .min_by(|a, b| {
                let da = (a.diameter - diameter).abs();
                let db = (b.diameter - diameter).abs();
                da.total_cmp(&db)
            })
    }

    /// Best tee for the given trunk/branch diameters and takeoff angle.
    /// Trunk diameter wins over branch diameter when no part fits both.
    pub fn best_tee(&self, trunk: Real, branch: Real, angle: Real) -> Option<&TeePart> {
        self.tees
            .iter()
            .filter(|p| angle_matches(p.angle, angle))
            .min_by(|a, b| {
                let ta = (a.trunk_diameter - trunk).abs();
                let tb = (b.trunk_diameter - trunk).abs();
                ta.total_cmp(&tb).then_with(|| {
                    let ba = (a.branch_diameter - branch).abs();
                    let bb = (b.branch_diameter - branch).abs();
                    ba.total_cmp(&bb)
                })
            })
    }

    /// Best cross part. Side branch angles must match in order; a part that
    /// only matches with the branches swapped is reported as a miss.
    pub fn best_cross(
        &self,
        pipe: Real,
        branch_a: Real,
        branch_b: Real,
        angle_a: Real,
        angle_b: Real,
    ) -> Option<&CrossPart> {
        // a part that matches only with the angles swapped would sit
        // backwards in the tree, so it does not count
        self.crosses
            .iter()
            .filter(|p| angle_matches(p.angle_a, angle_a) && angle_matches(p.angle_b, angle_b))
            .min_by(|a, b| {
                let da = (a.pipe_diameter - pipe).abs()
                    + (a.branch_a_diameter - branch_a).abs()
                    + (a.branch_b_diameter - branch_b).abs();
                let db = (b.pipe_diameter - pipe).abs()
                    + (b.branch_a_diameter - branch_a).abs()
                    + (b.branch_b_diameter - branch_b).abs();
                da.total_cmp(&db)
            })
    }

    /// Reducer lookup needs an exact diameter pair.
    pub fn best_reducer(&self, large: Real, small: Real) -> Option<&ReducerPart> {
        self.reducers
            .iter()
            .find(|p| diameter_matches(p.diameter_large, large) && diameter_matches(p.diameter_small, small))
    }

    pub fn best_coupler(&self, diameter: Real) -> Option<&CouplerPart> {
        self.couplers
            .iter()
            .min_by(|a, b| {
                let da = (a.diameter - diameter).abs();
                let db = (b.diameter - diameter).abs();
                da.total_cmp(&db)
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog() -> FittingCatalog {
        FittingCatalog {
            elbows: vec![
                ElbowPart {
                    diameter: 0.05,
                    angle: 90.0,
                    side_length: 0.06,
                    extension: 0.02,
                },
                ElbowPart {
                    diameter: 0.05,
                    angle: 45.0,
                    side_length: 0.05,
                    extension: 0.02,
                },
            ],
            tees: vec![TeePart {
                trunk_diameter: 0.05,
                branch_diameter: 0.04,
                angle: 90.0,
                trunk_distance: 0.07,
                branch_distance: 0.06,
                extension: 0.02,
            }],
            crosses: vec![],
            reducers: vec![ReducerPart {
                diameter_large: 0.05,
                diameter_small: 0.04,
                length: 0.045,
                extension_large: 0.02,
                extension_small: 0.015,
            }],
            couplers: vec![],
            pipe_diameters: vec![0.025, 0.04, 0.05, 0.08],
        }
    }

    #[test]
    fn closest_diameter_rounds_up_then_caps() {
        let c = catalog();
        assert_eq!(c.closest_diameter(0.03), Some(0.04));
        assert_eq!(c.closest_diameter(0.05), Some(0.05));
        assert_eq!(c.closest_diameter(0.2), Some(0.08));
    }

    #[test]
    fn mirrored_elbow_serves_135_degrees() {
        let c = catalog();
        let part = c.best_elbow(0.05, 135.0).unwrap();
        assert_eq!(part.angle, 45.0);
    }

    #[test]
    fn elbow_angle_must_match() {
        let c = catalog();
        assert!(c.best_elbow(0.05, 60.0).is_none());
    }

    #[test]
    fn reducer_needs_exact_pair() {
        let c = catalog();
        assert!(c.best_reducer(0.05, 0.04).is_some());
        assert!(c.best_reducer(0.08, 0.04).is_none());
    }

    #[test]
    fn tee_prefers_trunk_diameter_match() {
        let c = catalog();
        assert!(c.best_tee(0.05, 0.04, 90.0).is_some());
        assert!(c.best_tee(0.05, 0.04, 45.0).is_none());
    }
}
