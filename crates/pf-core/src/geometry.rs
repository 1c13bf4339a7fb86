//! Small vector helpers shared by the flow and fitting crates.

use nalgebra::{Point3, Unit, Vector3};

use crate::{CoreError, Real};

pub type Pt3 = Point3<Real>;
pub type Vec3 = Vector3<Real>;

/// Normalize, failing on (near) zero-length input.
pub fn unitized(v: Vec3, what: &'static str) -> Result<Unit<Vec3>, CoreError> {
    Unit::try_new(v, 1e-12).ok_or(CoreError::ZeroVector { what })
}

/// Angle between two vectors in degrees, in [0, 180].
pub fn angle_between_deg(a: &Vec3, b: &Vec3) -> Real {
    let denom = a.norm() * b.norm();
    if denom <= 0.0 {
        return 0.0;
    }
    let cos = (a.dot(b) / denom).clamp(-1.0, 1.0);
    cos.acos().to_degrees()
}

pub fn points_close(a: &Pt3, b: &Pt3, tol: Real) -> bool {
    (a - b).norm() <= tol
}

/// Directions parallel within an angular tolerance (same orientation).
pub fn directions_parallel(a: &Vec3, b: &Vec3, angle_tol_deg: Real) -> bool {
    angle_between_deg(a, b) <= angle_tol_deg
}

/// Directions antiparallel within an angular tolerance.
pub fn directions_opposed(a: &Vec3, b: &Vec3, angle_tol_deg: Real) -> bool {
    (angle_between_deg(a, b) - 180.0).abs() <= angle_tol_deg
}

/// Distance from a point to the segment [a, b].
pub fn distance_to_segment(p: &Pt3, a: &Pt3, b: &Pt3) -> Real {
    let ab = b - a;
    let len2 = ab.norm_squared();
    if len2 <= 0.0 {
        return (p - a).norm();
    }
    let t = ((p - a).dot(&ab) / len2).clamp(0.0, 1.0);
    let closest = a + ab * t;
    (p - closest).norm()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn angle_between_axes() {
        let x = Vec3::x();
        let y = Vec3::y();
        assert!((angle_between_deg(&x, &y) - 90.0).abs() < 1e-9);
        assert!((angle_between_deg(&x, &-x) - 180.0).abs() < 1e-9);
        assert!(angle_between_deg(&x, &x).abs() < 1e-9);
    }

    #[test]
    fn opposed_within_tolerance() {
        let x = Vec3::x();
        let almost = Vec3::new(-1.0, 0.001, 0.0);
        assert!(directions_opposed(&x, &-x, 0.1));
        assert!(directions_opposed(&x, &almost, 0.1));
        assert!(!directions_opposed(&x, &Vec3::y(), 0.1));
    }

    #[test]
    fn segment_distance() {
        let a = Pt3::origin();
        let b = Pt3::new(2.0, 0.0, 0.0);
        assert!((distance_to_segment(&Pt3::new(1.0, 1.0, 0.0), &a, &b) - 1.0).abs() < 1e-12);
        // beyond the end clamps to the endpoint
        assert!((distance_to_segment(&Pt3::new(3.0, 0.0, 0.0), &a, &b) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn unitized_rejects_zero() {
        assert!(unitized(Vec3::zeros(), "test").is_err());
        let u = unitized(Vec3::new(0.0, 3.0, 0.0), "test").unwrap();
        assert!((u.as_ref() - Vec3::y()).norm() < 1e-12);
    }
}
