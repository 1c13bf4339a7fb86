//! Ports: the oriented circular openings of a fitting.
//!
//! Two ports mate when their positions coincide within the distance
//! tolerance and their directions point at each other within the angle
//! tolerance. All matching predicates are symmetric.

use serde::{Deserialize, Serialize};

use pf_core::{Pt3, Real, Tolerances, Vec3, angle_between_deg, points_close};

/// Physical extension data taken from a catalog part.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PortDimensions {
    /// How far a mating part slides over/into this port.
    pub extension: Real,
    pub body_diameter: Real,
    pub body_offset: Real,
}

impl PortDimensions {
    pub fn new(extension: Real, body_diameter: Real, body_offset: Real) -> Self {
        Self {
            extension,
            body_diameter,
            body_offset,
        }
    }
}

/// Solved hydraulic state of a port.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct FlowData {
    pub static_pressure: Real,
    pub dynamic_pressure: Real,
    pub flow_rate: Real,
    pub velocity: Real,
}

impl FlowData {
    pub fn new(static_pressure: Real, flow_rate: Real, velocity: Real, dynamic_pressure: Real) -> Self {
        Self {
            static_pressure,
            dynamic_pressure,
            flow_rate,
            velocity,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Port {
    pub position: Pt3,
    /// Unit direction pointing out of the fitting body.
    pub direction: Vec3,
    pub diameter: Real,
    pub dimensions: Option<PortDimensions>,
    pub flow: Option<FlowData>,
}

impl Port {
    pub fn new(position: Pt3, direction: Vec3, diameter: Real) -> Self {
        Self {
            position,
            direction,
            diameter,
            dimensions: None,
            flow: None,
        }
    }

    /// Positions coincide and directions point at each other.
    pub fn is_complementary(&self, other: &Port, tol: &Tolerances) -> bool {
        points_close(&self.position, &other.position, tol.distance)
            && (angle_between_deg(&self.direction, &other.direction) - 180.0).abs()
                <= tol.angle_deg
    }

    /// Positions coincide and directions agree. Used to recognize a segment
    /// port that mirrors a fitting port.
    pub fn is_identical(&self, other: &Port, tol: &Tolerances) -> bool {
        points_close(&self.position, &other.position, tol.distance)
            && angle_between_deg(&self.direction, &other.direction) <= tol.angle_deg
    }

    /// Accumulate flow rate, creating the flow record on first use.
    pub fn add_flow(&mut self, rate: Real) {
        self.flow.get_or_insert_with(FlowData::default).flow_rate += rate;
    }
}


#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn matching_predicates_are_symmetric(
            px in -10.0_f64..10.0, py in -10.0_f64..10.0, pz in -10.0_f64..10.0,
            qx in -10.0_f64..10.0, qy in -10.0_f64..10.0, qz in -10.0_f64..10.0,
            dx in -1.0_f64..1.0, dy in -1.0_f64..1.0, dz in -1.0_f64..1.0,
            ex in -1.0_f64..1.0, ey in -1.0_f64..1.0, ez in -1.0_f64..1.0,
        ) {
            let d = Vec3::new(dx, dy, dz);
            let e = Vec3::new(ex, ey, ez);
            prop_assume!(d.norm() > 1e-6 && e.norm() > 1e-6);
            let a = Port::new(Pt3::new(px, py, pz), d.normalize(), 0.05);
            let b = Port::new(Pt3::new(qx, qy, qz), e.normalize(), 0.05);
            let tol = Tolerances::default();
            prop_assert_eq!(a.is_complementary(&b, &tol), b.is_complementary(&a, &tol));
            prop_assert_eq!(a.is_identical(&b, &tol), b.is_identical(&a, &tol));
        }

        #[test]
        fn a_port_never_complements_itself(
            px in -10.0_f64..10.0, py in -10.0_f64..10.0, pz in -10.0_f64..10.0,
            dx in -1.0_f64..1.0, dy in -1.0_f64..1.0, dz in -1.0_f64..1.0,
        ) {
            let d = Vec3::new(dx, dy, dz);
            prop_assume!(d.norm() > 1e-6);
            let a = Port::new(Pt3::new(px, py, pz), d.normalize(), 0.05);
            let tol = Tolerances::default();
            prop_assert!(!a.is_complementary(&a, &tol));
            prop_assert!(a.is_identical(&a, &tol));
        }
    }
}
