//! Hazen-Williams pressure deltas, assuming full-bore flow.

use pf_core::{Real, approx_eq};
use pf_flow::{FlowTree, NodeKind};
use pf_fittings::solve::{BranchDelta, PressureCalculator, PressureDelta};
use pf_fittings::{Body, Component, FittingResult, FittingTree, Port};

use crate::equivalent_length;
use crate::fluid::{DEFAULT_C_FACTOR, FluidProperties};

/// Pressure calculator using the Hazen-Williams head loss formula with
/// equivalent lengths for fittings.
#[derive(Debug, Clone, Copy)]
pub struct HazenWilliamsPressure {
    pub c_factor: Real,
    pub fluid: FluidProperties,
}

impl Default for HazenWilliamsPressure {
    fn default() -> Self {
        Self {
            c_factor: DEFAULT_C_FACTOR,
            fluid: FluidProperties::default(),
        }
    }
}

impl HazenWilliamsPressure {
    pub fn with_c_factor(c_factor: Real) -> Self {
        Self {
            c_factor,
            ..Self::default()
        }
    }

    fn rate(port: &Port) -> Real {
        port.flow.map_or(0.0, |f| f.flow_rate)
    }

    /// Delta for one flow path: a loss over an effective length plus the
    /// hydrostatic gain of the elevation change.
    fn path(
        &self,
        flow_rate: Real,
        diameter: Real,
        effective_length: Real,
        height_delta: Real,
    ) -> BranchDelta {
        let velocity = self.fluid.velocity(flow_rate, diameter);
        BranchDelta {
            loss: self.fluid.hazen_williams_drop(self.c_factor, flow_rate, diameter)
                * effective_length,
            static_gain: self.fluid.static_gain(height_delta),
            flow_rate,
            velocity,
            dynamic_pressure: self.fluid.dynamic_pressure(velocity),
        }
    }
}

/// Fittings without a table entry count as two metres of straight pipe.
const GENERIC_FITTING_LENGTH: Real = 2.0;
/// A leaf terminal counts as half a metre of its connecting pipe.
const TERMINAL_LENGTH: Real = 0.5;

impl PressureCalculator for HazenWilliamsPressure {
    fn delta_for(
        &self,
        tree: &FittingTree,
        flow: &FlowTree,
        component: &Component,
    ) -> FittingResult<Option<PressureDelta>> {
        let delta = match &component.body {
            Body::Straight(s) => PressureDelta::single(self.path(
                Self::rate(&s.end),
                s.diameter,
                component.body.length(),
                s.start.position.z - s.end.position.z,
            )),
            Body::Coupler(c) => PressureDelta::single(self.path(
                Self::rate(&c.end),
                c.diameter,
                component.body.length(),
                c.start.position.z - c.end.position.z,
            )),
            Body::Elbow(e) => {
                let effective = if approx_eq(e.angle, 90.0, tree.tolerances().angle_deg) {
                    equivalent_length::elbow_equivalent_length(e.end.diameter, self.c_factor)?
                } else {
                    GENERIC_FITTING_LENGTH
                };
                PressureDelta::single(self.path(
                    Self::rate(&e.end),
                    e.end.diameter,
                    effective,
                    e.start.position.z - e.end.position.z,
                ))
            }
            Body::Reducer(r) => PressureDelta::single(self.path(
                Self::rate(&r.end),
                r.end.diameter,
                GENERIC_FITTING_LENGTH,
                r.start.position.z - r.end.position.z,
            )),
            Body::Terminal(t) => {
                if component.trunk.is_none() {
                    // the outlet pins the static pressure for the sweep
                    let fixed = t
                        .node
                        .and_then(|n| flow.node(n))
                        .and_then(|n| match n.kind {
                            NodeKind::Trunk { fixed_pressure } => Some(fixed_pressure),
                            _ => None,
                        })
                        .unwrap_or(0.0);
                    let mut delta = PressureDelta::single(self.path(
                        Self::rate(&t.port),
                        t.port.diameter,
                        0.0,
                        t.port.position.z - t.position.z,
                    ));
                    delta.fixed_pressure = Some(fixed);
                    delta
                } else {
                    PressureDelta::single(self.path(
                        Self::rate(&t.port),
                        t.port.diameter,
                        TERMINAL_LENGTH,
                        -(t.port.position.z - t.position.z),
                    ))
                }
            }
            Body::Wye(w) => {
                let effective =
                    equivalent_length::wye_equivalent_length(w.trunk.diameter, self.c_factor)?;
                // main path loss runs on the trunk flow; side path on its own
                let mut main = self.path(
                    Self::rate(&w.trunk),
                    w.trunk.diameter,
                    effective,
                    w.main_branch.position.z - w.trunk.position.z,
                );
                main.flow_rate = Self::rate(&w.main_branch);
                main.velocity = self.fluid.velocity(main.flow_rate, w.main_branch.diameter);
                main.dynamic_pressure = self.fluid.dynamic_pressure(main.velocity);
                let side = self.path(
                    Self::rate(&w.side_branch),
                    w.side_branch.diameter,
                    effective,
                    w.side_branch.position.z - w.trunk.position.z,
                );
                PressureDelta {
                    branches: vec![main, side],
                    fixed_pressure: None,
                }
            }
            Body::Cross(c) => {
                let branches = [&c.branch_a, &c.branch_b, &c.branch_c]
                    .into_iter()
                    .map(|b| {
                        self.path(
                            Self::rate(b),
                            b.diameter,
                            GENERIC_FITTING_LENGTH,
                            b.position.z - c.trunk.position.z,
                        )
                    })
                    .collect();
                PressureDelta {
                    branches,
                    fixed_pressure: None,
                }
            }
            Body::Manifold(m) => {
                let trunk_length = (m.trunk.position - m.position).norm();
                let branches = m
                    .branches
                    .iter()
                    .map(|b| {
                        let length = (b.position - m.position).norm() + trunk_length;
                        self.path(
                            Self::rate(b),
                            b.diameter,
                            length,
                            b.position.z - m.trunk.position.z,
                        )
                    })
                    .collect();
                PressureDelta {
                    branches,
                    fixed_pressure: None,
                }
            }
            Body::Assembly(_) => return Ok(None),
        };
        Ok(Some(delta))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pf_core::{Pt3, Tolerances, Vec3};
    use pf_fittings::component::{Straight, Terminal};
    use pf_fittings::port::FlowData;

    fn flowing_port(pos: Pt3, dir: Vec3, diameter: Real, rate: Real) -> Port {
        let mut p = Port::new(pos, dir, diameter);
        p.flow = Some(FlowData::new(0.0, rate, 0.0, 0.0));
        p
    }

    #[test]
    fn pipe_loss_scales_with_length() {
        let calc = HazenWilliamsPressure::default();
        let flow = FlowTree::new();
        let mut tree = FittingTree::new("net", Tolerances::default());
        let short = tree.insert(Body::Straight(Straight {
            start: flowing_port(Pt3::new(1.0, 0.0, 0.0), -Vec3::x(), 0.05, 0.003),
            end: flowing_port(Pt3::origin(), Vec3::x(), 0.05, 0.003),
            diameter: 0.05,
        }));
        let long = tree.insert(Body::Straight(Straight {
            start: flowing_port(Pt3::new(2.0, 0.0, 0.0), -Vec3::x(), 0.05, 0.003),
            end: flowing_port(Pt3::origin(), Vec3::x(), 0.05, 0.003),
            diameter: 0.05,
        }));

        let d1 = calc
            .delta_for(&tree, &flow, tree.component(short).unwrap())
            .unwrap()
            .unwrap();
        let d2 = calc
            .delta_for(&tree, &flow, tree.component(long).unwrap())
            .unwrap()
            .unwrap();
        assert!(d1.branches[0].loss > 0.0);
        assert!((d2.branches[0].loss - 2.0 * d1.branches[0].loss).abs() < 1e-9);
    }

    #[test]
    fn riser_gains_static_pressure() {
        let calc = HazenWilliamsPressure::default();
        let flow = FlowTree::new();
        let mut tree = FittingTree::new("net", Tolerances::default());
        // start sits one metre above the end
        let riser = tree.insert(Body::Straight(Straight {
            start: flowing_port(Pt3::new(0.0, 0.0, 1.0), -Vec3::z(), 0.05, 0.0),
            end: flowing_port(Pt3::origin(), Vec3::z(), 0.05, 0.0),
            diameter: 0.05,
        }));
        let d = calc
            .delta_for(&tree, &flow, tree.component(riser).unwrap())
            .unwrap()
            .unwrap();
        assert!((d.branches[0].static_gain - 9810.0).abs() < 1e-9);
        assert_eq!(d.branches[0].loss, 0.0);
    }

    #[test]
    fn leaf_terminal_height_is_negated() {
        let calc = HazenWilliamsPressure::default();
        let flow = FlowTree::new();
        let mut tree = FittingTree::new("net", Tolerances::default());
        let leaf = tree.insert(Body::Terminal(Terminal {
            position: Pt3::new(0.0, 0.0, 1.0),
            port: flowing_port(Pt3::origin(), -Vec3::z(), 0.05, 0.001),
            node: None,
        }));
        let anchor = tree.insert(Body::Terminal(Terminal {
            position: Pt3::origin(),
            port: flowing_port(Pt3::new(0.0, 0.0, 0.5), Vec3::z(), 0.05, 0.001),
            node: None,
        }));
        tree.get_mut(leaf).unwrap().trunk = Some(anchor);

        let d = calc
            .delta_for(&tree, &flow, tree.component(leaf).unwrap())
            .unwrap()
            .unwrap();
        // port is a metre below the head, so the path gains going down
        assert!((d.branches[0].static_gain - 9810.0).abs() < 1e-9);
        assert!(d.fixed_pressure.is_none());
        assert!(d.branches[0].loss > 0.0);
    }

    #[test]
    fn outlet_terminal_reads_fixed_pressure_from_flow_node() {
        let calc = HazenWilliamsPressure::default();
        let mut flow = FlowTree::new();
        let out = flow.add_outlet(Pt3::origin(), 250_000.0).unwrap();
        let mut tree = FittingTree::new("net", Tolerances::default());
        let terminal = tree.insert(Body::Terminal(Terminal {
            position: Pt3::origin(),
            port: flowing_port(Pt3::new(0.03, 0.0, 0.0), Vec3::x(), 0.05, 0.002),
            node: Some(out),
        }));
        let d = calc
            .delta_for(&tree, &flow, tree.component(terminal).unwrap())
            .unwrap()
            .unwrap();
        assert_eq!(d.fixed_pressure, Some(250_000.0));
        assert_eq!(d.branches[0].loss, 0.0);
    }
}
