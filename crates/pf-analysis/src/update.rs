//! Leaf demand updates driven by solved pressures.

use pf_core::{NodeId, Real};
use pf_flow::{FlowTree, NodeKind};
use pf_fittings::solve::LeafFlowUpdate;
use pf_fittings::{Body, Component, FittingResult, FittingTree};
use tracing::debug;

use crate::fluid::k_factor_flow_rate;

/// Average flow difference below which the demands count as settled.
pub const DEFAULT_FLOW_TOLERANCE: Real = 1e-5;

/// Adjusts each leaf demand toward the discharge its k-factor predicts at
/// the solved pressure.
///
/// The step toward the predicted flow is scaled by an adaptive conversion
/// factor: it halves when successive totals oscillate and doubles after
/// three moves in the same direction, so stiff networks settle instead of
/// ringing.
pub struct PressureFlowUpdate<F>
where
    F: Fn(&Component) -> Real,
{
    k_factor: F,
    tolerance: Real,
    last_total: Option<Real>,
    conversion_factor: Real,
    same_direction: usize,
}

impl<F> PressureFlowUpdate<F>
where
    F: Fn(&Component) -> Real,
{
    pub fn new(k_factor: F, tolerance: Real) -> Self {
        Self {
            k_factor,
            tolerance,
            last_total: None,
            conversion_factor: 1.0,
            same_direction: 0,
        }
    }

    /// Forget the adaptive state carried between iterations.
    pub fn reset(&mut self) {
        self.last_total = None;
        self.conversion_factor = 1.0;
        self.same_direction = 0;
    }
}

impl<F> LeafFlowUpdate for PressureFlowUpdate<F>
where
    F: Fn(&Component) -> Real,
{
    fn update(&mut self, tree: &FittingTree, flow: &mut FlowTree) -> FittingResult<bool> {
        let mut old_total = 0.0;
        let mut total_expected = 0.0;
        let mut leaf_count = 0usize;
        let mut updates: Vec<(NodeId, Real, Real, Real)> = Vec::new();

        for id in tree.terminal_ids() {
            let c = tree.get(id)?;
            let Body::Terminal(t) = &c.body else { continue };
            if c.trunk.is_none() {
                old_total = t.port.flow.map_or(0.0, |f| f.flow_rate);
                continue;
            }
            let Some(node) = t.node else { continue };
            let Some(flow_node) = flow.node(node) else {
                continue;
            };
            let NodeKind::Leaf { flow: demand } = flow_node.kind else {
                continue;
            };
            leaf_count += 1;
            let Some(port_flow) = t.port.flow else { continue };
            let pressure = port_flow.static_pressure;

            let (new_flow, expected) = if pressure > 0.0 {
                let expected = k_factor_flow_rate(pressure, (self.k_factor)(c));
                total_expected += expected;
                (demand + (expected - demand) * self.conversion_factor, expected)
            } else {
                // a starved leaf discharges nothing; easing the demand down
                // instead of zeroing it keeps the iteration from flip-flopping
                (demand - demand * self.conversion_factor, 0.0)
            };
            updates.push((node, new_flow, expected, demand));
        }

        if updates.is_empty() {
            return Ok(false);
        }

        let new_total: Real = updates.iter().map(|(_, f, _, _)| f).sum();
        if let Some(last) = self.last_total {
            let numerator = new_total - last;
            let denominator = old_total - last;
            let delta = if denominator.abs() < Real::EPSILON {
                1.0
            } else {
                numerator / denominator
            };
            if delta < 0.1 {
                self.conversion_factor /= 2.0;
            } else if delta > 1.0 {
                self.same_direction += 1;
            }
            if delta <= 1.0 {
                self.same_direction = 0;
            } else if self.same_direction > 2 {
                self.conversion_factor *= 2.0;
                self.same_direction = 0;
            }
        }
        self.last_total = Some(old_total);

        let mut max_iteration_diff: Real = 0.0;
        let mut max_expected_diff: Real = 0.0;
        for &(node, new_flow, expected, old_flow) in &updates {
            max_iteration_diff = max_iteration_diff.max((new_flow - old_flow).abs());
            max_expected_diff = max_expected_diff.max((expected - new_flow).abs());
            flow.set_leaf_flow(node, new_flow)?;
        }
        let average_difference = (total_expected - old_total).abs() / leaf_count as Real;

        let needs_update = average_difference > self.tolerance
            || max_expected_diff > self.tolerance * 10.0
            || max_iteration_diff > self.tolerance * 10.0;
        debug!(
            average_difference,
            max_expected_diff,
            max_iteration_diff,
            factor = self.conversion_factor,
            needs_update,
            "leaf flows updated from pressure"
        );
        Ok(needs_update)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pf_core::Pt3;
    use pf_fittings::builder::{BuildOptions, build};
    use pf_fittings::port::FlowData;
    use pf_fittings::routing::FittingTreeRouting;

    fn built(demand: Real) -> (FittingTree, FlowTree) {
        let mut flow = FlowTree::new();
        let out = flow.add_outlet(Pt3::origin(), 200_000.0).unwrap();
        let leaf = flow.add_inlet(Pt3::new(2.0, 0.0, 0.0), demand);
        flow.connect(leaf, out, 0.05).unwrap();
        let routing = FittingTreeRouting::default();
        let (tree, report) = build(&mut flow, &routing, &BuildOptions::default()).unwrap();
        assert!(report.is_clean());
        (tree, flow)
    }

    fn set_leaf_pressure(tree: &mut FittingTree, pressure: Real) {
        let id = tree
            .iter()
            .find(|c| c.is_terminal() && c.trunk.is_some())
            .unwrap()
            .id;
        let port = tree.get_mut(id).unwrap().trunk_port_mut().unwrap();
        port.flow = Some(FlowData::new(pressure, 0.0, 0.0, 0.0));
    }

    fn set_outlet_total(tree: &mut FittingTree, rate: Real) {
        let id = tree
            .iter()
            .find(|c| c.is_terminal() && c.trunk.is_none())
            .unwrap()
            .id;
        if let Body::Terminal(t) = &mut tree.get_mut(id).unwrap().body {
            t.port.flow = Some(FlowData::new(200_000.0, rate, 0.0, 0.0));
        }
    }

    #[test]
    fn positive_pressure_moves_demand_toward_k_flow() {
        let (mut tree, mut flow) = built(0.001);
        set_leaf_pressure(&mut tree, 10_000.0);

        // k = 1e-4 predicts 0.01 m^3/s at 10 kPa
        let mut update = PressureFlowUpdate::new(|_| 1e-4, DEFAULT_FLOW_TOLERANCE);
        let changed = update.update(&tree, &mut flow).unwrap();
        assert!(changed);

        let leaf = flow.nodes().iter().find(|n| n.is_leaf()).unwrap();
        let NodeKind::Leaf { flow: demand } = leaf.kind else {
            panic!()
        };
        // full conversion factor jumps straight to the expected flow
        assert!((demand - 0.01).abs() < 1e-12);
    }

    #[test]
    fn starved_leaf_backs_off() {
        let (mut tree, mut flow) = built(0.004);
        set_leaf_pressure(&mut tree, -500.0);

        let mut update = PressureFlowUpdate::new(|_| 1e-4, DEFAULT_FLOW_TOLERANCE);
        update.update(&tree, &mut flow).unwrap();

        let leaf = flow.nodes().iter().find(|n| n.is_leaf()).unwrap();
        let NodeKind::Leaf { flow: demand } = leaf.kind else {
            panic!()
        };
        assert_eq!(demand, 0.0);
    }

    #[test]
    fn settled_demand_reports_no_change() {
        // demand already equals what the k-factor predicts at this pressure
        let (mut tree, mut flow) = built(0.01);
        set_leaf_pressure(&mut tree, 10_000.0);
        set_outlet_total(&mut tree, 0.01);

        let mut update = PressureFlowUpdate::new(|_| 1e-4, DEFAULT_FLOW_TOLERANCE);
        let changed = update.update(&tree, &mut flow).unwrap();
        assert!(!changed);
    }
}
