//! Full-flow assignment: every leaf demand travels the trunk path intact.

use pf_flow::{FlowTree, NodeKind};
use pf_fittings::solve::FlowAssigner;
use pf_fittings::{Body, FittingResult, FittingTree};

/// Assigns port flow rates by pushing each leaf demand down its trunk
/// chain. No diversity or simultaneity factors are applied.
#[derive(Debug, Clone, Copy, Default)]
pub struct FullFlow;

impl FlowAssigner for FullFlow {
    fn assign_flows(&self, tree: &mut FittingTree, flow: &FlowTree) -> FittingResult<()> {
        for id in tree.ids() {
            for port in tree.get_mut(id)?.body.ports_mut() {
                port.flow = None;
            }
        }

        for id in tree.terminal_ids() {
            let node = {
                let c = tree.get(id)?;
                if c.trunk.is_none() {
                    continue;
                }
                match &c.body {
                    Body::Terminal(t) => t.node,
                    _ => None,
                }
            };
            let Some(node) = node else { continue };
            let Some(flow_node) = flow.node(node) else {
                continue;
            };
            if let NodeKind::Leaf { flow: demand } = flow_node.kind {
                tree.propagate_flow(id, demand)?;
            }
        }

        // straight runs mirror their neighbors' ports, flow included
        tree.resync_segment_ports()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pf_core::Pt3;
    use pf_fittings::routing::FittingTreeRouting;
    use pf_fittings::builder::{BuildOptions, build};

    #[test]
    fn demands_accumulate_toward_the_outlet() {
        let mut flow = FlowTree::new();
        let out = flow.add_outlet(Pt3::origin(), 0.0).unwrap();
        let junction = flow.add_internal(Pt3::new(2.0, 0.0, 0.0));
        let main = flow.add_inlet(Pt3::new(4.0, 0.0, 0.0), 1.0);
        let side = flow.add_inlet(Pt3::new(2.0, 3.0, 0.0), 0.5);
        flow.connect(main, junction, 0.05).unwrap();
        flow.connect(side, junction, 0.05).unwrap();
        flow.connect(junction, out, 0.05).unwrap();

        let routing = FittingTreeRouting::default();
        let (mut tree, report) = build(&mut flow, &routing, &BuildOptions::default()).unwrap();
        assert!(report.is_clean());

        FullFlow.assign_flows(&mut tree, &flow).unwrap();

        // the outlet terminal sees the combined demand
        let outlet = tree
            .iter()
            .find(|c| c.is_terminal() && c.trunk.is_none())
            .unwrap();
        let total = outlet.branch_ports()[0].flow.unwrap().flow_rate;
        assert!((total - 1.5).abs() < 1e-12);

        // the wye splits it across its branch ports
        let wye = tree
            .iter()
            .find(|c| matches!(c.body, Body::Wye(_)))
            .unwrap();
        let Body::Wye(w) = &wye.body else { panic!() };
        assert!((w.trunk.flow.unwrap().flow_rate - 1.5).abs() < 1e-12);
        assert!((w.main_branch.flow.unwrap().flow_rate - 1.0).abs() < 1e-12);
        assert!((w.side_branch.flow.unwrap().flow_rate - 0.5).abs() < 1e-12);

        // straight runs carry the flow of the ports they rest on
        for c in tree.iter().filter(|c| c.is_straight()) {
            let Body::Straight(s) = &c.body else { panic!() };
            assert!(s.end.flow.is_some(), "{} has no end flow", c.name);
        }

        // a second assignment does not double anything
        FullFlow.assign_flows(&mut tree, &flow).unwrap();
        let outlet = tree
            .iter()
            .find(|c| c.is_terminal() && c.trunk.is_none())
            .unwrap();
        assert!((outlet.branch_ports()[0].flow.unwrap().flow_rate - 1.5).abs() < 1e-12);
    }
}
