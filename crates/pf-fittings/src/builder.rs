//! Building a fitting tree from a flow tree.
//!
//! The build walks the flow tree from the outlet toward the leaves, asking
//! the router for a fitting at every node and linking each new fitting to
//! the one it was reached from. Loop-closing connections revisit a node
//! that already has a fitting; instead of a second fitting the existing one
//! is rewired. After the walk, fittings that absorbed neighbor nodes
//! swallow the absorbed nodes' fittings, straight runs are synthesized, and
//! sections are labeled.

use std::collections::{HashMap, HashSet};

use tracing::{debug, info};

use pf_core::{CompId, ConnId, NodeId, Tolerances};
use pf_flow::FlowTree;

use crate::arena::{FittingTree, PortRef};
use crate::error::{BuildReport, ConnectionFailure, FittingError, FittingResult};
use crate::piping::PipeSynthesis;
use crate::routing::NodeRouter;
use crate::sections::assign_labels;

#[derive(Debug, Clone)]
pub struct BuildOptions {
    pub network_name: String,
    /// Fail on the first recoverable problem instead of collecting it.
    pub strict: bool,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            network_name: "network".to_string(),
            strict: false,
        }
    }
}

/// Build the physical fitting tree realizing `flow`.
///
/// Section data on the flow tree is recomputed first; the returned report
/// collects every recoverable problem (unroutable nodes, unspannable gaps,
/// unorderable sections). In strict mode the first such problem is an error.
pub fn build(
    flow: &mut FlowTree,
    router: &dyn NodeRouter,
    options: &BuildOptions,
) -> FittingResult<(FittingTree, BuildReport)> {
    flow.update_sections()?;
    let routing = router.routing();
    let tolerances = Tolerances {
        distance: routing.port_distance_tolerance,
        angle_deg: routing.angle_tolerance,
    };
    let outlet = flow
        .outlet()
        .ok_or(FittingError::Flow(pf_flow::FlowError::NoOutlet))?;

    let mut state = BuildState {
        flow,
        router,
        strict: options.strict,
        tree: FittingTree::new(options.network_name.clone(), tolerances),
        fittings_for_nodes: HashMap::new(),
        absorbing: HashMap::new(),
        trunk_port_connections: HashMap::new(),
        loop_ports: HashSet::new(),
        report: BuildReport::default(),
    };

    state.visit(outlet, None)?;
    state.remove_absorbed_fittings()?;
    state.tree.assign_names();

    let BuildState {
        flow,
        mut tree,
        trunk_port_connections,
        loop_ports,
        mut report,
        strict,
        ..
    } = state;

    let failures = PipeSynthesis::new(
        &mut tree,
        flow,
        routing,
        &trunk_port_connections,
        &loop_ports,
    )
    .run()?;
    if strict {
        if let Some(f) = failures.first() {
            return Err(FittingError::cannot_connect(
                "no straight segment spans this port",
                f.start,
            ));
        }
    }
    report.segment_failures = failures;

    let label_failures = assign_labels(&mut tree);
    if strict {
        if let Some(f) = label_failures.first() {
            return Err(FittingError::BadOperation {
                what: format!("section {} cannot be labeled: {}", f.section_key, f.reason),
            });
        }
    }
    report.labeling_failures = label_failures;

    info!(
        components = tree.len(),
        clean = report.is_clean(),
        "fitting tree built"
    );
    Ok((tree, report))
}

struct BuildState<'a> {
    flow: &'a FlowTree,
    router: &'a dyn NodeRouter,
    strict: bool,
    tree: FittingTree,
    fittings_for_nodes: HashMap<NodeId, CompId>,
    /// Absorbed node mapped to the fitting that swallows it.
    absorbing: HashMap<NodeId, CompId>,
    trunk_port_connections: HashMap<PortRef, ConnId>,
    loop_ports: HashSet<PortRef>,
    report: BuildReport,
}

impl BuildState<'_> {
    fn visit(&mut self, node: NodeId, previous: Option<CompId>) -> FittingResult<()> {
        if let Some(&existing) = self.fittings_for_nodes.get(&node) {
            let previous = previous.ok_or(FittingError::LinkInvariant {
                what: "revisited the outlet node".to_string(),
            })?;
            return self.rewire_loop(existing, previous);
        }

        let routed = match self.router.fitting_for_node(self.flow, node) {
            Ok(Some(routed)) => routed,
            Ok(None) => {
                return self.routing_failure(node, "no fitting realizes this junction");
            }
            Err(e) if !self.strict => {
                let reason = e.to_string();
                return self.routing_failure(node, &reason);
            }
            Err(e) => return Err(e),
        };

        let comp = self.tree.insert(routed.body);
        self.fittings_for_nodes.insert(node, comp);
        for absorbed in routed.absorbed {
            self.absorbing.insert(absorbed, comp);
        }

        // locator section comes from the connection the fitting realizes:
        // the outgoing one, or the incoming one at the outlet
        let section_conn = self
            .flow
            .outgoing_connection(node)
            .or_else(|| self.flow.incoming_connections(node).into_iter().next());
        if let Some(conn) = section_conn {
            if let Some(section) = self.flow.section_of(conn.id) {
                self.tree.get_mut(comp)?.locator.section_key = section.key.clone();
            }
        }

        if let Some(prev) = previous {
            self.tree.get_mut(comp)?.trunk = Some(prev);
            self.tree.get_mut(prev)?.branches.push(comp);
        }

        if let Some(out) = self.flow.outgoing_connection(node) {
            if let Some(tp) = self.tree.trunk_port_ref(comp)? {
                self.trunk_port_connections.insert(tp, out.id);
            }
        }

        // a loop-closing connection leaving this node claims the branch
        // port pointing along it
        for lc in self.flow.outgoing_connections(node) {
            if !lc.is_loop {
                continue;
            }
            let Some(dir) = lc.direction(self.flow) else {
                continue;
            };
            let tol = self.tree.tolerances();
            for pref in self.tree.branch_port_refs(comp)? {
                let port = self.tree.port(pref)?;
                if pf_core::angle_between_deg(&port.direction, &dir) <= tol.angle_deg {
                    self.loop_ports.insert(pref);
                    break;
                }
            }
        }

        let children: Vec<NodeId> = self
            .flow
            .incoming_connections(node)
            .into_iter()
            .map(|c| c.start)
            .collect();
        for child in children {
            if self.absorbing.contains_key(&child) {
                return Err(FittingError::BranchSideAbsorbed);
            }
            self.visit(child, Some(comp))?;
        }
        Ok(())
    }

    fn routing_failure(&mut self, node: NodeId, reason: &str) -> FittingResult<()> {
        let position = self
            .flow
            .node(node)
            .map(|n| n.position)
            .unwrap_or_else(pf_core::Pt3::origin);
        if self.strict {
            return Err(FittingError::cannot_connect(reason, position));
        }
        debug!(?node, reason, "node left unrouted");
        self.report.connection_failures.push(ConnectionFailure {
            node,
            position,
            reason: reason.to_string(),
        });
        Ok(())
    }

    /// A loop edge led back to an already-fitted node; wire the existing
    /// fitting and the fitting we came from together directly. The pipe
    /// between them is synthesized later like any other.
    fn rewire_loop(&mut self, existing: CompId, previous: CompId) -> FittingResult<()> {
        let trunk_side_loop = self.loop_lands_on_trunk(existing)?;
        if trunk_side_loop {
            // the loop enters on the trunk side: the old trunk becomes one
            // of the existing fitting's branches and the loop becomes its
            // new trunk
            let old_trunk = self.tree.get(existing)?.trunk;
            self.tree.get_mut(existing)?.trunk = Some(previous);
            if let Some(ot) = old_trunk {
                self.tree.get_mut(ot)?.branches.retain(|&b| b != existing);
                let ex = self.tree.get_mut(existing)?;
                if !ex.branches.contains(&ot) {
                    ex.branches.push(ot);
                }
            }
        } else {
            let ex = self.tree.get_mut(existing)?;
            if !ex.branches.contains(&previous) {
                ex.branches.push(previous);
            }
        }
        let prev = self.tree.get_mut(previous)?;
        if !prev.branches.contains(&existing) {
            prev.branches.push(existing);
        }
        Ok(())
    }

    /// True when one of `existing`'s loop-claimed ports faces a port of its
    /// current trunk-side component.
    fn loop_lands_on_trunk(&self, existing: CompId) -> FittingResult<bool> {
        let Some(trunk) = self.tree.get(existing)?.trunk else {
            return Ok(false);
        };
        for pref in self.loop_ports.iter() {
            if pref.comp != existing {
                continue;
            }
            let port = self.tree.port(*pref)?;
            if self
                .tree
                .best_complement_for_port(&port.position, &port.direction, trunk)?
                .is_some()
            {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Fold each absorbed node's fitting into the fitting that absorbs it.
    fn remove_absorbed_fittings(&mut self) -> FittingResult<()> {
        let pairs: Vec<(NodeId, CompId)> =
            self.absorbing.iter().map(|(&n, &c)| (n, c)).collect();
        for (node, absorbing) in pairs {
            let Some(&removed) = self.fittings_for_nodes.get(&node) else {
                continue;
            };
            if removed == absorbing {
                continue;
            }
            let (removed_trunk, removed_branches) = {
                let r = self.tree.get(removed)?;
                (r.trunk, r.branches.clone())
            };
            if self.tree.get(absorbing)?.trunk == Some(removed) {
                self.tree.get_mut(absorbing)?.trunk = removed_trunk;
                if let Some(t) = removed_trunk {
                    let tc = self.tree.get_mut(t)?;
                    for b in tc.branches.iter_mut() {
                        if *b == removed {
                            *b = absorbing;
                        }
                    }
                }
            }
            for b in removed_branches {
                if b == absorbing {
                    continue;
                }
                let a = self.tree.get_mut(absorbing)?;
                if !a.branches.contains(&b) {
                    a.branches.push(b);
                }
                let bc = self.tree.get_mut(b)?;
                if bc.trunk == Some(removed) {
                    bc.trunk = Some(absorbing);
                }
            }
            self.tree.get_mut(absorbing)?.branches.retain(|&b| b != removed);
            self.tree.remove(removed);
            self.fittings_for_nodes.insert(node, absorbing);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::Body;
    use crate::routing::FittingTreeRouting;
    use pf_core::Pt3;

    fn straight_flow() -> FlowTree {
        let mut flow = FlowTree::new();
        let out = flow.add_outlet(Pt3::origin(), 0.0).unwrap();
        let leaf = flow.add_inlet(Pt3::new(2.0, 0.0, 0.0), 1.0);
        flow.connect(leaf, out, 0.05).unwrap();
        flow
    }

    #[test]
    fn straight_network_builds_two_terminals_and_a_run() {
        let mut flow = straight_flow();
        let routing = FittingTreeRouting::default();
        let (tree, report) = build(&mut flow, &routing, &BuildOptions::default()).unwrap();
        assert!(report.is_clean(), "{report:?}");

        let terminals = tree.terminal_ids();
        let pipes = tree.straight_ids();
        assert_eq!(terminals.len(), 2);
        assert_eq!(pipes.len(), 1);
        assert_eq!(tree.len(), 3);
        tree.check_links().unwrap();

        // every component carries the trunk section key
        for c in tree.iter() {
            assert_eq!(c.locator.section_key, "0");
        }
    }

    #[test]
    fn junction_network_places_a_wye() {
        let mut flow = FlowTree::new();
        let out = flow.add_outlet(Pt3::origin(), 0.0).unwrap();
        let junction = flow.add_internal(Pt3::new(2.0, 0.0, 0.0));
        let main = flow.add_inlet(Pt3::new(4.0, 0.0, 0.0), 1.0);
        let side = flow.add_inlet(Pt3::new(2.0, 3.0, 0.0), 0.5);
        flow.connect(main, junction, 0.05).unwrap();
        flow.connect(side, junction, 0.05).unwrap();
        flow.connect(junction, out, 0.05).unwrap();

        let routing = FittingTreeRouting::default();
        let (tree, report) = build(&mut flow, &routing, &BuildOptions::default()).unwrap();
        assert!(report.is_clean(), "{report:?}");

        let wyes: Vec<_> = tree
            .iter()
            .filter(|c| matches!(c.body, Body::Wye(_)))
            .collect();
        assert_eq!(wyes.len(), 1);
        // 3 terminals, 1 wye, 3 runs
        assert_eq!(tree.terminal_ids().len(), 3);
        assert_eq!(tree.straight_ids().len(), 3);
        tree.check_links().unwrap();
    }

    #[test]
    fn unroutable_node_is_collected_not_fatal() {
        let mut flow = FlowTree::new();
        let out = flow.add_outlet(Pt3::origin(), 0.0).unwrap();
        let junction = flow.add_internal(Pt3::new(2.0, 0.0, 0.0));
        let main = flow.add_inlet(Pt3::new(4.0, 0.0, 0.0), 1.0);
        // 60 degree takeoff is not an allowed branch angle
        let side = flow.add_inlet(Pt3::new(3.0, 1.732, 0.0), 0.5);
        flow.connect(main, junction, 0.05).unwrap();
        flow.connect(side, junction, 0.05).unwrap();
        flow.connect(junction, out, 0.05).unwrap();

        let routing = FittingTreeRouting::default();
        let (_, report) = build(&mut flow, &routing, &BuildOptions::default()).unwrap();
        assert_eq!(report.connection_failures.len(), 1);
        assert_eq!(report.connection_failures[0].node, junction);
    }

    #[test]
    fn strict_mode_promotes_routing_failure() {
        let mut flow = FlowTree::new();
        let out = flow.add_outlet(Pt3::origin(), 0.0).unwrap();
        let junction = flow.add_internal(Pt3::new(2.0, 0.0, 0.0));
        let main = flow.add_inlet(Pt3::new(4.0, 0.0, 0.0), 1.0);
        let side = flow.add_inlet(Pt3::new(3.0, 1.732, 0.0), 0.5);
        flow.connect(main, junction, 0.05).unwrap();
        flow.connect(side, junction, 0.05).unwrap();
        flow.connect(junction, out, 0.05).unwrap();

        let routing = FittingTreeRouting::default();
        let options = BuildOptions {
            strict: true,
            ..BuildOptions::default()
        };
        let err = build(&mut flow, &routing, &options).unwrap_err();
        assert!(matches!(err, FittingError::UnsupportedBranchAngle { .. }));
    }

    #[test]
    fn loop_connection_rewires_instead_of_duplicating() {
        // ring: outlet <- a <- b <- c <- leaf, closed by a -> d -> c
        let mut flow = FlowTree::new();
        let out = flow.add_outlet(Pt3::origin(), 0.0).unwrap();
        let a = flow.add_internal(Pt3::new(2.0, 0.0, 0.0));
        let b = flow.add_internal(Pt3::new(4.0, 0.0, 0.0));
        let c = flow.add_internal(Pt3::new(4.0, 2.0, 0.0));
        let d = flow.add_internal(Pt3::new(2.0, 2.0, 0.0));
        let leaf = flow.add_inlet(Pt3::new(4.0, 4.0, 0.0), 1.0);
        flow.connect(leaf, c, 0.05).unwrap();
        flow.connect(c, b, 0.05).unwrap();
        flow.connect(b, a, 0.05).unwrap();
        flow.connect(a, out, 0.05).unwrap();
        flow.connect_loop(a, d, 0.05).unwrap();
        flow.connect(d, c, 0.05).unwrap();

        let routing = FittingTreeRouting::default();
        let (tree, report) = build(&mut flow, &routing, &BuildOptions::default()).unwrap();
        assert!(report.is_clean(), "{report:?}");

        // one fitting per node, no duplicate where the loop closes
        assert_eq!(tree.terminal_ids().len(), 2);
        let wyes = tree
            .iter()
            .filter(|f| matches!(f.body, Body::Wye(_)))
            .count();
        let elbows = tree
            .iter()
            .filter(|f| matches!(f.body, Body::Elbow(_)))
            .count();
        assert_eq!(wyes, 2);
        assert_eq!(elbows, 2);
        // every gap including the loop closure got a run
        assert_eq!(tree.straight_ids().len(), 6);
        tree.check_links().unwrap();
    }
}
