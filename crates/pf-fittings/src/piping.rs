//! Straight-segment synthesis between placed fittings.
//!
//! After routing leaves a fitting at every node, the gaps between
//! complementary ports are spanned by straight runs. A run only exists
//! between ports that face each other with positive clearance; diameter
//! mismatches along the way are absorbed by inserting reducers at the
//! run's ends. Ports that cannot be spanned are reported, not fatal.

use std::collections::{HashMap, HashSet};

use pf_core::{CompId, ConnId, Pt3, Real, Vec3, angle_between_deg, approx_eq};
use pf_flow::FlowTree;

use crate::arena::{FittingTree, PortRef};
use crate::component::{Body, Straight};
use crate::error::{FittingError, FittingResult, SegmentFailure};
use crate::routing::FittingTreeRouting;
use crate::shift::PendingShift;

const DIAMETER_EPS: Real = 1e-9;

impl FittingTree {
    /// Find a port on `other` complementary in direction to one at
    /// `position` facing `direction`. The second value tells whether the
    /// found port leaves room for a run between the two.
    pub fn opposite_side_port(
        &self,
        position: &Pt3,
        direction: &Vec3,
        other: CompId,
    ) -> FittingResult<(Option<PortRef>, bool)> {
        let tol = self.tolerances();
        let c = self.get(other)?;
        for (i, port) in c.body.ports().into_iter().enumerate() {
            if (angle_between_deg(direction, &port.direction) - 180.0).abs() > tol.angle_deg {
                continue;
            }
            let found = PortRef::new(other, i);
            let delta = position - port.position;
            if delta.norm() < tol.distance {
                return Ok((Some(found), true));
            }
            let to_delta = angle_between_deg(&delta, direction);
            if (to_delta - 180.0).abs() <= tol.angle_deg {
                // the other port sits in front of ours
                return Ok((Some(found), true));
            }
            if to_delta <= tol.angle_deg {
                // behind ours: the fittings overlap
                return Ok((Some(found), false));
            }
        }
        Ok((None, false))
    }

    /// Splice a reducer between a run and its trunk-side component.
    pub(crate) fn add_reducer_trunk_side(
        &mut self,
        pipe: CompId,
        reducer: CompId,
        trunk_comp: CompId,
    ) -> FittingResult<()> {
        let reducer_start = reducer_port(self, reducer, 0)?;
        let reducer_end = reducer_port(self, reducer, 1)?;

        {
            let r = self.get_mut(reducer)?;
            r.branches = vec![pipe];
            r.trunk = Some(trunk_comp);
        }
        self.get_mut(pipe)?.trunk = Some(reducer);
        let tc = self.get_mut(trunk_comp)?;
        for b in tc.branches.iter_mut() {
            if *b == pipe {
                *b = reducer;
            }
        }
        if let Body::Straight(ref mut seg) = self.get_mut(pipe)?.body {
            seg.end = reducer_start;
        }
        if let Body::Straight(ref mut seg) = self.get_mut(trunk_comp)?.body {
            seg.start = reducer_end;
        }
        Ok(())
    }

    /// Splice a reducer between a run and its branch-side component.
    pub(crate) fn add_reducer_branch_side(
        &mut self,
        pipe: CompId,
        reducer: CompId,
        branch_comp: CompId,
    ) -> FittingResult<()> {
        let reducer_start = reducer_port(self, reducer, 0)?;
        let reducer_end = reducer_port(self, reducer, 1)?;

        {
            let r = self.get_mut(reducer)?;
            r.trunk = Some(pipe);
            r.branches.push(branch_comp);
        }
        self.get_mut(pipe)?.branches = vec![reducer];
        let bc = self.get_mut(branch_comp)?;
        if bc.branches.contains(&pipe) {
            for b in bc.branches.iter_mut() {
                if *b == pipe {
                    *b = reducer;
                }
            }
        } else {
            bc.trunk = Some(reducer);
        }
        if let Body::Straight(ref mut seg) = self.get_mut(pipe)?.body {
            seg.start = reducer_end;
        }
        if let Body::Straight(ref mut seg) = self.get_mut(branch_comp)?.body {
            seg.end = reducer_start;
        }
        Ok(())
    }

    /// Drop a zero-length run, splicing its neighbors together.
    pub(crate) fn remove_empty_segment(&mut self, seg: CompId) -> FittingResult<()> {
        let (trunk, branches) = {
            let c = self.get(seg)?;
            (c.trunk, c.branches.clone())
        };
        if let Some(t) = trunk {
            let tc = self.get_mut(t)?;
            tc.branches.retain(|&b| b != seg);
            for &b in &branches {
                if b != t && !tc.branches.contains(&b) {
                    tc.branches.push(b);
                }
            }
        }
        for &b in &branches {
            let bc = self.get_mut(b)?;
            if bc.trunk == Some(seg) {
                bc.trunk = trunk;
            }
            for x in bc.branches.iter_mut() {
                if *x == seg {
                    if let Some(t) = trunk {
                        *x = t;
                    }
                }
            }
        }
        self.remove(seg);
        Ok(())
    }
}

fn reducer_port(tree: &FittingTree, reducer: CompId, index: usize) -> FittingResult<crate::port::Port> {
    Ok(tree.port(PortRef::new(reducer, index))?.clone())
}

/// One pass of straight-run synthesis over a freshly routed tree.
pub struct PipeSynthesis<'a> {
    tree: &'a mut FittingTree,
    flow: &'a FlowTree,
    routing: &'a FittingTreeRouting,
    /// Trunk port of each fitting mapped to the flow connection it realizes.
    connections: &'a HashMap<PortRef, ConnId>,
    /// Ports claimed by loop-closing connections; no run is synthesized there.
    loop_ports: &'a HashSet<PortRef>,
    piped: HashSet<PortRef>,
    failures: Vec<(PortRef, SegmentFailure)>,
}

impl<'a> PipeSynthesis<'a> {
    pub fn new(
        tree: &'a mut FittingTree,
        flow: &'a FlowTree,
        routing: &'a FittingTreeRouting,
        connections: &'a HashMap<PortRef, ConnId>,
        loop_ports: &'a HashSet<PortRef>,
    ) -> Self {
        Self {
            tree,
            flow,
            routing,
            connections,
            loop_ports,
            piped: HashSet::new(),
            failures: Vec::new(),
        }
    }

    /// Synthesize runs for every fitting, settle pending shifts, and drop
    /// runs that collapsed to zero length.
    pub fn run(mut self) -> FittingResult<Vec<SegmentFailure>> {
        let fittings: Vec<CompId> = self
            .tree
            .iter()
            .filter(|c| !c.is_straight())
            .map(|c| c.id)
            .collect();
        for f in fittings {
            self.make_possible_pipes(f)?;
        }

        // a leaf terminal's pending shift is balanced back through the
        // network after everything else has moved
        let leaf_terminals: Vec<(CompId, PendingShift)> = self
            .tree
            .iter()
            .filter(|c| c.is_terminal() && c.trunk.is_some())
            .map(|c| (c.id, c.pending.inverted()))
            .collect();

        for id in self.tree.ids() {
            if self.tree.get(id)?.is_straight() {
                self.tree.clear_shift(id)?;
            } else {
                self.tree.apply_shift(id)?;
            }
        }
        self.tree.resync_segment_ports()?;
        for (terminal, shift) in leaf_terminals {
            self.tree.balance_terminal_shift(terminal, &shift)?;
        }

        let tol = self.tree.tolerances();
        for id in self.tree.straight_ids() {
            if self.tree.get(id)?.body.length() <= tol.distance {
                self.tree.remove_empty_segment(id)?;
            }
        }
        self.tree.check_links()?;

        Ok(self.collect_failures())
    }

    /// Unpiped failures only, best candidate first, one per target port.
    fn collect_failures(self) -> Vec<SegmentFailure> {
        let mut raw: Vec<(PortRef, SegmentFailure)> = self
            .failures
            .into_iter()
            .filter(|(port, _)| !self.piped.contains(port))
            .collect();
        raw.sort_by_key(|(_, f)| f.end.is_none());
        let mut seen: HashSet<(CompId, usize)> = HashSet::new();
        let mut out = Vec::new();
        for (port, failure) in raw {
            if seen.insert((port.comp, port.port)) {
                out.push(failure);
            }
        }
        out
    }

    fn make_possible_pipes(&mut self, fitting: CompId) -> FittingResult<()> {
        let branch_refs = self.tree.branch_port_refs(fitting)?;
        let branch_comps = self.tree.get(fitting)?.branches.clone();
        for pref in branch_refs {
            if self.piped.contains(&pref) || self.loop_ports.contains(&pref) {
                continue;
            }
            let (port_pos, port_dir) = {
                let p = self.tree.port(pref)?;
                (p.position, p.direction)
            };
            for &bc in &branch_comps {
                let (found, has_space) =
                    self.tree.opposite_side_port(&port_pos, &port_dir, bc)?;
                let Some(other) = found else { continue };
                if self.piped.contains(&other) {
                    continue;
                }
                if !has_space {
                    let end = self.tree.port(other)?.position;
                    self.failures.push((
                        pref,
                        SegmentFailure {
                            component: fitting,
                            start: port_pos,
                            end: Some(end),
                        },
                    ));
                    break;
                }
                self.make_pipe(fitting, pref, other, bc)?;
                if self.piped.contains(&pref) {
                    break;
                }
            }
            if !self.piped.contains(&pref) && !self.loop_ports.contains(&pref) {
                self.failures.push((
                    pref,
                    SegmentFailure {
                        component: fitting,
                        start: port_pos,
                        end: None,
                    },
                ));
            }
        }
        Ok(())
    }

    /// Create one straight run between a trunk-side fitting's branch port
    /// and a branch-side fitting's trunk port, inserting reducers where the
    /// realized connection's diameter disagrees with either port.
    ///
    /// Returns the new run, or None when no run fits (the caller keeps
    /// trying other candidates). Coincident ports with unequal diameters
    /// and misaligned connectors are hard errors.
    fn make_pipe(
        &mut self,
        trunk_comp: CompId,
        trunk_port: PortRef,
        branch_port: PortRef,
        branch_comp: CompId,
    ) -> FittingResult<Option<CompId>> {
        let tol = self.tree.tolerances();
        let tp = self.tree.port(trunk_port)?.clone();
        let bp = self.tree.port(branch_port)?.clone();

        let span = bp.position - tp.position;
        if span.norm() < tol.distance {
            if !approx_eq(tp.diameter, bp.diameter, DIAMETER_EPS) {
                return Err(FittingError::CoincidentDiameterMismatch {
                    a: tp.diameter,
                    b: bp.diameter,
                });
            }
            // nothing to span, the fittings meet directly
            self.piped.insert(trunk_port);
            self.piped.insert(branch_port);
            let pending = self.tree.get(trunk_comp)?.pending;
            self.tree
                .propagate_shift(branch_comp, &pending, crate::shift::ShiftDirection::TrunkToBranch)?;
            return Ok(None);
        }
        let span_dir = span / span.norm();
        if (angle_between_deg(&span_dir, &bp.direction) - 180.0).abs() > tol.angle_deg {
            return Err(FittingError::cannot_connect(
                "pipe connectors are not aligned",
                tp.position,
            ));
        }

        // plan reducers before touching the tree so a too-short gap
        // leaves no trace
        let conn = self.connections.get(&branch_port).copied();
        let conn_diameter = conn
            .and_then(|id| self.flow.connection(id))
            .map(|c| c.diameter);
        let pipe_length = span.norm();
        let plan = self.plan_diameters(&tp, &bp, conn_diameter);
        let needed: Real = [
            plan.trunk_reducer
                .map(|d| self.routing.reducer_length(plan.pipe_diameter, d)),
            plan.branch_reducer
                .map(|d| self.routing.reducer_length(plan.pipe_diameter, d)),
        ]
        .into_iter()
        .flatten()
        .sum();
        if pipe_length - needed < -tol.distance {
            return Ok(None);
        }

        let pipe = self.tree.insert(Body::Straight(Straight {
            start: bp.clone(),
            end: tp.clone(),
            diameter: plan.pipe_diameter,
        }));
        self.wire_pipe(pipe, trunk_comp, branch_comp)?;

        if let Some(d) = plan.trunk_reducer {
            let reducer = self
                .routing
                .reduce_or_join(self.tree, pipe, false, d, 0.0)?;
            self.tree.add_reducer_trunk_side(pipe, reducer, trunk_comp)?;
        }
        if let Some(d) = plan.branch_reducer {
            let reducer = self
                .routing
                .reduce_or_join(self.tree, pipe, true, d, 0.0)?;
            self.tree.add_reducer_branch_side(pipe, reducer, branch_comp)?;
        }

        self.piped.insert(trunk_port);
        self.piped.insert(branch_port);
        self.tree.get_mut(pipe)?.connection = conn;
        Ok(Some(pipe))
    }

    /// Decide the run diameter and which ends need a reducer.
    fn plan_diameters(
        &self,
        tp: &crate::port::Port,
        bp: &crate::port::Port,
        conn_diameter: Option<Real>,
    ) -> DiameterPlan {
        if self.routing.pipe_size_matches_connection {
            if let Some(cd) = conn_diameter {
                let trunk_differs = !approx_eq(tp.diameter, cd, DIAMETER_EPS);
                let branch_differs = !approx_eq(bp.diameter, cd, DIAMETER_EPS);
                if trunk_differs || branch_differs {
                    return DiameterPlan {
                        pipe_diameter: cd,
                        trunk_reducer: trunk_differs.then_some(tp.diameter),
                        branch_reducer: branch_differs.then_some(bp.diameter),
                    };
                }
            }
        }
        if !approx_eq(tp.diameter, bp.diameter, DIAMETER_EPS) {
            // without a connection to match, the smaller bore survives and
            // a single reducer adapts the larger end
            let reducer_on_branch_side = tp.diameter < bp.diameter;
            return if reducer_on_branch_side {
                DiameterPlan {
                    pipe_diameter: tp.diameter,
                    trunk_reducer: None,
                    branch_reducer: Some(bp.diameter),
                }
            } else {
                DiameterPlan {
                    pipe_diameter: bp.diameter,
                    trunk_reducer: Some(tp.diameter),
                    branch_reducer: None,
                }
            };
        }
        DiameterPlan {
            pipe_diameter: tp.diameter,
            trunk_reducer: None,
            branch_reducer: None,
        }
    }

    fn wire_pipe(
        &mut self,
        pipe: CompId,
        trunk_comp: CompId,
        branch_comp: CompId,
    ) -> FittingResult<()> {
        let loop_back = self.tree.get(branch_comp)?.branches.contains(&trunk_comp);
        if loop_back {
            // the two fittings already face each other across a loop; the
            // run replaces the direct link on the branch side
            let locator = self.tree.get(trunk_comp)?.locator.clone();
            let bc = self.tree.get_mut(branch_comp)?;
            for b in bc.branches.iter_mut() {
                if *b == trunk_comp {
                    *b = pipe;
                }
            }
            self.tree.get_mut(pipe)?.locator = locator;
        } else {
            let locator = self.tree.get(branch_comp)?.locator.clone();
            self.tree.get_mut(branch_comp)?.trunk = Some(pipe);
            self.tree.get_mut(pipe)?.locator = locator;
        }
        self.tree.get_mut(pipe)?.branches = vec![branch_comp];
        let tc = self.tree.get_mut(trunk_comp)?;
        tc.branches.retain(|&b| b != branch_comp);
        tc.branches.push(pipe);
        self.tree.get_mut(pipe)?.trunk = Some(trunk_comp);
        Ok(())
    }
}

struct DiameterPlan {
    pipe_diameter: Real,
    /// Diameter the trunk end must be adapted to, when it disagrees.
    trunk_reducer: Option<Real>,
    branch_reducer: Option<Real>,
}
