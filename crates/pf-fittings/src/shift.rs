//! Pending-shift propagation and terminal balancing.
//!
//! When a fitting is nudged off its nominal position (an eccentric reducer,
//! a terminal that must land on a fixed point) the correction is stored as
//! a pending translation instead of being applied immediately. Fittings
//! absorb a shift into their pending state and forward it unchanged. A
//! straight run is the only thing that can dissolve a shift: the component
//! along its own axis is absorbed by letting the run change length, and
//! only the lateral remainder travels on.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use pf_core::{CompId, Pt3, Real, Vec3};
use tracing::debug;

use crate::arena::FittingTree;
use crate::component::Body;
use crate::error::FittingResult;

/// Which way a shift travels through the component graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShiftDirection {
    TrunkToBranch,
    BranchToTrunk,
}

/// A translation waiting to be applied to a component and its ports.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PendingShift {
    pub translation: Vec3,
}

impl PendingShift {
    pub fn identity() -> Self {
        Self::default()
    }

    pub fn from_translation(translation: Vec3) -> Self {
        Self { translation }
    }

    pub fn is_identity(&self) -> bool {
        self.translation.norm() <= 1e-12
    }

    pub fn concat(&mut self, other: &PendingShift) {
        self.translation += other.translation;
    }

    pub fn inverted(&self) -> Self {
        Self {
            translation: -self.translation,
        }
    }

    pub fn of_point(&self, p: &Pt3) -> Pt3 {
        p + self.translation
    }
}

impl FittingTree {
    /// Feed a shift into `comp`. Returns true when the (possibly reduced)
    /// shift should continue past this component, false when it was fully
    /// absorbed.
    pub fn propagate_shift(
        &mut self,
        comp: CompId,
        shift: &PendingShift,
        direction: ShiftDirection,
    ) -> FittingResult<bool> {
        if shift.is_identity() {
            return Ok(true);
        }
        let tol = self.tolerances();
        let c = self.get_mut(comp)?;
        let Body::Straight(ref seg) = c.body else {
            c.pending.concat(shift);
            return Ok(true);
        };

        let (near, far) = match direction {
            ShiftDirection::TrunkToBranch => (seg.end.position, seg.start.position),
            ShiftDirection::BranchToTrunk => (seg.start.position, seg.end.position),
        };
        let span = far - near;
        let length = span.norm();
        if length <= tol.distance {
            c.pending.concat(shift);
            return Ok(true);
        }
        let axis = span / length;

        let t = shift.translation;
        let axial: Real = t.dot(&axis);
        if axial.abs() <= 1e-12 {
            // pure lateral movement, the whole run slides sideways
            c.pending.concat(shift);
            return Ok(true);
        }

        let leftover = if axial < length {
            t - axis * axial
        } else {
            // the run is consumed entirely, forward what is left past the far end
            t - axis * length
        };
        if leftover.norm() <= 1e-12 {
            // absorbed by a length change
            return Ok(false);
        }
        c.pending.concat(&PendingShift::from_translation(leftover));
        Ok(true)
    }

    /// Apply a component's pending shift to its geometry and clear it.
    pub fn apply_shift(&mut self, comp: CompId) -> FittingResult<()> {
        let c = self.get_mut(comp)?;
        let shift = c.pending;
        if shift.is_identity() {
            c.pending = PendingShift::identity();
            return Ok(());
        }
        c.body.translate(&shift.translation);
        c.pending = PendingShift::identity();
        Ok(())
    }

    pub fn clear_shift(&mut self, comp: CompId) -> FittingResult<()> {
        self.get_mut(comp)?.pending = PendingShift::identity();
        Ok(())
    }

    /// Balance a terminal's correction shift across the network.
    ///
    /// Phase one pushes the shift trunk-ward hop by hop until a straight run
    /// absorbs it; phase two pushes the remainder back out to every branch
    /// that was not already moved. All touched components are logged; on
    /// success every logged shift is applied, on failure every logged shift
    /// is discarded and the tree is untouched.
    pub fn balance_terminal_shift(
        &mut self,
        terminal: CompId,
        shift: &PendingShift,
    ) -> FittingResult<bool> {
        if shift.is_identity() {
            return Ok(true);
        }

        let mut touched: Vec<CompId> = Vec::new();
        let mut visited: HashSet<CompId> = HashSet::new();
        let balanced = self.balance_to_trunk(shift, terminal, &mut visited, &mut touched)?;
        if balanced {
            for comp in &touched {
                self.apply_shift(*comp)?;
            }
            self.resync_segment_ports()?;
        } else {
            debug!(?terminal, "terminal shift could not be balanced, rolling back");
            for comp in &touched {
                self.clear_shift(*comp)?;
            }
        }
        Ok(balanced)
    }

    fn mark_visited(
        &self,
        comp: CompId,
        visited: &mut HashSet<CompId>,
        touched: &mut Vec<CompId>,
    ) -> FittingResult<()> {
        if visited.insert(comp) {
            touched.push(comp);
        }
        if let Body::Assembly(ref assembly) = self.get(comp)?.body {
            for internal in assembly.internals.clone() {
                if visited.insert(internal) {
                    touched.push(internal);
                }
            }
        }
        Ok(())
    }

    fn balance_to_trunk(
        &mut self,
        shift: &PendingShift,
        comp: CompId,
        visited: &mut HashSet<CompId>,
        touched: &mut Vec<CompId>,
    ) -> FittingResult<bool> {
        self.mark_visited(comp, visited, touched)?;

        if !self.propagate_shift(comp, shift, ShiftDirection::BranchToTrunk)? {
            // fully absorbed, nothing travels further
            return Ok(true);
        }
        let forwarded = self.get(comp)?.pending;
        let Some(trunk) = self.get(comp)?.trunk else {
            return Ok(false);
        };
        if self.balance_to_trunk(&forwarded, trunk, visited, touched)? {
            self.balance_to_branches(comp, visited, touched)
        } else {
            Ok(false)
        }
    }

    fn balance_to_branches(
        &mut self,
        comp: CompId,
        visited: &mut HashSet<CompId>,
        touched: &mut Vec<CompId>,
    ) -> FittingResult<bool> {
        let branches = self.get(comp)?.branches.clone();
        if branches.is_empty() {
            return Ok(visited.contains(&comp));
        }

        let shift = self.get(comp)?.pending;
        let mut dissolved = true;
        for branch in branches {
            if visited.contains(&branch) {
                continue;
            }
            if let Body::Assembly(ref assembly) = self.get(branch)?.body {
                if assembly.internals.iter().any(|i| visited.contains(i)) {
                    continue;
                }
            }
            if self.propagate_shift(branch, &shift, ShiftDirection::TrunkToBranch)? {
                dissolved &= self.balance_to_branches(branch, visited, touched)?;
                self.mark_visited(branch, visited, touched)?;
            }
        }
        Ok(dissolved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::{BuildOptions, build};
    use crate::export::to_json;
    use crate::routing::FittingTreeRouting;
    use pf_flow::FlowTree;

    #[test]
    fn identity_shift_is_cheap() {
        let s = PendingShift::identity();
        assert!(s.is_identity());
        assert!(s.inverted().is_identity());
    }

    #[test]
    fn concat_adds_translations() {
        let mut a = PendingShift::from_translation(Vec3::new(1.0, 0.0, 0.0));
        a.concat(&PendingShift::from_translation(Vec3::new(0.0, 2.0, 0.0)));
        assert_eq!(a.translation, Vec3::new(1.0, 2.0, 0.0));
        let p = a.of_point(&Pt3::origin());
        assert_eq!(p, Pt3::new(1.0, 2.0, 0.0));
    }

    fn bent_trunk() -> (FittingTree, CompId) {
        // outlet at the origin, elbow at (2,0,0), leaf at (2,2,0)
        let mut flow = FlowTree::new();
        let out = flow.add_outlet(Pt3::origin(), 0.0).unwrap();
        let corner = flow.add_internal(Pt3::new(2.0, 0.0, 0.0));
        let leaf = flow.add_inlet(Pt3::new(2.0, 2.0, 0.0), 1.0);
        flow.connect(leaf, corner, 0.05).unwrap();
        flow.connect(corner, out, 0.05).unwrap();
        let routing = FittingTreeRouting::default();
        let (tree, report) = build(&mut flow, &routing, &BuildOptions::default()).unwrap();
        assert!(report.is_clean());
        let terminal = tree
            .iter()
            .find(|c| c.is_terminal() && c.trunk.is_some())
            .map(|c| c.id)
            .unwrap();
        (tree, terminal)
    }

    fn terminal_position(tree: &FittingTree, terminal: CompId) -> Pt3 {
        let Body::Terminal(t) = &tree.get(terminal).unwrap().body else {
            panic!()
        };
        t.position
    }

    #[test]
    fn mixed_shift_dissolves_across_a_bent_trunk() {
        let (mut tree, terminal) = bent_trunk();
        let before = terminal_position(&tree, terminal);

        // the vertical run eats the y component, the horizontal run the x
        let shift = PendingShift::from_translation(Vec3::new(0.01, 0.02, 0.0));
        let balanced = tree.balance_terminal_shift(terminal, &shift).unwrap();
        assert!(balanced);

        let after = terminal_position(&tree, terminal);
        assert!((after - (before + shift.translation)).norm() < 1e-9);
        for c in tree.iter() {
            assert!(c.pending.is_identity(), "{} kept a pending shift", c.name);
        }
        tree.check_links().unwrap();
    }

    #[test]
    fn unabsorbable_shift_rolls_the_tree_back() {
        // a single collinear run cannot absorb a lateral shift; it travels
        // to the outlet terminal and fails there
        let mut flow = FlowTree::new();
        let out = flow.add_outlet(Pt3::origin(), 0.0).unwrap();
        let leaf = flow.add_inlet(Pt3::new(2.0, 0.0, 0.0), 1.0);
        flow.connect(leaf, out, 0.05).unwrap();
        let routing = FittingTreeRouting::default();
        let (mut tree, report) = build(&mut flow, &routing, &BuildOptions::default()).unwrap();
        assert!(report.is_clean());
        let terminal = tree
            .iter()
            .find(|c| c.is_terminal() && c.trunk.is_some())
            .map(|c| c.id)
            .unwrap();
        let snapshot = to_json(&tree).unwrap();

        let shift = PendingShift::from_translation(Vec3::new(0.0, 0.01, 0.0));
        let balanced = tree.balance_terminal_shift(terminal, &shift).unwrap();
        assert!(!balanced);
        assert_eq!(to_json(&tree).unwrap(), snapshot);
    }
}
