//! Edit operations on a built tree.
//!
//! All edits preserve the link invariants and re-label affected sections
//! before returning. Operations that cannot be carried out fail before the
//! tree is touched, so a caller never sees a half-edited network.

use pf_core::{CompId, Real, approx_eq};

use crate::arena::FittingTree;
use crate::catalog::CouplerPart;
use crate::component::{Body, Coupler};
use crate::error::{FittingError, FittingResult};
use crate::port::{Port, PortDimensions};
use crate::routing::FittingTreeRouting;
use crate::sections::assign_labels;

const DIAMETER_EPS: Real = 1e-9;

impl FittingTree {
    /// Split a straight run at `distance_from_start`, inserting a
    /// same-diameter joint. Returns the joint and the new trunk-side run.
    pub fn split_pipe(
        &mut self,
        routing: &FittingTreeRouting,
        pipe: CompId,
        distance_from_start: Real,
    ) -> FittingResult<(CompId, CompId)> {
        let (diameter, length, end_port, old_trunk) = {
            let c = self.get(pipe)?;
            let Body::Straight(ref seg) = c.body else {
                return Err(FittingError::BadOperation {
                    what: "only a straight run can be split".to_string(),
                });
            };
            let Some(t) = c.trunk else {
                return Err(FittingError::BadOperation {
                    what: "cannot split a run with no trunk side".to_string(),
                });
            };
            (seg.diameter, c.body.length(), seg.end.clone(), t)
        };

        let joint_length = routing.reducer_length(diameter, diameter);
        if joint_length > distance_from_start || joint_length > length - distance_from_start {
            return Err(FittingError::PipeTooShort {
                needed: joint_length,
                available: distance_from_start.min(length - distance_from_start),
            });
        }

        let joint = routing.reduce_or_join(self, pipe, true, diameter, distance_from_start)?;
        let joint_start = self.get(joint)?.body.port(0).cloned().ok_or(
            FittingError::LinkInvariant {
                what: "joint lost its ports".to_string(),
            },
        )?;
        let joint_end = self.get(joint)?.body.port(1).cloned().ok_or(
            FittingError::LinkInvariant {
                what: "joint lost its ports".to_string(),
            },
        )?;

        // the kept run shrinks to the branch-side piece
        if let Body::Straight(ref mut seg) = self.get_mut(pipe)?.body {
            seg.end = joint_start;
        }
        self.get_mut(pipe)?.trunk = Some(joint);
        self.get_mut(joint)?.branches.push(pipe);
        self.get_mut(old_trunk)?.branches.retain(|&b| b != pipe);

        let locator = self.get(pipe)?.locator.clone();
        let new_pipe = self.insert(Body::Straight(crate::component::Straight {
            start: joint_end,
            end: end_port,
            diameter,
        }));
        {
            let np = self.get_mut(new_pipe)?;
            np.locator = locator;
            np.trunk = Some(old_trunk);
            np.branches = vec![joint];
        }
        self.get_mut(old_trunk)?.branches.push(new_pipe);
        self.get_mut(joint)?.trunk = Some(new_pipe);

        assign_labels(self);
        self.check_links()?;
        Ok((joint, new_pipe))
    }

    /// Change a straight run's diameter, reworking the reducers at both
    /// ends: stale reducers are dropped, deliberate same-diameter joints
    /// are preserved, and new reducers appear wherever a neighbor port
    /// disagrees with the new bore. Resizing to the current diameter is a
    /// no-op in structure.
    pub fn resize_pipe(
        &mut self,
        routing: &FittingTreeRouting,
        pipe: CompId,
        new_diameter: Real,
    ) -> FittingResult<()> {
        {
            let c = self.get(pipe)?;
            if !c.is_straight() {
                return Err(FittingError::BadOperation {
                    what: "only a straight run can be resized".to_string(),
                });
            }
            if c.branches.len() != 1 {
                return Err(FittingError::BadOperation {
                    what: "resize needs exactly one branch-side component".to_string(),
                });
            }
        }
        self.clear_shift(pipe)?;

        // stale adjacent reducers go away; joints at the new bore stay
        if let Some(t) = self.get(pipe)?.trunk {
            if self.get(t)?.is_reducer() && !self.is_joint(t, new_diameter)? {
                self.remove_reducer_trunk_side(pipe, t)?;
            }
        }
        let branch = self.get(pipe)?.branches[0];
        if self.get(branch)?.is_reducer() && !self.is_joint(branch, new_diameter)? {
            self.remove_reducer_branch_side(pipe, branch)?;
        }

        // reducer removal can leave this run against another run of the
        // target bore; fold them together
        if let Some(t) = self.get(pipe)?.trunk {
            if self.segment_diameter(t)? == Some(new_diameter) {
                self.merge_trunk_side(pipe, t)?;
            }
        }
        let branch = self.get(pipe)?.branches[0];
        if self.segment_diameter(branch)? == Some(new_diameter) {
            self.merge_branch_side(pipe, branch)?;
        }

        if let Body::Straight(ref mut seg) = self.get_mut(pipe)?.body {
            seg.diameter = new_diameter;
            seg.start.diameter = new_diameter;
            seg.end.diameter = new_diameter;
        }

        // rest each end on its neighbor, adapting where the bores differ
        if let Some(t) = self.get(pipe)?.trunk {
            let end_pos = self.segment_end_position(pipe)?;
            if let Some(p) = self.closest_port(t, &end_pos)? {
                let neighbor = self.port(p)?.clone();
                if approx_eq(neighbor.diameter, new_diameter, DIAMETER_EPS) {
                    if let Body::Straight(ref mut seg) = self.get_mut(pipe)?.body {
                        seg.end = neighbor;
                    }
                } else {
                    if let Body::Straight(ref mut seg) = self.get_mut(pipe)?.body {
                        seg.end.position = neighbor.position;
                    }
                    let r = routing.reduce_or_join(self, pipe, false, neighbor.diameter, 0.0)?;
                    self.add_reducer_trunk_side(pipe, r, t)?;
                }
            }
        }
        let branch = self.get(pipe)?.branches[0];
        let start_pos = self.segment_start_position(pipe)?;
        if let Some(p) = self.closest_port(branch, &start_pos)? {
            let neighbor = self.port(p)?.clone();
            if approx_eq(neighbor.diameter, new_diameter, DIAMETER_EPS) {
                if let Body::Straight(ref mut seg) = self.get_mut(pipe)?.body {
                    seg.start = neighbor;
                }
            } else {
                if let Body::Straight(ref mut seg) = self.get_mut(pipe)?.body {
                    seg.start.position = neighbor.position;
                }
                let r = routing.reduce_or_join(self, pipe, true, neighbor.diameter, 0.0)?;
                self.add_reducer_branch_side(pipe, r, branch)?;
            }
        }

        assign_labels(self);
        self.check_links()
    }

    /// Insert a coupler at one end of a straight run.
    pub fn place_coupler(
        &mut self,
        pipe: CompId,
        at_start: bool,
        part: &CouplerPart,
    ) -> FittingResult<CompId> {
        let length = self.get(pipe)?.body.length();
        if part.length > length {
            return Err(FittingError::PipeTooShort {
                needed: part.length,
                available: length,
            });
        }
        let coupler = if at_start {
            let offset = 0.0;
            let coupler = self.build_coupler(pipe, offset, part)?;
            self.wire_coupler_at_start(pipe, coupler)?
        } else {
            let offset = length - part.length;
            let coupler = self.build_coupler(pipe, offset, part)?;
            self.wire_coupler_at_end(pipe, coupler)?
        };
        assign_labels(self);
        self.check_links()?;
        Ok(coupler)
    }

    /// Insert several couplers along one run, cutting it into pieces.
    /// Placements are distances from the run's start; they are sorted and
    /// must not overlap.
    pub fn place_couplers(
        &mut self,
        pipe: CompId,
        placements: &[(Real, CouplerPart)],
    ) -> FittingResult<Vec<CompId>> {
        let tol = self.tolerances();
        let total = self.get(pipe)?.body.length();
        let mut sorted: Vec<(Real, CouplerPart)> = placements.to_vec();
        sorted.sort_by(|a, b| a.0.total_cmp(&b.0));
        let mut cursor = 0.0;
        for (d, part) in &sorted {
            if *d < cursor - tol.distance || d + part.length > total + tol.distance {
                return Err(FittingError::PipeTooShort {
                    needed: part.length,
                    available: total - d,
                });
            }
            cursor = d + part.length;
        }

        let mut placed = Vec::new();
        let mut active = pipe;
        let mut offset = 0.0;
        for (d, part) in sorted {
            let local = d - offset;
            let coupler = if local <= tol.distance {
                let c = self.build_coupler(active, 0.0, &part)?;
                self.wire_coupler_at_start(active, c)?
            } else {
                let c = self.build_coupler(active, local, &part)?;
                let (coupler, new_run) = self.cut_run_with_coupler(active, c)?;
                if let Some(run) = new_run {
                    active = run;
                }
                coupler
            };
            placed.push(coupler);
            offset = d + part.length;
        }
        assign_labels(self);
        self.check_links()?;
        Ok(placed)
    }

    /// Fold any directly adjacent straight run of the same bore into
    /// `pipe`, on either side.
    pub fn merge_pipes(&mut self, pipe: CompId) -> FittingResult<()> {
        let Some(diameter) = self.segment_diameter(pipe)? else {
            return Err(FittingError::BadOperation {
                what: "only a straight run can absorb its neighbors".to_string(),
            });
        };
        if let Some(t) = self.get(pipe)?.trunk {
            if self.segment_diameter(t)? == Some(diameter) {
                self.merge_trunk_side(pipe, t)?;
            }
        }
        let branches = self.get(pipe)?.branches.clone();
        if let [branch] = branches[..] {
            if self.segment_diameter(branch)? == Some(diameter) {
                self.merge_branch_side(pipe, branch)?;
            }
        }
        assign_labels(self);
        self.check_links()
    }

    fn is_joint(&self, reducer: CompId, diameter: Real) -> FittingResult<bool> {
        let Body::Reducer(ref r) = self.get(reducer)?.body else {
            return Ok(false);
        };
        Ok(approx_eq(r.start.diameter, diameter, DIAMETER_EPS)
            && approx_eq(r.end.diameter, diameter, DIAMETER_EPS))
    }

    fn segment_diameter(&self, comp: CompId) -> FittingResult<Option<Real>> {
        Ok(match self.get(comp)?.body {
            Body::Straight(ref s) => Some(s.diameter),
            _ => None,
        })
    }

    fn segment_start_position(&self, comp: CompId) -> FittingResult<pf_core::Pt3> {
        match self.get(comp)?.body {
            Body::Straight(ref s) => Ok(s.start.position),
            _ => Err(FittingError::BadOperation {
                what: "not a straight run".to_string(),
            }),
        }
    }

    fn segment_end_position(&self, comp: CompId) -> FittingResult<pf_core::Pt3> {
        match self.get(comp)?.body {
            Body::Straight(ref s) => Ok(s.end.position),
            _ => Err(FittingError::BadOperation {
                what: "not a straight run".to_string(),
            }),
        }
    }

    fn remove_reducer_trunk_side(&mut self, pipe: CompId, reducer: CompId) -> FittingResult<()> {
        let beyond = self.get(reducer)?.trunk;
        self.get_mut(pipe)?.trunk = beyond;
        if let Some(t) = beyond {
            let tc = self.get_mut(t)?;
            for b in tc.branches.iter_mut() {
                if *b == reducer {
                    *b = pipe;
                }
            }
        }
        self.remove(reducer);
        Ok(())
    }

    fn remove_reducer_branch_side(&mut self, pipe: CompId, reducer: CompId) -> FittingResult<()> {
        let beyond = self.get(reducer)?.branches.clone();
        let kept: Vec<CompId> = beyond.into_iter().filter(|&b| b != pipe).collect();
        self.get_mut(pipe)?.branches = kept.clone();
        for b in kept {
            let bc = self.get_mut(b)?;
            if bc.trunk == Some(reducer) {
                bc.trunk = Some(pipe);
            }
            for x in bc.branches.iter_mut() {
                if *x == reducer {
                    *x = pipe;
                }
            }
        }
        self.remove(reducer);
        Ok(())
    }

    /// Fold a trunk-side run into `pipe`.
    fn merge_trunk_side(&mut self, pipe: CompId, absorbed: CompId) -> FittingResult<()> {
        let (end, beyond) = {
            let c = self.get(absorbed)?;
            let Body::Straight(ref s) = c.body else {
                return Err(FittingError::BadOperation {
                    what: "not a straight run".to_string(),
                });
            };
            (s.end.clone(), c.trunk)
        };
        if let Body::Straight(ref mut seg) = self.get_mut(pipe)?.body {
            seg.end = end;
        }
        self.get_mut(pipe)?.trunk = beyond;
        if let Some(t) = beyond {
            let tc = self.get_mut(t)?;
            for b in tc.branches.iter_mut() {
                if *b == absorbed {
                    *b = pipe;
                }
            }
        }
        self.remove(absorbed);
        Ok(())
    }

    /// Fold a branch-side run into `pipe`.
    fn merge_branch_side(&mut self, pipe: CompId, absorbed: CompId) -> FittingResult<()> {
        let (start, beyond) = {
            let c = self.get(absorbed)?;
            let Body::Straight(ref s) = c.body else {
                return Err(FittingError::BadOperation {
                    what: "not a straight run".to_string(),
                });
            };
            (s.start.clone(), c.branches.clone())
        };
        if let Body::Straight(ref mut seg) = self.get_mut(pipe)?.body {
            seg.start = start;
        }
        self.get_mut(pipe)?.branches = beyond.clone();
        for b in beyond {
            let bc = self.get_mut(b)?;
            if bc.trunk == Some(absorbed) {
                bc.trunk = Some(pipe);
            }
            for x in bc.branches.iter_mut() {
                if *x == absorbed {
                    *x = pipe;
                }
            }
        }
        self.remove(absorbed);
        Ok(())
    }

    /// Construct an unwired coupler body sitting `offset` from the run's
    /// start.
    fn build_coupler(
        &mut self,
        pipe: CompId,
        offset: Real,
        part: &CouplerPart,
    ) -> FittingResult<CompId> {
        let (start_pos, end_pos, diameter, locator) = {
            let c = self.get(pipe)?;
            let Body::Straight(ref s) = c.body else {
                return Err(FittingError::BadOperation {
                    what: "couplers go on straight runs".to_string(),
                });
            };
            (s.start.position, s.end.position, s.diameter, c.locator.clone())
        };
        let span = end_pos - start_pos;
        let length = span.norm();
        if length <= 1e-12 {
            return Err(FittingError::cannot_connect(
                "cannot place a coupler on a zero-length run",
                start_pos,
            ));
        }
        let axis = span / length;
        let a = start_pos + axis * offset;
        let b = start_pos + axis * (offset + part.length);
        let dims = Some(PortDimensions::new(part.extension, 0.0, 0.0));
        let mut start = Port::new(a, -axis, diameter);
        let mut end = Port::new(b, axis, diameter);
        start.dimensions = dims;
        end.dimensions = dims;
        let id = self.insert(Body::Coupler(Coupler {
            position: a + (b - a) / 2.0,
            start,
            end,
            diameter,
        }));
        let c = self.get_mut(id)?;
        c.locator = locator;
        Ok(id)
    }

    /// Coupler between the run and its branch side; the run shortens.
    fn wire_coupler_at_start(&mut self, pipe: CompId, coupler: CompId) -> FittingResult<CompId> {
        let old_branches = self.get(pipe)?.branches.clone();
        let coupler_end = self.get(coupler)?.body.port(1).cloned();
        {
            let c = self.get_mut(coupler)?;
            c.branches = old_branches.clone();
            c.trunk = Some(pipe);
        }
        for b in old_branches {
            let bc = self.get_mut(b)?;
            if bc.trunk == Some(pipe) {
                bc.trunk = Some(coupler);
            }
            for x in bc.branches.iter_mut() {
                if *x == pipe {
                    *x = coupler;
                }
            }
        }
        self.get_mut(pipe)?.branches = vec![coupler];
        if let (Some(end), Body::Straight(seg)) =
            (coupler_end, &mut self.get_mut(pipe)?.body)
        {
            seg.start = end;
        }
        Ok(coupler)
    }

    /// Coupler between the run and its trunk side; the run shortens.
    fn wire_coupler_at_end(&mut self, pipe: CompId, coupler: CompId) -> FittingResult<CompId> {
        let old_trunk = self.get(pipe)?.trunk;
        let coupler_start = self.get(coupler)?.body.port(0).cloned();
        {
            let c = self.get_mut(coupler)?;
            c.trunk = old_trunk;
            c.branches = vec![pipe];
        }
        if let Some(t) = old_trunk {
            let tc = self.get_mut(t)?;
            for b in tc.branches.iter_mut() {
                if *b == pipe {
                    *b = coupler;
                }
            }
        }
        self.get_mut(pipe)?.trunk = Some(coupler);
        if let (Some(start), Body::Straight(seg)) =
            (coupler_start, &mut self.get_mut(pipe)?.body)
        {
            seg.end = start;
        }
        Ok(coupler)
    }

    /// Cut a run in two around an interior coupler. Returns the coupler
    /// and the new trunk-side run, which is omitted when the coupler ends
    /// flush with the run.
    fn cut_run_with_coupler(
        &mut self,
        pipe: CompId,
        coupler: CompId,
    ) -> FittingResult<(CompId, Option<CompId>)> {
        let tol = self.tolerances();
        let (end_port, diameter, old_trunk, locator) = {
            let c = self.get(pipe)?;
            let Body::Straight(ref s) = c.body else {
                return Err(FittingError::BadOperation {
                    what: "couplers go on straight runs".to_string(),
                });
            };
            let Some(t) = c.trunk else {
                return Err(FittingError::BadOperation {
                    what: "cannot cut a run with no trunk side".to_string(),
                });
            };
            (s.end.clone(), s.diameter, t, c.locator.clone())
        };
        let coupler_start =
            self.get(coupler)?
                .body
                .port(0)
                .cloned()
                .ok_or(FittingError::LinkInvariant {
                    what: "coupler lost its ports".to_string(),
                })?;
        let coupler_end =
            self.get(coupler)?
                .body
                .port(1)
                .cloned()
                .ok_or(FittingError::LinkInvariant {
                    what: "coupler lost its ports".to_string(),
                })?;

        if let Body::Straight(ref mut seg) = self.get_mut(pipe)?.body {
            seg.end = coupler_start;
        }
        self.get_mut(pipe)?.trunk = Some(coupler);
        self.get_mut(coupler)?.branches = vec![pipe];
        self.get_mut(old_trunk)?.branches.retain(|&b| b != pipe);

        let remaining = (end_port.position - coupler_end.position).norm();
        if remaining <= tol.distance {
            // coupler reaches the old end; link it straight to the trunk
            self.get_mut(coupler)?.trunk = Some(old_trunk);
            self.get_mut(old_trunk)?.branches.push(coupler);
            return Ok((coupler, None));
        }

        let new_run = self.insert(Body::Straight(crate::component::Straight {
            start: coupler_end,
            end: end_port,
            diameter,
        }));
        {
            let nr = self.get_mut(new_run)?;
            nr.locator = locator;
            nr.trunk = Some(old_trunk);
            nr.branches = vec![coupler];
        }
        self.get_mut(old_trunk)?.branches.push(new_run);
        self.get_mut(coupler)?.trunk = Some(new_run);
        Ok((coupler, Some(new_run)))
    }
}
