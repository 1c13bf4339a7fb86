//! Node routing: choosing a fitting for each flow-tree node.
//!
//! The routing inspects a node's incoming and outgoing connections and
//! produces the fitting body that realizes the junction. Loop-closing
//! connections leaving a node are folded into its incoming set, so a node
//! that feeds a loop still routes as a plain junction. Custom routers
//! override `fitting_for_node` to substitute fittings or absorb neighbor
//! nodes into one assembly.

use serde::{Deserialize, Serialize};

use pf_core::{NodeId, Pt3, Real, Vec3, angle_between_deg, approx_eq, round_angle};
use pf_flow::{Connection, FlowTree};

use crate::arena::FittingTree;
use crate::catalog::FittingCatalog;
use crate::component::{Body, Cross, Elbow, Manifold, Reducer, Terminal, Wye};
use crate::error::{FittingError, FittingResult};
use crate::port::{Port, PortDimensions};

/// Stub length of a terminal's connection port.
const TERMINAL_STUB: Real = 0.03;
/// Reducer length when the catalog has no matching part.
const DEFAULT_REDUCER_LENGTH: Real = 0.03;
/// Length of an inline diameter-change fitting without a catalog part.
const CHANGE_PIPE_LENGTH: Real = 0.2;

/// The fitting chosen for one node, plus any neighbor nodes it absorbed.
#[derive(Debug, Clone)]
pub struct RoutedNode {
    pub body: Body,
    /// Nodes swallowed into this fitting; the builder wires around them.
    pub absorbed: Vec<NodeId>,
}

impl RoutedNode {
    pub fn plain(body: Body) -> Self {
        Self {
            body,
            absorbed: Vec::new(),
        }
    }
}

/// Routing parameters and catalog access.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FittingTreeRouting {
    /// Angle matching tolerance in degrees.
    pub angle_tolerance: Real,
    /// Port position matching tolerance in meters.
    pub port_distance_tolerance: Real,
    /// Diameter used when a connection carries none.
    pub default_diameter: Real,
    /// Branch takeoff angles a wye may realize, in degrees.
    pub allowed_branch_angles: Vec<Real>,
    /// Fitting side lengths default to diameter times this.
    pub length_multiplier: Real,
    /// Resize straight runs to match their connection's diameter.
    pub pipe_size_matches_connection: bool,
    pub catalog: Option<FittingCatalog>,
}

impl Default for FittingTreeRouting {
    fn default() -> Self {
        Self {
            angle_tolerance: 1.0,
            port_distance_tolerance: 1e-3,
            default_diameter: 0.04,
            allowed_branch_angles: vec![45.0, 90.0, 180.0],
            length_multiplier: 1.1,
            pipe_size_matches_connection: true,
            catalog: None,
        }
    }
}

/// Hook for substituting fittings per node. The default implementation
/// delegates to the routing's topology switch; overriders return their own
/// `RoutedNode` (possibly absorbing neighbors) or fall back to it.
pub trait NodeRouter {
    fn routing(&self) -> &FittingTreeRouting;

    fn fitting_for_node(&self, tree: &FlowTree, node: NodeId) -> FittingResult<Option<RoutedNode>> {
        self.routing().route_node(tree, node)
    }
}

impl NodeRouter for FittingTreeRouting {
    fn routing(&self) -> &FittingTreeRouting {
        self
    }
}

/// One flow path entering a node, with loop-closing outgoing connections
/// already folded in (their direction inverted).
struct Inflow {
    /// Unit direction pointing into the node.
    direction: Vec3,
    diameter: Real,
}

impl FittingTreeRouting {
    pub fn route_node(&self, tree: &FlowTree, node: NodeId) -> FittingResult<Option<RoutedNode>> {
        let position = tree
            .node(node)
            .ok_or(FittingError::Flow(pf_flow::FlowError::UnknownNode(node)))?
            .position;

        let mut inflows: Vec<Inflow> = Vec::new();
        for conn in tree.incoming_connections(node) {
            inflows.push(Inflow {
                direction: self.direction_of(tree, conn, &position)?,
                diameter: conn.diameter,
            });
        }
        let mut outgoing: Option<&Connection> = None;
        for conn in tree.outgoing_connections(node) {
            if conn.is_loop {
                inflows.push(Inflow {
                    direction: -self.direction_of(tree, conn, &position)?,
                    diameter: conn.diameter,
                });
            } else {
                outgoing = Some(conn);
            }
        }

        let body = match (inflows.len(), outgoing) {
            (0, Some(out)) => self.terminate_leaf(tree, node, &position, out)?,
            (1, None) => self.terminate_trunk(node, &position, &inflows[0]),
            (0, None) => {
                return Err(FittingError::UnsupportedTopology {
                    incoming: 0,
                    outgoing: 0,
                });
            }
            (_, None) => {
                return Err(FittingError::UnsupportedTopology {
                    incoming: inflows.len(),
                    outgoing: 0,
                });
            }
            (1, Some(out)) => self.route_run(tree, &position, &inflows[0], out)?,
            (2, Some(out)) => self.branch_pipe(tree, &position, &inflows, out)?,
            (_, Some(out)) => match self.manifold_pipe(tree, &position, &inflows, out)? {
                Some(body) => body,
                None => return Ok(None),
            },
        };
        Ok(Some(RoutedNode::plain(body)))
    }

    fn direction_of(
        &self,
        tree: &FlowTree,
        conn: &Connection,
        at: &Pt3,
    ) -> FittingResult<Vec3> {
        conn.direction(tree)
            .ok_or_else(|| FittingError::cannot_connect("zero-length connection", *at))
    }

    fn diameter_or_default(&self, diameter: Real) -> Real {
        if diameter > 0.0 {
            diameter
        } else {
            self.default_diameter
        }
    }

    fn terminate_leaf(
        &self,
        tree: &FlowTree,
        node: NodeId,
        position: &Pt3,
        outgoing: &Connection,
    ) -> FittingResult<Body> {
        let dir = self.direction_of(tree, outgoing, position)?;
        let diameter = self.diameter_or_default(outgoing.diameter);
        Ok(Body::Terminal(Terminal {
            position: *position,
            port: Port::new(position + dir * TERMINAL_STUB, dir, diameter),
            node: Some(node),
        }))
    }

    fn terminate_trunk(&self, node: NodeId, position: &Pt3, inflow: &Inflow) -> Body {
        let diameter = self.diameter_or_default(inflow.diameter);
        // the port faces back up the incoming run
        Body::Terminal(Terminal {
            position: *position,
            port: Port::new(
                position - inflow.direction * TERMINAL_STUB,
                -inflow.direction,
                diameter,
            ),
            node: Some(node),
        })
    }

    fn route_run(
        &self,
        tree: &FlowTree,
        position: &Pt3,
        inflow: &Inflow,
        outgoing: &Connection,
    ) -> FittingResult<Body> {
        let out_dir = self.direction_of(tree, outgoing, position)?;
        let turn = angle_between_deg(&inflow.direction, &out_dir);
        if turn <= self.angle_tolerance {
            Ok(self.change_pipe(position, &out_dir, inflow, outgoing))
        } else {
            self.create_elbow(position, inflow, &out_dir, outgoing, turn)
        }
    }

    /// Inline fitting joining two collinear connections. With equal
    /// diameters it is a joint, otherwise a taper.
    fn change_pipe(
        &self,
        position: &Pt3,
        axis: &Vec3,
        inflow: &Inflow,
        outgoing: &Connection,
    ) -> Body {
        let branch_d = self.diameter_or_default(inflow.diameter);
        let trunk_d = self.diameter_or_default(outgoing.diameter);
        let part = self
            .catalog
            .as_ref()
            .and_then(|c| c.best_reducer(branch_d.max(trunk_d), branch_d.min(trunk_d)));
        let length = part.map_or(CHANGE_PIPE_LENGTH, |p| p.length);
        let mut start = Port::new(position - axis * (length / 2.0), -axis, branch_d);
        let mut end = Port::new(position + axis * (length / 2.0), *axis, trunk_d);
        if let Some(p) = part {
            apply_reducer_extensions(&mut start, &mut end, p.extension_large, p.extension_small);
        }
        Body::Reducer(Reducer {
            position: *position,
            start,
            end,
        })
    }

    fn create_elbow(
        &self,
        position: &Pt3,
        inflow: &Inflow,
        out_dir: &Vec3,
        outgoing: &Connection,
        turn: Real,
    ) -> FittingResult<Body> {
        let diameter = self
            .diameter_or_default(inflow.diameter)
            .max(self.diameter_or_default(outgoing.diameter));
        let part = self.catalog.as_ref().and_then(|c| c.best_elbow(diameter, turn));
        let side = part.map_or(diameter * self.length_multiplier, |p| p.side_length);
        let dims = part.map(|p| PortDimensions::new(p.extension, 0.0, 0.0));
        let mut start = Port::new(
            position - inflow.direction * side,
            -inflow.direction,
            diameter,
        );
        let mut end = Port::new(position + out_dir * side, *out_dir, diameter);
        start.dimensions = dims;
        end.dimensions = dims;
        Ok(Body::Elbow(Elbow {
            position: *position,
            start,
            end,
            angle: turn,
        }))
    }

    /// Two inflows joining one outflow: a wye, or a tee when the two
    /// inflows oppose each other head to head.
    fn branch_pipe(
        &self,
        tree: &FlowTree,
        position: &Pt3,
        inflows: &[Inflow],
        outgoing: &Connection,
    ) -> FittingResult<Body> {
        let trunk_dir = self.direction_of(tree, outgoing, position)?;
        // the inflow closest to the outflow direction is the main run
        let a0 = angle_between_deg(&inflows[0].direction, &trunk_dir);
        let a1 = angle_between_deg(&inflows[1].direction, &trunk_dir);
        let (main, side) = if a0 <= a1 {
            (&inflows[0], &inflows[1])
        } else {
            (&inflows[1], &inflows[0])
        };

        let is_tee =
            (angle_between_deg(&main.direction, &side.direction) - 180.0).abs()
                <= self.angle_tolerance;
        let branch_angle = round_angle(
            angle_between_deg(&side.direction, &trunk_dir),
            self.angle_tolerance,
        );
        if !self
            .allowed_branch_angles
            .iter()
            .any(|&a| approx_eq(a, branch_angle, self.angle_tolerance))
        {
            return Err(FittingError::UnsupportedBranchAngle {
                angle: branch_angle,
            });
        }

        let trunk_d = self.diameter_or_default(outgoing.diameter);
        let (main_d, side_d) = if is_tee {
            // a symmetric tee carries the trunk diameter straight through
            (trunk_d, trunk_d)
        } else {
            (
                self.diameter_or_default(main.diameter),
                self.diameter_or_default(side.diameter),
            )
        };

        let part = self
            .catalog
            .as_ref()
            .and_then(|c| c.best_tee(trunk_d, side_d, branch_angle));
        let default_distance = trunk_d * self.length_multiplier;
        let (mut trunk_distance, mut branch_distance) = part.map_or(
            (default_distance, default_distance),
            |p| (p.trunk_distance, p.branch_distance),
        );
        if is_tee {
            // the catalog lists tees branch-first
            std::mem::swap(&mut trunk_distance, &mut branch_distance);
        }
        let dims = part.map(|p| PortDimensions::new(p.extension, 0.0, 0.0));

        let mut trunk = Port::new(position + trunk_dir * trunk_distance, trunk_dir, trunk_d);
        let mut main_branch = Port::new(
            position - main.direction * trunk_distance,
            -main.direction,
            main_d,
        );
        let mut side_branch = Port::new(
            position - side.direction * branch_distance,
            -side.direction,
            side_d,
        );
        trunk.dimensions = dims;
        main_branch.dimensions = dims;
        side_branch.dimensions = dims;
        Ok(Body::Wye(Wye {
            position: *position,
            trunk,
            main_branch,
            side_branch,
        }))
    }

    /// Three or more inflows. With exactly three and one of them collinear
    /// with the outflow this is a cross; otherwise a manifold is fabricated,
    /// but only when no catalog constrains the choice.
    fn manifold_pipe(
        &self,
        tree: &FlowTree,
        position: &Pt3,
        inflows: &[Inflow],
        outgoing: &Connection,
    ) -> FittingResult<Option<Body>> {
        let trunk_dir = self.direction_of(tree, outgoing, position)?;
        let trunk_d = self.diameter_or_default(outgoing.diameter);

        if inflows.len() == 3 {
            let collinear = inflows
                .iter()
                .position(|i| angle_between_deg(&i.direction, &trunk_dir) <= self.angle_tolerance);
            if let Some(ai) = collinear {
                let through = &inflows[ai];
                let sides: Vec<&Inflow> = inflows
                    .iter()
                    .enumerate()
                    .filter(|&(i, _)| i != ai)
                    .map(|(_, f)| f)
                    .collect();
                return Ok(Some(self.cross_pipe(position, &trunk_dir, trunk_d, through, &sides)));
            }
        }

        if self.catalog.is_some() {
            // no stocked part realizes this junction
            return Ok(None);
        }
        let distance = trunk_d * self.length_multiplier;
        let branches = inflows
            .iter()
            .map(|f| {
                Port::new(
                    position - f.direction * distance,
                    -f.direction,
                    self.diameter_or_default(f.diameter),
                )
            })
            .collect();
        Ok(Some(Body::Manifold(Manifold {
            position: *position,
            trunk: Port::new(position + trunk_dir * distance, trunk_dir, trunk_d),
            branches,
        })))
    }

    fn cross_pipe(
        &self,
        position: &Pt3,
        trunk_dir: &Vec3,
        trunk_d: Real,
        through: &Inflow,
        sides: &[&Inflow],
    ) -> Body {
        let angle_b = round_angle(
            angle_between_deg(&sides[0].direction, trunk_dir),
            self.angle_tolerance,
        );
        let angle_c = round_angle(
            angle_between_deg(&sides[1].direction, trunk_dir),
            self.angle_tolerance,
        );
        let b_d = self.diameter_or_default(sides[0].diameter);
        let c_d = self.diameter_or_default(sides[1].diameter);
        let part = self
            .catalog
            .as_ref()
            .and_then(|c| c.best_cross(trunk_d, b_d, c_d, angle_b, angle_c));
        let default_distance = trunk_d * self.length_multiplier;
        let (pipe_distance, branch_distance) = part.map_or(
            (default_distance, default_distance),
            |p| (p.pipe_distance, p.branch_distance),
        );
        let dims = part.map(|p| PortDimensions::new(p.extension, 0.0, 0.0));

        let mut trunk = Port::new(position + trunk_dir * pipe_distance, *trunk_dir, trunk_d);
        let mut branch_a = Port::new(
            position - through.direction * pipe_distance,
            -through.direction,
            self.diameter_or_default(through.diameter),
        );
        let mut branch_b = Port::new(
            position - sides[0].direction * branch_distance,
            -sides[0].direction,
            b_d,
        );
        let mut branch_c = Port::new(
            position - sides[1].direction * branch_distance,
            -sides[1].direction,
            c_d,
        );
        trunk.dimensions = dims;
        branch_a.dimensions = dims;
        branch_b.dimensions = dims;
        branch_c.dimensions = dims;
        Body::Cross(Cross {
            position: *position,
            trunk,
            branch_a,
            branch_b,
            branch_c,
        })
    }

    /// Installed length a reducer between these two diameters will have.
    pub fn reducer_length(&self, a: Real, b: Real) -> Real {
        self.catalog
            .as_ref()
            .and_then(|c| c.best_reducer(a.max(b), a.min(b)))
            .map_or(DEFAULT_REDUCER_LENGTH, |p| p.length)
    }

    /// Create (but do not wire) a reducer adjacent to a straight run.
    ///
    /// `branch_side` places the reducer near the run's start (branch end)
    /// with its start port at `new_diameter`; otherwise it sits near the
    /// run's end (trunk end) with its end port at `new_diameter`.
    /// `additional_distance` slides it further along the run, used when
    /// splitting a run at an interior point.
    pub fn reduce_or_join(
        &self,
        tree: &mut FittingTree,
        pipe: pf_core::CompId,
        branch_side: bool,
        new_diameter: Real,
        additional_distance: Real,
    ) -> FittingResult<pf_core::CompId> {
        let (start_pos, end_pos, pipe_d, locator) = {
            let c = tree.get(pipe)?;
            let Body::Straight(ref seg) = c.body else {
                return Err(FittingError::BadOperation {
                    what: "reduce_or_join needs a straight run".to_string(),
                });
            };
            (
                seg.start.position,
                seg.end.position,
                seg.diameter,
                c.locator.clone(),
            )
        };
        let span = end_pos - start_pos;
        let span_len = span.norm();
        if span_len <= 1e-12 {
            return Err(FittingError::cannot_connect(
                "cannot place a reducer on a zero-length run",
                start_pos,
            ));
        }
        let axis = span / span_len;

        let large = pipe_d.max(new_diameter);
        let small = pipe_d.min(new_diameter);
        let part = self.catalog.as_ref().and_then(|c| c.best_reducer(large, small));
        let length = part.map_or(DEFAULT_REDUCER_LENGTH, |p| p.length);

        let center = if branch_side {
            start_pos + axis * (length / 2.0 + additional_distance)
        } else {
            end_pos - axis * (length / 2.0 + additional_distance)
        };
        let (start_d, end_d) = if branch_side {
            (new_diameter, pipe_d)
        } else {
            (pipe_d, new_diameter)
        };
        let mut start = Port::new(center - axis * (length / 2.0), -axis, start_d);
        let mut end = Port::new(center + axis * (length / 2.0), axis, end_d);
        if let Some(p) = part {
            apply_reducer_extensions(&mut start, &mut end, p.extension_large, p.extension_small);
        }

        let id = tree.insert(Body::Reducer(Reducer {
            position: center,
            start,
            end,
        }));
        let comp = tree.get_mut(id)?;
        comp.locator.match_section(&locator);
        comp.locator.index_in_section = locator.index_in_section;
        Ok(id)
    }
}

/// The large-end extension belongs on whichever port has the larger bore.
fn apply_reducer_extensions(start: &mut Port, end: &mut Port, ext_large: Real, ext_small: Real) {
    let (start_ext, end_ext) = if start.diameter < end.diameter {
        (ext_small, ext_large)
    } else {
        (ext_large, ext_small)
    };
    start.dimensions = Some(PortDimensions::new(start_ext, 0.0, 0.0));
    end.dimensions = Some(PortDimensions::new(end_ext, 0.0, 0.0));
}
