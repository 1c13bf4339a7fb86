//! Fitting components.
//!
//! Every physical piece of the network is a `Component`: a closed `Body`
//! enum for the geometry plus graph links (`trunk`, `branches`) held as
//! arena handles. The trunk link points toward the outlet; the branch list
//! points toward the leaves. The two are kept mutually consistent by the
//! arena (`check_links`).

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use pf_core::{CompId, ConnId, NodeId, Pt3, Real, Vec3};

use crate::locator::FittingLocator;
use crate::port::Port;
use crate::shift::PendingShift;
use crate::solve::PressureDelta;

/// A terminal caps the tree at the outlet or at a leaf demand point.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Terminal {
    pub position: Pt3,
    pub port: Port,
    /// The flow node this terminal realizes, when built from a flow tree.
    pub node: Option<NodeId>,
}

/// A straight run of pipe. `start` faces the branches, `end` the trunk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Straight {
    pub start: Port,
    pub end: Port,
    pub diameter: Real,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Elbow {
    pub position: Pt3,
    pub start: Port,
    pub end: Port,
    /// Bend angle in degrees.
    pub angle: Real,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Wye {
    pub position: Pt3,
    pub trunk: Port,
    pub main_branch: Port,
    pub side_branch: Port,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cross {
    pub position: Pt3,
    pub trunk: Port,
    /// Opposite the trunk, always collinear with it.
    pub branch_a: Port,
    pub branch_b: Port,
    pub branch_c: Port,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifold {
    pub position: Pt3,
    pub trunk: Port,
    pub branches: Vec<Port>,
}

/// Tapers between two diameters. `start` faces the branches, `end` the
/// trunk; a reducer with equal end diameters is a deliberate joint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reducer {
    pub position: Pt3,
    pub start: Port,
    pub end: Port,
}

/// A fixed-length sleeve joining two runs of the same diameter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Coupler {
    pub position: Pt3,
    pub start: Port,
    pub end: Port,
    pub diameter: Real,
}

/// A pre-assembled group of components exposed through external ports.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Assembly {
    pub position: Pt3,
    pub internals: Vec<CompId>,
    pub external_ports: Vec<Port>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Body {
    Terminal(Terminal),
    Straight(Straight),
    Elbow(Elbow),
    Wye(Wye),
    Cross(Cross),
    Manifold(Manifold),
    Reducer(Reducer),
    Coupler(Coupler),
    Assembly(Assembly),
}

impl Body {
    pub fn kind_abbrev(&self) -> &'static str {
        match self {
            Body::Terminal(_) => "T-",
            Body::Straight(_) => "PS-",
            Body::Elbow(_) => "E-",
            Body::Wye(_) => "Y-",
            Body::Cross(_) => "X-",
            Body::Manifold(_) => "M-",
            Body::Reducer(_) => "R-",
            Body::Coupler(_) => "C-",
            Body::Assembly(_) => "A-",
        }
    }

    pub fn ports(&self) -> Vec<&Port> {
        match self {
            Body::Terminal(t) => vec![&t.port],
            Body::Straight(s) => vec![&s.start, &s.end],
            Body::Elbow(e) => vec![&e.start, &e.end],
            Body::Wye(w) => vec![&w.trunk, &w.main_branch, &w.side_branch],
            Body::Cross(c) => vec![&c.trunk, &c.branch_a, &c.branch_b, &c.branch_c],
            Body::Manifold(m) => {
                let mut out = vec![&m.trunk];
                out.extend(m.branches.iter());
                out
            }
            Body::Reducer(r) => vec![&r.start, &r.end],
            Body::Coupler(c) => vec![&c.start, &c.end],
            Body::Assembly(a) => a.external_ports.iter().collect(),
        }
    }

    pub fn ports_mut(&mut self) -> Vec<&mut Port> {
        match self {
            Body::Terminal(t) => vec![&mut t.port],
            Body::Straight(s) => vec![&mut s.start, &mut s.end],
            Body::Elbow(e) => vec![&mut e.start, &mut e.end],
            Body::Wye(w) => vec![&mut w.trunk, &mut w.main_branch, &mut w.side_branch],
            Body::Cross(c) => vec![
                &mut c.trunk,
                &mut c.branch_a,
                &mut c.branch_b,
                &mut c.branch_c,
            ],
            Body::Manifold(m) => {
                let mut out = vec![&mut m.trunk];
                out.extend(m.branches.iter_mut());
                out
            }
            Body::Reducer(r) => vec![&mut r.start, &mut r.end],
            Body::Coupler(c) => vec![&mut c.start, &mut c.end],
            Body::Assembly(a) => a.external_ports.iter_mut().collect(),
        }
    }

    pub fn port(&self, index: usize) -> Option<&Port> {
        self.ports().into_iter().nth(index)
    }

    pub fn port_mut(&mut self, index: usize) -> Option<&mut Port> {
        self.ports_mut().into_iter().nth(index)
    }

    /// Index (into `ports()`) of the trunk-facing port, for a component
    /// whose trunk link is set. Terminals face trunk-ward through their
    /// only port when linked, branch-ward otherwise.
    pub fn trunk_port_index(&self, has_trunk: bool) -> Option<usize> {
        match self {
            Body::Terminal(_) => has_trunk.then_some(0),
            Body::Straight(_) | Body::Elbow(_) | Body::Reducer(_) | Body::Coupler(_) => Some(1),
            Body::Wye(_) | Body::Cross(_) | Body::Manifold(_) => Some(0),
            Body::Assembly(_) => (!self.ports().is_empty()).then_some(0),
        }
    }

    pub fn branch_port_indexes(&self, has_trunk: bool) -> Vec<usize> {
        match self {
            Body::Terminal(_) => {
                if has_trunk {
                    vec![]
                } else {
                    vec![0]
                }
            }
            Body::Straight(_) | Body::Elbow(_) | Body::Reducer(_) | Body::Coupler(_) => vec![0],
            Body::Wye(_) => vec![1, 2],
            Body::Cross(_) => vec![1, 2, 3],
            Body::Manifold(m) => (1..=m.branches.len()).collect(),
            Body::Assembly(_) => (1..self.ports().len()).collect(),
        }
    }

    /// Installed length, used by split/resize distance bookkeeping.
    pub fn length(&self) -> Real {
        match self {
            Body::Straight(s) => (s.end.position - s.start.position).norm(),
            Body::Coupler(c) => (c.end.position - c.start.position).norm(),
            Body::Elbow(e) => {
                (e.end.position - e.position).norm() + (e.start.position - e.position).norm()
            }
            Body::Reducer(r) => {
                (r.end.position - r.position).norm() + (r.start.position - r.position).norm()
            }
            Body::Terminal(t) => {
                let dz = (t.port.position.z - t.position.z).abs();
                let dxy = Vec3::new(
                    t.port.position.x - t.position.x,
                    t.port.position.y - t.position.y,
                    0.0,
                )
                .norm();
                dz + dxy
            }
            Body::Wye(_) | Body::Cross(_) | Body::Manifold(_) | Body::Assembly(_) => 0.0,
        }
    }

    pub fn translate(&mut self, t: &Vec3) {
        match self {
            Body::Terminal(term) => term.position += t,
            Body::Straight(_) => {}
            Body::Elbow(e) => e.position += t,
            Body::Wye(w) => w.position += t,
            Body::Cross(c) => c.position += t,
            Body::Manifold(m) => m.position += t,
            Body::Reducer(r) => r.position += t,
            Body::Coupler(c) => c.position += t,
            Body::Assembly(a) => a.position += t,
        }
        for port in self.ports_mut() {
            port.position += t;
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Component {
    pub id: CompId,
    pub uid: Uuid,
    pub name: String,
    pub body: Body,
    pub trunk: Option<CompId>,
    pub branches: Vec<CompId>,
    pub pending: PendingShift,
    pub locator: FittingLocator,
    pub pressure: Option<PressureDelta>,
    /// The flow connection a straight run realizes, when known.
    pub connection: Option<ConnId>,
}

impl Component {
    pub fn trunk_port(&self) -> Option<&Port> {
        self.body
            .trunk_port_index(self.trunk.is_some())
            .and_then(|i| self.body.port(i))
    }

    pub fn trunk_port_mut(&mut self) -> Option<&mut Port> {
        self.body
            .trunk_port_index(self.trunk.is_some())
            .and_then(|i| self.body.port_mut(i))
    }

    pub fn branch_ports(&self) -> Vec<&Port> {
        let idx = self.body.branch_port_indexes(self.trunk.is_some());
        let ports = self.body.ports();
        idx.into_iter().filter_map(|i| ports.get(i).copied()).collect()
    }

    pub fn is_straight(&self) -> bool {
        matches!(self.body, Body::Straight(_))
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.body, Body::Terminal(_))
    }

    pub fn is_reducer(&self) -> bool {
        matches!(self.body, Body::Reducer(_))
    }
}
