//! Flow tree data structures.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use pf_core::{ConnId, NodeId, Pt3, Real, Vec3};

use crate::error::{FlowError, FlowResult};

/// Role of a node in the flow tree.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum NodeKind {
    /// The single outlet of the tree. Pressure is pinned here.
    Trunk { fixed_pressure: Real },
    /// A demand point with a requested flow rate.
    Leaf { flow: Real },
    /// A routing point with no demand of its own.
    Internal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowNode {
    pub id: NodeId,
    pub position: Pt3,
    pub kind: NodeKind,
}

impl FlowNode {
    pub fn is_trunk(&self) -> bool {
        matches!(self.kind, NodeKind::Trunk { .. })
    }

    pub fn is_leaf(&self) -> bool {
        matches!(self.kind, NodeKind::Leaf { .. })
    }
}

/// A sized, directed connection between two nodes.
///
/// `flow` is derived data assigned by section updates, not an input.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Connection {
    pub id: ConnId,
    pub start: NodeId,
    pub end: NodeId,
    pub diameter: Real,
    pub is_loop: bool,
    pub flow: Real,
}

impl Connection {
    /// Unit direction from start to end, or None for degenerate geometry.
    pub fn direction(&self, tree: &FlowTree) -> Option<Vec3> {
        let s = tree.node(self.start)?.position;
        let e = tree.node(self.end)?.position;
        let v = e - s;
        let n = v.norm();
        if n <= 1e-12 { None } else { Some(v / n) }
    }

    pub fn length(&self, tree: &FlowTree) -> Real {
        match (tree.node(self.start), tree.node(self.end)) {
            (Some(s), Some(e)) => (e.position - s.position).norm(),
            _ => 0.0,
        }
    }
}

/// The abstract flow tree: nodes plus directed connections, one outlet.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FlowTree {
    nodes: Vec<FlowNode>,
    connections: Vec<Connection>,
    outlet: Option<NodeId>,
    #[serde(skip)]
    incoming: HashMap<NodeId, Vec<ConnId>>,
    #[serde(skip)]
    outgoing: HashMap<NodeId, Vec<ConnId>>,
    #[serde(skip)]
    pub(crate) sections: Vec<crate::sections::Section>,
    #[serde(skip)]
    pub(crate) conn_section: HashMap<ConnId, usize>,
    #[serde(skip)]
    pub(crate) key_section: HashMap<String, usize>,
}

impl FlowTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add the outlet (trunk) node. Only one is allowed per tree.
    pub fn add_outlet(&mut self, position: Pt3, fixed_pressure: Real) -> FlowResult<NodeId> {
        if self.outlet.is_some() {
            return Err(FlowError::OutletExists);
        }
        let id = self.push_node(position, NodeKind::Trunk { fixed_pressure });
        self.outlet = Some(id);
        Ok(id)
    }

    /// Add a leaf (inlet) node with a demand flow.
    pub fn add_inlet(&mut self, position: Pt3, flow: Real) -> NodeId {
        self.push_node(position, NodeKind::Leaf { flow })
    }

    /// Add an internal routing node.
    pub fn add_internal(&mut self, position: Pt3) -> NodeId {
        self.push_node(position, NodeKind::Internal)
    }

    /// Replace the demand of a leaf node.
    pub fn set_leaf_flow(&mut self, id: NodeId, flow: Real) -> FlowResult<()> {
        match self.nodes.get_mut(id.index() as usize) {
            Some(FlowNode {
                kind: NodeKind::Leaf { flow: demand },
                ..
            }) => {
                *demand = flow;
                Ok(())
            }
            _ => Err(FlowError::UnknownNode(id)),
        }
    }

    fn push_node(&mut self, position: Pt3, kind: NodeKind) -> NodeId {
        let id = NodeId::from_index(self.nodes.len() as u32);
        self.nodes.push(FlowNode { id, position, kind });
        id
    }

    /// Connect `start` to `end` with the given diameter.
    pub fn connect(&mut self, start: NodeId, end: NodeId, diameter: Real) -> FlowResult<ConnId> {
        self.connect_inner(start, end, diameter, false)
    }

    /// Connect `start` to `end` as a loop-closing connection.
    pub fn connect_loop(
        &mut self,
        start: NodeId,
        end: NodeId,
        diameter: Real,
    ) -> FlowResult<ConnId> {
        self.connect_inner(start, end, diameter, true)
    }

    fn connect_inner(
        &mut self,
        start: NodeId,
        end: NodeId,
        diameter: Real,
        is_loop: bool,
    ) -> FlowResult<ConnId> {
        if self.node(start).is_none() {
            return Err(FlowError::UnknownNode(start));
        }
        if self.node(end).is_none() {
            return Err(FlowError::UnknownNode(end));
        }
        if start == end {
            return Err(FlowError::SelfConnection(start));
        }
        let id = ConnId::from_index(self.connections.len() as u32);
        self.connections.push(Connection {
            id,
            start,
            end,
            diameter,
            is_loop,
            flow: 0.0,
        });
        self.incoming.entry(end).or_default().push(id);
        self.outgoing.entry(start).or_default().push(id);
        Ok(id)
    }

    pub fn outlet(&self) -> Option<NodeId> {
        self.outlet
    }

    pub fn nodes(&self) -> &[FlowNode] {
        &self.nodes
    }

    pub fn connections(&self) -> &[Connection] {
        &self.connections
    }

    pub fn node(&self, id: NodeId) -> Option<&FlowNode> {
        self.nodes.get(id.index() as usize)
    }

    pub fn connection(&self, id: ConnId) -> Option<&Connection> {
        self.connections.get(id.index() as usize)
    }

    pub(crate) fn connection_mut(&mut self, id: ConnId) -> Option<&mut Connection> {
        self.connections.get_mut(id.index() as usize)
    }

    /// Connections ending at `node`.
    pub fn incoming_connections(&self, node: NodeId) -> Vec<&Connection> {
        self.incoming
            .get(&node)
            .map(|ids| ids.iter().filter_map(|&id| self.connection(id)).collect())
            .unwrap_or_default()
    }

    /// Connections starting at `node`.
    pub fn outgoing_connections(&self, node: NodeId) -> Vec<&Connection> {
        self.outgoing
            .get(&node)
            .map(|ids| ids.iter().filter_map(|&id| self.connection(id)).collect())
            .unwrap_or_default()
    }

    /// The single trunk-ward connection of `node`: the only outgoing one,
    /// or the first non-loop one when loops leave the node too.
    pub fn outgoing_connection(&self, node: NodeId) -> Option<&Connection> {
        let all = self.outgoing_connections(node);
        if all.len() == 1 {
            return all.into_iter().next();
        }
        all.into_iter().find(|c| !c.is_loop)
    }

    pub fn loop_connections(&self) -> Vec<&Connection> {
        self.connections.iter().filter(|c| c.is_loop).collect()
    }

    pub fn has_loops(&self) -> bool {
        self.connections.iter().any(|c| c.is_loop)
    }

    /// Rebuild the adjacency maps, e.g. after deserialization.
    pub fn rebuild_adjacency(&mut self) {
        self.incoming.clear();
        self.outgoing.clear();
        for c in &self.connections {
            self.incoming.entry(c.end).or_default().push(c.id);
            self.outgoing.entry(c.start).or_default().push(c.id);
        }
    }
}
