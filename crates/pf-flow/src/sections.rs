//! Section decomposition of a flow tree.
//!
//! A section is a maximal unbranched run of connections. Keys are
//! hierarchical: the trunk section is "0" and the i-th branch entering a
//! junction of section K gets the key "K,i". Key depth is a cheap
//! trunk-to-leaf ordering.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use pf_core::{angle_between_deg, ConnId, NodeId, Real};

use crate::error::{FlowError, FlowResult};
use crate::tree::FlowTree;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Section {
    pub key: String,
    /// Branch-side end of the section (furthest from the outlet).
    pub start: NodeId,
    /// Trunk-side end of the section (closest to the outlet).
    pub end: NodeId,
    /// Sum of the leaf demands feeding this section.
    pub flow: Real,
    pub length: Real,
}

impl Section {
    /// Key of the section immediately trunk-ward, if any.
    pub fn trunk_side_key(&self) -> Option<&str> {
        self.key.rsplit_once(',').map(|(head, _)| head)
    }

    /// True when `other` feeds directly into this section's junction.
    pub fn is_directly_upstream(&self, other: &Section) -> bool {
        other.trunk_side_key() == Some(self.key.as_str())
    }

    /// Nesting depth of the key, used as a trunk-distance heuristic.
    pub fn depth(&self) -> usize {
        self.key.matches(',').count()
    }
}

impl FlowTree {
    /// Recompute the section decomposition and per-connection flows.
    pub fn update_sections(&mut self) -> FlowResult<()> {
        let outlet = self.outlet().ok_or(FlowError::NoOutlet)?;

        let mut conn_keys: HashMap<ConnId, String> = HashMap::new();
        let mut sections: Vec<Section> = Vec::new();
        let seed = Section {
            key: "0".to_string(),
            start: outlet,
            end: outlet,
            flow: 0.0,
            length: 0.0,
        };
        walk_sections(self, outlet, seed, &mut conn_keys, &mut sections);

        let mut key_section = HashMap::new();
        for (i, s) in sections.iter().enumerate() {
            key_section.insert(s.key.clone(), i);
        }
        let mut conn_section = HashMap::new();
        for (conn, key) in &conn_keys {
            if let Some(&i) = key_section.get(key) {
                conn_section.insert(*conn, i);
            }
        }

        // Derived per-section lengths and per-connection flows.
        let lengths: Vec<Real> = (0..sections.len())
            .map(|i| {
                conn_section
                    .iter()
                    .filter(|&(_, &s)| s == i)
                    .filter_map(|(&c, _)| self.connection(c))
                    .map(|c| c.length(self))
                    .sum()
            })
            .collect();
        for (s, len) in sections.iter_mut().zip(lengths) {
            s.length = len;
        }
        let updates: Vec<(ConnId, Real)> = conn_section
            .iter()
            .map(|(&c, &i)| (c, sections[i].flow))
            .collect();
        for (c, flow) in updates {
            if let Some(conn) = self.connection_mut(c) {
                conn.flow = flow;
            }
        }

        self.sections = sections;
        self.conn_section = conn_section;
        self.key_section = key_section;
        Ok(())
    }

    pub fn sections(&self) -> &[Section] {
        &self.sections
    }

    pub fn section_of(&self, conn: ConnId) -> Option<&Section> {
        self.conn_section.get(&conn).map(|&i| &self.sections[i])
    }

    pub fn section_from_key(&self, key: &str) -> Option<&Section> {
        self.key_section.get(key).map(|&i| &self.sections[i])
    }

    pub fn flow_of_section(&self, key: &str) -> FlowResult<Real> {
        self.section_from_key(key)
            .map(|s| s.flow)
            .ok_or_else(|| FlowError::UnknownSection(key.to_string()))
    }

    /// Connections of a section ordered from its branch end to its trunk end.
    pub fn connections_for_section(&self, key: &str) -> FlowResult<Vec<ConnId>> {
        let idx = *self
            .key_section
            .get(key)
            .ok_or_else(|| FlowError::UnknownSection(key.to_string()))?;
        let section = &self.sections[idx];
        let mut result = Vec::new();
        let mut current = section.start;
        while current != section.end {
            let next = self
                .outgoing_connections(current)
                .into_iter()
                .find(|c| self.conn_section.get(&c.id) == Some(&idx));
            let Some(conn) = next else { break };
            result.push(conn.id);
            current = conn.end;
        }
        Ok(result)
    }

    /// Sections ordered by cumulative path length to the outlet, nearest first.
    pub fn sections_closest_first(&self) -> Vec<&Section> {
        let mut with_distance: Vec<(Real, &Section)> = self
            .sections
            .iter()
            .map(|s| (self.distance_to_trunk(s), s))
            .collect();
        with_distance.sort_by(|a, b| a.0.total_cmp(&b.0));
        with_distance.into_iter().map(|(_, s)| s).collect()
    }

    fn distance_to_trunk(&self, section: &Section) -> Real {
        let mut total = 0.0;
        let mut current = Some(section);
        while let Some(s) = current {
            total += s.length;
            current = s.trunk_side_key().and_then(|k| self.section_from_key(k));
        }
        total
    }
}

fn walk_sections(
    tree: &FlowTree,
    last_node: NodeId,
    mut current: Section,
    conn_keys: &mut HashMap<ConnId, String>,
    out: &mut Vec<Section>,
) {
    let incoming = tree.incoming_connections(last_node);
    if incoming.is_empty() {
        current.start = last_node;
        if let Some(node) = tree.node(last_node) {
            if let crate::tree::NodeKind::Leaf { flow } = node.kind {
                current.flow = flow;
            }
        }
        out.push(current);
        return;
    }

    if incoming.len() == 1 && tree.outgoing_connections(last_node).len() <= 1 {
        let conn = incoming[0];
        if conn_keys.contains_key(&conn.id) {
            // loop-closing connection already claimed by another section
            return;
        }
        conn_keys.insert(conn.id, current.key.clone());
        walk_sections(tree, conn.start, current, conn_keys, out);
        return;
    }

    // Junction: each incoming connection starts a new section. Loops sort
    // last so branch indices stay stable whether or not a loop is present.
    current.start = last_node;
    let outgoing_dir = tree
        .outgoing_connection(last_node)
        .and_then(|c| c.direction(tree));
    let mut sorted: Vec<_> = incoming;
    sorted.sort_by(|a, b| {
        (a.is_loop, angle_to(tree, a, &outgoing_dir))
            .partial_cmp(&(b.is_loop, angle_to(tree, b, &outgoing_dir)))
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let conn_info: Vec<(ConnId, NodeId)> = sorted.iter().map(|c| (c.id, c.start)).collect();
    for (i, (conn_id, conn_start)) in conn_info.into_iter().enumerate() {
        let key = format!("{},{}", current.key, i);
        if conn_keys.contains_key(&conn_id) {
            continue;
        }
        conn_keys.insert(conn_id, key.clone());
        let child = Section {
            key,
            start: conn_start,
            end: last_node,
            flow: 0.0,
            length: 0.0,
        };
        walk_sections(tree, conn_start, child, conn_keys, out);
    }
    current.flow += out
        .iter()
        .filter(|s| current.is_directly_upstream(s))
        .map(|s| s.flow)
        .sum::<Real>();
    out.push(current);
}

fn angle_to(tree: &FlowTree, conn: &crate::tree::Connection, reference: &Option<pf_core::Vec3>) -> Real {
    match (conn.direction(tree), reference) {
        (Some(d), Some(r)) => angle_between_deg(&d, r),
        _ => 0.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pf_core::Pt3;

    fn branching_tree() -> FlowTree {
        // Two leaves joining at a junction, junction feeding the outlet.
        let mut tree = FlowTree::new();
        let out = tree.add_outlet(Pt3::origin(), 0.0).unwrap();
        let junction = tree.add_internal(Pt3::new(2.0, 0.0, 0.0));
        let leaf_a = tree.add_inlet(Pt3::new(4.0, 0.0, 0.0), 1.0);
        let leaf_b = tree.add_inlet(Pt3::new(2.0, 3.0, 0.0), 0.5);
        tree.connect(leaf_a, junction, 0.05).unwrap();
        tree.connect(leaf_b, junction, 0.04).unwrap();
        tree.connect(junction, out, 0.05).unwrap();
        tree
    }

    #[test]
    fn trunk_section_is_zero() {
        let mut tree = branching_tree();
        tree.update_sections().unwrap();
        let trunk = tree.section_from_key("0").unwrap();
        assert_eq!(trunk.key, "0");
        // trunk flow is the sum of both leaf demands
        assert!((trunk.flow - 1.5).abs() < 1e-12);
    }

    #[test]
    fn branch_sections_get_comma_keys() {
        let mut tree = branching_tree();
        tree.update_sections().unwrap();
        assert_eq!(tree.sections().len(), 3);
        assert!(tree.section_from_key("0,0").is_some());
        assert!(tree.section_from_key("0,1").is_some());
        // collinear branch sorts first
        let main = tree.section_from_key("0,0").unwrap();
        assert!((main.flow - 1.0).abs() < 1e-12);
    }

    #[test]
    fn connection_flow_matches_section_flow() {
        let mut tree = branching_tree();
        tree.update_sections().unwrap();
        let trunk_conns = tree.connections_for_section("0").unwrap();
        assert_eq!(trunk_conns.len(), 1);
        let conn = tree.connection(trunk_conns[0]).unwrap();
        assert!((conn.flow - 1.5).abs() < 1e-12);
    }

    #[test]
    fn loop_connection_does_not_spawn_extra_section() {
        let mut tree = FlowTree::new();
        let out = tree.add_outlet(Pt3::origin(), 0.0).unwrap();
        let a = tree.add_internal(Pt3::new(1.0, 0.0, 0.0));
        let b = tree.add_inlet(Pt3::new(2.0, 0.0, 0.0), 1.0);
        tree.connect(b, a, 0.05).unwrap();
        tree.connect(a, out, 0.05).unwrap();
        tree.connect_loop(a, b, 0.05).unwrap();
        tree.update_sections().unwrap();

        // the loop edge belongs to an existing walk, not a new section
        assert!(tree.has_loops());
        for s in tree.sections() {
            assert!(!s.key.is_empty());
        }
    }

    #[test]
    fn closest_first_ordering() {
        let mut tree = branching_tree();
        tree.update_sections().unwrap();
        let ordered = tree.sections_closest_first();
        assert_eq!(ordered.first().map(|s| s.key.as_str()), Some("0"));
    }
}
