//! Persistence and graph export.
//!
//! Trees serialize to JSON with serde. The section lookup is derived data
//! and is not stored; `from_json` rebuilds it by re-labeling, so a loaded
//! tree answers `component_at` queries the same as the one that was saved.

use std::fmt::Write as _;

use crate::arena::FittingTree;
use crate::error::{FittingError, FittingResult};
use crate::sections::assign_labels;

pub fn to_json(tree: &FittingTree) -> FittingResult<String> {
    Ok(serde_json::to_string_pretty(tree)?)
}

pub fn from_json(text: &str) -> FittingResult<FittingTree> {
    let mut tree: FittingTree = serde_json::from_str(text)?;
    let failures = assign_labels(&mut tree);
    if let Some(first) = failures.into_iter().next() {
        return Err(FittingError::LinkInvariant {
            what: format!(
                "loaded tree has an unorderable section {}: {}",
                first.section_key, first.reason
            ),
        });
    }
    Ok(tree)
}

/// Render the component links as a Graphviz digraph.
///
/// Trunk links are drawn component to trunk and labeled `Ts`; branch links
/// are drawn component to branch and labeled `Bs`. Mutual links therefore
/// show up as an edge pair, which makes one-way link bugs visible at a
/// glance.
pub fn to_dot(tree: &FittingTree) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "digraph \"{}\" {{", escape(tree.name()));
    for c in tree.iter() {
        let _ = writeln!(out, "  \"{}\";", escape(&c.name));
    }
    for c in tree.iter() {
        if let Some(t) = c.trunk {
            if let Some(tc) = tree.component(t) {
                let _ = writeln!(
                    out,
                    "  \"{}\" -> \"{}\" [label=\"Ts\"];",
                    escape(&c.name),
                    escape(&tc.name)
                );
            }
        }
        for &b in &c.branches {
            if let Some(bc) = tree.component(b) {
                let _ = writeln!(
                    out,
                    "  \"{}\" -> \"{}\" [label=\"Bs\"];",
                    escape(&c.name),
                    escape(&bc.name)
                );
            }
        }
    }
    out.push_str("}\n");
    out
}

fn escape(s: &str) -> String {
    s.replace('\\', "\\\\").replace('"', "\\\"")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::{BuildOptions, build};
    use crate::routing::FittingTreeRouting;
    use pf_core::Pt3;
    use pf_flow::FlowTree;

    fn built() -> FittingTree {
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
        assert!(report.is_clean());
        tree
    }

    #[test]
    fn dot_carries_both_link_directions() {
        let tree = built();
        let dot = to_dot(&tree);
        assert!(dot.starts_with("digraph"));
        assert!(dot.contains("[label=\"Ts\"]"));
        assert!(dot.contains("[label=\"Bs\"]"));
        // every trunk edge has a matching branch edge
        assert_eq!(
            dot.matches("[label=\"Ts\"]").count(),
            dot.matches("[label=\"Bs\"]").count()
        );
    }

    #[test]
    fn json_round_trip_restores_section_lookup() {
        let tree = built();
        let text = to_json(&tree).unwrap();
        let loaded = from_json(&text).unwrap();

        assert_eq!(loaded.len(), tree.len());
        for key in ["0", "0,0", "0,1"] {
            assert_eq!(
                loaded.components_of_section(key),
                tree.components_of_section(key),
                "section {key} changed across the round trip"
            );
        }
        loaded.check_links().unwrap();
    }
}
