//! Section labeling of built components.
//!
//! Components sharing a section key form one unbranched run. Labeling puts
//! each such group in trunk-to-branch order, stamps every component with
//! its index in the section and a network-wide item name, and records the
//! order so components can be addressed by (section key, index) later.

use std::collections::{BTreeMap, HashSet, VecDeque};

use pf_core::CompId;

use crate::arena::FittingTree;
use crate::component::Body;
use crate::error::LabelingFailure;

/// Order and label every section. Unorderable sections are reported and
/// left out of the lookup; everything else is still labeled.
pub fn assign_labels(tree: &mut FittingTree) -> Vec<LabelingFailure> {
    let mut groups: BTreeMap<String, Vec<CompId>> = BTreeMap::new();
    for id in tree.expanded_ids() {
        if let Some(c) = tree.component(id) {
            groups.entry(c.locator.section_key.clone()).or_default().push(id);
        }
    }

    tree.section_lookup.clear();
    let mut failures = Vec::new();
    let mut item_number = 1usize;
    for (key, members) in groups {
        let ordered = match order_section(tree, &members) {
            Ok(ordered) => ordered,
            Err(reason) => {
                failures.push(LabelingFailure {
                    section_key: key,
                    reason,
                });
                continue;
            }
        };
        for (index, &id) in ordered.iter().enumerate() {
            if let Ok(c) = tree.get_mut(id) {
                c.locator.index_in_section = index;
                c.name = format!("{}{}", c.body.kind_abbrev(), item_number);
            }
            item_number += 1;
        }
        tree.section_lookup.insert(key, ordered);
    }
    failures
}

/// Walk the linked components of one section into trunk-first order.
fn order_section(tree: &FittingTree, members: &[CompId]) -> Result<Vec<CompId>, String> {
    let Some(&first) = members.first() else {
        return Ok(Vec::new());
    };
    let set: HashSet<CompId> = members.iter().copied().collect();
    let mut chain: VecDeque<CompId> = VecDeque::from([first]);
    let mut visited: HashSet<CompId> = HashSet::from([first]);

    let mut current = first;
    while let Some(trunk) = tree.component(current).and_then(|c| c.trunk) {
        if !set.contains(&trunk) {
            break;
        }
        if !visited.insert(trunk) {
            return Err("loop while walking toward the trunk".to_string());
        }
        chain.push_back(trunk);
        current = trunk;
    }

    current = first;
    loop {
        let in_section: Vec<CompId> = tree
            .component(current)
            .map(|c| {
                c.branches
                    .iter()
                    .copied()
                    .filter(|b| set.contains(b))
                    .collect()
            })
            .unwrap_or_default();
        if in_section.len() != 1 {
            break;
        }
        let next = in_section[0];
        if !visited.insert(next) {
            return Err("loop while walking toward the branches".to_string());
        }
        chain.push_front(next);
        current = next;
    }

    if chain.len() != members.len() {
        return Err(format!(
            "lost or gained components while ordering ({} walked, {} present)",
            chain.len(),
            members.len()
        ));
    }
    Ok(chain.into_iter().rev().collect())
}

/// Validate an already-labeled tree: contiguous indices, no two adjacent
/// straight runs, and every run's ports resting on its neighbors' ports.
pub fn check_labeling(tree: &FittingTree) -> Vec<LabelingFailure> {
    let mut failures = Vec::new();
    let tol = tree.tolerances();
    let keys: Vec<String> = tree.section_lookup.keys().cloned().collect();
    for key in keys {
        let ordered = tree.components_of_section(&key);
        for (index, &id) in ordered.iter().enumerate() {
            let Some(c) = tree.component(id) else {
                failures.push(LabelingFailure {
                    section_key: key.clone(),
                    reason: format!("labeled component {id} is gone"),
                });
                continue;
            };
            if c.locator.index_in_section != index {
                failures.push(LabelingFailure {
                    section_key: key.clone(),
                    reason: format!(
                        "{} carries index {} but sits at {}",
                        c.name, c.locator.index_in_section, index
                    ),
                });
            }
        }
        for pair in ordered.windows(2) {
            let (Some(a), Some(b)) = (tree.component(pair[0]), tree.component(pair[1])) else {
                continue;
            };
            if a.is_straight() && b.is_straight() {
                failures.push(LabelingFailure {
                    section_key: key.clone(),
                    reason: format!("{} and {} are adjacent straight runs", a.name, b.name),
                });
            }
        }
        for &id in &ordered {
            let Some(c) = tree.component(id) else { continue };
            let Body::Straight(seg) = &c.body else { continue };
            let mut detached = false;
            if let Some(t) = c.trunk {
                if let Ok(Some(port)) = tree.closest_port(t, &seg.end.position) {
                    if let Ok(p) = tree.port(port) {
                        detached |= (p.position - seg.end.position).norm() > tol.distance;
                    }
                }
            }
            if let Some(&b) = c.branches.first() {
                if let Ok(Some(port)) = tree.closest_port(b, &seg.start.position) {
                    if let Ok(p) = tree.port(port) {
                        detached |= (p.position - seg.start.position).norm() > tol.distance;
                    }
                }
            }
            if detached {
                failures.push(LabelingFailure {
                    section_key: key.clone(),
                    reason: format!("{} has a port off its neighbor", c.name),
                });
            }
        }
    }
    failures
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::{Straight, Terminal};
    use crate::port::Port;
    use pf_core::{Pt3, Tolerances, Vec3};

    fn chain_tree() -> (FittingTree, CompId, CompId, CompId) {
        let mut tree = FittingTree::new("net", Tolerances::default());
        let outlet = tree.insert(Body::Terminal(Terminal {
            position: Pt3::origin(),
            port: Port::new(Pt3::new(0.03, 0.0, 0.0), Vec3::x(), 0.05),
            node: None,
        }));
        let pipe = tree.insert(Body::Straight(Straight {
            start: Port::new(Pt3::new(1.97, 0.0, 0.0), -Vec3::x(), 0.05),
            end: Port::new(Pt3::new(0.03, 0.0, 0.0), Vec3::x(), 0.05),
            diameter: 0.05,
        }));
        let leaf = tree.insert(Body::Terminal(Terminal {
            position: Pt3::new(2.0, 0.0, 0.0),
            port: Port::new(Pt3::new(1.97, 0.0, 0.0), -Vec3::x(), 0.05),
            node: None,
        }));
        tree.get_mut(outlet).unwrap().branches.push(pipe);
        tree.get_mut(pipe).unwrap().trunk = Some(outlet);
        tree.get_mut(pipe).unwrap().branches.push(leaf);
        tree.get_mut(leaf).unwrap().trunk = Some(pipe);
        for id in [outlet, pipe, leaf] {
            tree.get_mut(id).unwrap().locator.section_key = "0".to_string();
        }
        (tree, outlet, pipe, leaf)
    }

    #[test]
    fn labels_run_trunk_first() {
        let (mut tree, outlet, pipe, leaf) = chain_tree();
        let failures = assign_labels(&mut tree);
        assert!(failures.is_empty());

        assert_eq!(tree.get(outlet).unwrap().locator.index_in_section, 0);
        assert_eq!(tree.get(pipe).unwrap().locator.index_in_section, 1);
        assert_eq!(tree.get(leaf).unwrap().locator.index_in_section, 2);
        assert_eq!(tree.component_at("0", 0), Some(outlet));
        assert_eq!(tree.component_at("0", 2), Some(leaf));
        // names carry the kind abbreviation and a network-wide number
        assert_eq!(tree.get(outlet).unwrap().name, "T-1");
        assert_eq!(tree.get(pipe).unwrap().name, "PS-2");
        assert_eq!(tree.get(leaf).unwrap().name, "T-3");
    }

    #[test]
    fn labeling_survives_checks() {
        let (mut tree, ..) = chain_tree();
        assign_labels(&mut tree);
        assert!(check_labeling(&tree).is_empty());
    }

    #[test]
    fn disconnected_section_is_reported() {
        let (mut tree, _, pipe, leaf) = chain_tree();
        // break the chain: the leaf no longer links back
        tree.get_mut(pipe).unwrap().branches.clear();
        tree.get_mut(leaf).unwrap().trunk = None;
        let failures = assign_labels(&mut tree);
        assert_eq!(failures.len(), 1);
        assert!(failures[0].reason.contains("ordering"));
        assert!(tree.components_of_section("0").is_empty());
    }

    #[test]
    fn adjacent_straight_runs_fail_the_check() {
        let mut tree = FittingTree::new("net", Tolerances::default());
        let a = tree.insert(Body::Straight(Straight {
            start: Port::new(Pt3::new(1.0, 0.0, 0.0), -Vec3::x(), 0.05),
            end: Port::new(Pt3::origin(), Vec3::x(), 0.05),
            diameter: 0.05,
        }));
        let b = tree.insert(Body::Straight(Straight {
            start: Port::new(Pt3::new(2.0, 0.0, 0.0), -Vec3::x(), 0.05),
            end: Port::new(Pt3::new(1.0, 0.0, 0.0), Vec3::x(), 0.05),
            diameter: 0.05,
        }));
        tree.get_mut(a).unwrap().branches.push(b);
        tree.get_mut(b).unwrap().trunk = Some(a);
        for id in [a, b] {
            tree.get_mut(id).unwrap().locator.section_key = "0".to_string();
        }
        assign_labels(&mut tree);
        let failures = check_labeling(&tree);
        assert!(failures.iter().any(|f| f.reason.contains("adjacent")));
    }
}
