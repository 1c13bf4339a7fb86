//! The fitting tree arena.
//!
//! Components live in a slot vector and reference each other by stable
//! `CompId` handles. Removing a component leaves a hole; handles are never
//! reused within one tree, so a stored handle either resolves to the same
//! component or to nothing.

use std::collections::HashMap;

use uuid::Uuid;

use pf_core::{CompId, Pt3, Real, Tolerances, Vec3};

use crate::component::{Body, Component};
use crate::error::{FittingError, FittingResult};
use crate::locator::FittingLocator;
use crate::port::Port;
use crate::shift::PendingShift;

/// A port addressed by component handle and port index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PortRef {
    pub comp: CompId,
    pub port: usize,
}

impl PortRef {
    pub fn new(comp: CompId, port: usize) -> Self {
        Self { comp, port }
    }
}

#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct FittingTree {
    name: String,
    tolerances: Tolerances,
    components: Vec<Option<Component>>,
    /// Section key to ordered (trunk-to-branch) component handles,
    /// rebuilt by labeling.
    #[serde(skip)]
    pub(crate) section_lookup: HashMap<String, Vec<CompId>>,
}

impl FittingTree {
    pub fn new(name: impl Into<String>, tolerances: Tolerances) -> Self {
        Self {
            name: name.into(),
            tolerances,
            components: Vec::new(),
            section_lookup: HashMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn tolerances(&self) -> Tolerances {
        self.tolerances
    }

    /// Add a component, returning its handle.
    pub fn insert(&mut self, body: Body) -> CompId {
        let id = CompId::from_index(self.components.len() as u32);
        let abbrev = body.kind_abbrev().to_string();
        self.components.push(Some(Component {
            id,
            uid: Uuid::new_v4(),
            name: abbrev,
            body,
            trunk: None,
            branches: Vec::new(),
            pending: PendingShift::identity(),
            locator: FittingLocator::new(self.name.clone(), ""),
            pressure: None,
            connection: None,
        }));
        id
    }

    pub fn remove(&mut self, id: CompId) -> Option<Component> {
        self.components
            .get_mut(id.index() as usize)
            .and_then(Option::take)
    }

    pub fn component(&self, id: CompId) -> Option<&Component> {
        self.components
            .get(id.index() as usize)
            .and_then(Option::as_ref)
    }

    pub fn get(&self, id: CompId) -> FittingResult<&Component> {
        self.component(id).ok_or(FittingError::MissingComponent(id))
    }

    pub fn get_mut(&mut self, id: CompId) -> FittingResult<&mut Component> {
        self.components
            .get_mut(id.index() as usize)
            .and_then(Option::as_mut)
            .ok_or(FittingError::MissingComponent(id))
    }

    /// Mutable access to two distinct components at once.
    pub fn pair_mut(
        &mut self,
        a: CompId,
        b: CompId,
    ) -> FittingResult<(&mut Component, &mut Component)> {
        let (ia, ib) = (a.index() as usize, b.index() as usize);
        if ia == ib {
            return Err(FittingError::BadOperation {
                what: "cannot borrow the same component twice".to_string(),
            });
        }
        if ia.max(ib) >= self.components.len() {
            return Err(FittingError::MissingComponent(if ia > ib { a } else { b }));
        }
        let (lo, hi) = if ia < ib { (ia, ib) } else { (ib, ia) };
        let (head, tail) = self.components.split_at_mut(hi);
        let first = head[lo].as_mut().ok_or(FittingError::MissingComponent(a))?;
        let second = tail[0].as_mut().ok_or(FittingError::MissingComponent(b))?;
        if ia < ib {
            Ok((first, second))
        } else {
            Ok((second, first))
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Component> {
        self.components.iter().filter_map(Option::as_ref)
    }

    pub fn ids(&self) -> Vec<CompId> {
        self.iter().map(|c| c.id).collect()
    }

    pub fn len(&self) -> usize {
        self.iter().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All handles with assemblies replaced by their internal components.
    pub fn expanded_ids(&self) -> Vec<CompId> {
        let mut out = Vec::new();
        for c in self.iter() {
            match &c.body {
                Body::Assembly(a) => out.extend(a.internals.iter().copied()),
                _ => out.push(c.id),
            }
        }
        out
    }

    /// Recompute the trunk/branch links among an assembly's internal
    /// components from port adjacency. The internal at the assembly's
    /// trunk-facing external port roots the walk; every other internal
    /// hangs off it through complementary ports. Runs whenever the
    /// assembly's external connectivity changes.
    pub fn resolve_internal_links(&mut self, assembly: CompId) -> FittingResult<()> {
        let (internals, trunk_port) = {
            let c = self.get(assembly)?;
            let Body::Assembly(a) = &c.body else {
                return Err(FittingError::BadOperation {
                    what: "not an assembly".to_string(),
                });
            };
            (a.internals.clone(), a.external_ports.first().cloned())
        };
        let Some(trunk_port) = trunk_port else {
            return Ok(());
        };
        let tol = self.tolerances;
        for &id in &internals {
            let c = self.get_mut(id)?;
            c.trunk = None;
            c.branches.clear();
        }

        let mut root = None;
        'outer: for &id in &internals {
            for p in self.get(id)?.body.ports() {
                if p.is_identical(&trunk_port, &tol) {
                    root = Some(id);
                    break 'outer;
                }
            }
        }
        let Some(root) = root else {
            return Err(FittingError::LinkInvariant {
                what: "assembly trunk port matches no internal component".to_string(),
            });
        };

        let mut queue = vec![root];
        let mut seen = vec![root];
        while let Some(current) = queue.pop() {
            let ports: Vec<Port> = self
                .get(current)?
                .body
                .ports()
                .into_iter()
                .cloned()
                .collect();
            for &other in &internals {
                if seen.contains(&other) {
                    continue;
                }
                let touches = self
                    .get(other)?
                    .body
                    .ports()
                    .into_iter()
                    .any(|op| ports.iter().any(|p| op.is_complementary(p, &tol)));
                if touches {
                    self.get_mut(other)?.trunk = Some(current);
                    self.get_mut(current)?.branches.push(other);
                    seen.push(other);
                    queue.push(other);
                }
            }
        }
        Ok(())
    }

    pub fn straight_ids(&self) -> Vec<CompId> {
        self.iter().filter(|c| c.is_straight()).map(|c| c.id).collect()
    }

    pub fn terminal_ids(&self) -> Vec<CompId> {
        self.iter().filter(|c| c.is_terminal()).map(|c| c.id).collect()
    }

    pub fn port(&self, port: PortRef) -> FittingResult<&Port> {
        self.get(port.comp)?
            .body
            .port(port.port)
            .ok_or(FittingError::LinkInvariant {
                what: format!("port {} out of range on {}", port.port, port.comp),
            })
    }

    pub fn port_mut(&mut self, port: PortRef) -> FittingResult<&mut Port> {
        self.get_mut(port.comp)?
            .body
            .port_mut(port.port)
            .ok_or(FittingError::LinkInvariant {
                what: format!("port {} out of range on {}", port.port, port.comp),
            })
    }

    pub fn trunk_port_ref(&self, comp: CompId) -> FittingResult<Option<PortRef>> {
        let c = self.get(comp)?;
        Ok(c.body
            .trunk_port_index(c.trunk.is_some())
            .map(|i| PortRef::new(comp, i)))
    }

    pub fn branch_port_refs(&self, comp: CompId) -> FittingResult<Vec<PortRef>> {
        let c = self.get(comp)?;
        Ok(c.body
            .branch_port_indexes(c.trunk.is_some())
            .into_iter()
            .map(|i| PortRef::new(comp, i))
            .collect())
    }

    /// Every trunk link must have a matching branch entry, and every link
    /// must resolve. Run after any rewiring.
    pub fn check_links(&self) -> FittingResult<()> {
        for c in self.iter() {
            if let Some(trunk) = c.trunk {
                let t = self.component(trunk).ok_or(FittingError::LinkInvariant {
                    what: format!("{} has dangling trunk link {}", c.name, trunk),
                })?;
                if !t.branches.contains(&c.id) {
                    return Err(FittingError::LinkInvariant {
                        what: format!(
                            "{} points at trunk {} but is not in its branch list",
                            c.name, t.name
                        ),
                    });
                }
            }
            for &b in &c.branches {
                if self.component(b).is_none() {
                    return Err(FittingError::LinkInvariant {
                        what: format!("{} has dangling branch link {}", c.name, b),
                    });
                }
            }
        }
        Ok(())
    }

    /// Name every component from its kind and uuid prefix.
    pub fn assign_names(&mut self) {
        for slot in self.components.iter_mut() {
            if let Some(c) = slot {
                let uid = c.uid.to_string();
                c.name = format!("{}{}", c.body.kind_abbrev(), &uid[..3]);
            }
        }
    }

    /// Add `rate` to every trunk-side port between `component` and the
    /// outlet. Straight runs mirror their neighbors' ports, so their own
    /// ports are skipped to avoid double counting.
    pub fn propagate_flow(&mut self, component: CompId, rate: Real) -> FittingResult<()> {
        let mut chain = Vec::new();
        let mut current = Some(component);
        while let Some(id) = current {
            chain.push(id);
            current = self.get(id)?.trunk;
            if chain.len() > self.components.len() {
                return Err(FittingError::LinkInvariant {
                    what: "trunk chain contains a cycle".to_string(),
                });
            }
        }

        let mut targets: Vec<PortRef> = Vec::new();
        for &id in &chain {
            let c = self.get(id)?;
            if !c.is_straight() {
                if let Some(p) = self.trunk_port_ref(id)? {
                    targets.push(p);
                }
            }
            if let Some(next) = c.trunk {
                if !self.get(next)?.is_straight() {
                    if let Some(p) = self.downstream_port_on_trunk(id)? {
                        targets.push(p);
                    }
                }
            }
        }
        for port in targets {
            self.port_mut(port)?.add_flow(rate);
        }
        Ok(())
    }

    /// The port on `comp`'s trunk-side component that faces back at `comp`.
    pub fn downstream_port_on_trunk(&self, comp: CompId) -> FittingResult<Option<PortRef>> {
        let c = self.get(comp)?;
        let Some(trunk) = c.trunk else {
            return Ok(None);
        };
        let tol = self.tolerances;
        if let Body::Straight(seg) = &c.body {
            // segment ports mirror the neighbor ports exactly
            for port in self.branch_port_refs(trunk)? {
                if self.port(port)?.is_identical(&seg.end, &tol) {
                    return Ok(Some(port));
                }
            }
            return Ok(None);
        }
        let Some(my_port) = c.trunk_port() else {
            return Ok(None);
        };
        if let Body::Straight(tseg) = &self.get(trunk)?.body {
            if tseg.start.is_identical(my_port, &tol) {
                return Ok(Some(PortRef::new(trunk, 0)));
            }
        }
        Ok(self
            .best_complement_for_port(&my_port.position, &my_port.direction, trunk)?)
    }

    /// A complementary port on `other` with positive clearance, if any.
    pub fn best_complement_for_port(
        &self,
        position: &Pt3,
        direction: &Vec3,
        other: CompId,
    ) -> FittingResult<Option<PortRef>> {
        let (found, has_space) = self.opposite_side_port(position, direction, other)?;
        Ok(match found {
            Some(port) if has_space => Some(port),
            _ => None,
        })
    }

    /// Refresh every straight run's ports from its neighbors. Segments
    /// mirror the fitting ports they connect, so whenever fittings move the
    /// mirrored copies must be refreshed.
    pub fn resync_segment_ports(&mut self) -> FittingResult<()> {
        for id in self.straight_ids() {
            let (end_pos, start_pos, trunk, branch) = {
                let c = self.get(id)?;
                let Body::Straight(seg) = &c.body else { continue };
                (
                    seg.end.position,
                    seg.start.position,
                    c.trunk,
                    c.branches.first().copied(),
                )
            };
            if let Some(trunk) = trunk {
                if let Some(port) = self.closest_port(trunk, &end_pos)? {
                    let new_end = self.port(port)?.clone();
                    if let Body::Straight(seg) = &mut self.get_mut(id)?.body {
                        seg.end = new_end;
                    }
                }
            }
            if let Some(branch) = branch {
                if let Some(port) = self.closest_port(branch, &start_pos)? {
                    let new_start = self.port(port)?.clone();
                    if let Body::Straight(seg) = &mut self.get_mut(id)?.body {
                        seg.start = new_start;
                    }
                }
            }
        }
        Ok(())
    }

    /// The port of `comp` closest to `position`.
    pub fn closest_port(&self, comp: CompId, position: &Pt3) -> FittingResult<Option<PortRef>> {
        let c = self.get(comp)?;
        let mut best: Option<(Real, usize)> = None;
        for (i, port) in c.body.ports().into_iter().enumerate() {
            let d = (port.position - position).norm();
            if best.is_none_or(|(bd, _)| d < bd) {
                best = Some((d, i));
            }
        }
        Ok(best.map(|(_, i)| PortRef::new(comp, i)))
    }

    /// Ordered components of a labeled section, trunk side first.
    pub fn components_of_section(&self, section_key: &str) -> Vec<CompId> {
        self.section_lookup
            .get(section_key)
            .cloned()
            .unwrap_or_default()
    }

    /// Look up one component by section key and index in section.
    pub fn component_at(&self, section_key: &str, index: usize) -> Option<CompId> {
        self.section_lookup
            .get(section_key)
            .and_then(|v| v.get(index))
            .copied()
    }
}
