//! Hydraulic solving over a built fitting tree.
//!
//! Solving alternates three steps until the leaf flows settle: assign port
//! flow rates from the leaf demands, compute each component's pressure
//! delta, and sweep static pressures section by section from the outlet
//! outward. The pressure and flow models are pluggable; this module owns
//! the sweep and the iteration loop, not the physics.

use serde::{Deserialize, Serialize};
use tracing::debug;

use pf_core::Real;
use pf_flow::FlowTree;

use crate::arena::FittingTree;
use crate::component::Component;
use crate::error::FittingResult;
use crate::port::FlowData;

/// Which way pressure is swept through the network.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowDirection {
    /// Fluid runs from the leaves toward the outlet (drainage).
    TowardTrunk,
    /// Fluid runs from the outlet toward the leaves (supply).
    TowardLeafs,
}

/// Loss and state between one branch port and the trunk port.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct BranchDelta {
    pub loss: Real,
    /// Hydrostatic gain from the elevation drop on this path.
    pub static_gain: Real,
    pub flow_rate: Real,
    pub velocity: Real,
    pub dynamic_pressure: Real,
}

/// A component's solved pressure behavior for one iteration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PressureDelta {
    /// One entry per branch port, in port order.
    pub branches: Vec<BranchDelta>,
    /// Pinned static pressure, set only on the outlet terminal.
    pub fixed_pressure: Option<Real>,
}

impl PressureDelta {
    pub fn single(branch: BranchDelta) -> Self {
        Self {
            branches: vec![branch],
            fixed_pressure: None,
        }
    }

    /// Static pressure change seen crossing the component toward `branch`.
    pub fn pressure_change(&self, branch: usize, direction: FlowDirection) -> Real {
        let b = self.branches.get(branch).copied().unwrap_or_default();
        match direction {
            FlowDirection::TowardTrunk => b.static_gain - b.loss,
            FlowDirection::TowardLeafs => b.static_gain + b.loss,
        }
    }
}

/// Assigns port flow rates from leaf demands.
pub trait FlowAssigner {
    fn assign_flows(&self, tree: &mut FittingTree, flow: &FlowTree) -> FittingResult<()>;
}

/// Computes a component's pressure delta from its geometry and port flows.
pub trait PressureCalculator {
    fn delta_for(
        &self,
        tree: &FittingTree,
        flow: &FlowTree,
        component: &Component,
    ) -> FittingResult<Option<PressureDelta>>;
}

/// Adjusts leaf demands from solved pressures between iterations.
pub trait LeafFlowUpdate {
    /// Returns true when demands changed and another iteration is needed.
    fn update(&mut self, tree: &FittingTree, flow: &mut FlowTree) -> FittingResult<bool>;
}

/// Sweep static pressures from the outlet outward, section by section.
///
/// Sections are visited shortest key first so a section's trunk-side
/// neighbor is always solved before the section itself. Per-component
/// problems are collected as messages, not errors, so one bad fitting does
/// not abort the sweep.
pub fn assign_port_pressures(tree: &mut FittingTree, direction: FlowDirection) -> Vec<String> {
    let mut errors = Vec::new();
    let mut keys: Vec<String> = tree.section_lookup.keys().cloned().collect();
    keys.sort_by_key(|k| (k.len(), k.clone()));
    for key in keys {
        for id in tree.components_of_section(&key) {
            if let Err(e) = assign_component_pressures(tree, id, direction) {
                let name = tree
                    .component(id)
                    .map(|c| c.name.clone())
                    .unwrap_or_else(|| id.to_string());
                errors.push(format!("{name}: {e}"));
            }
        }
    }
    errors
}

fn assign_component_pressures(
    tree: &mut FittingTree,
    id: pf_core::CompId,
    direction: FlowDirection,
) -> FittingResult<()> {
    let Some(delta) = tree.get(id)?.pressure.clone() else {
        return Ok(());
    };

    // incoming static pressure: pinned at the outlet, otherwise read off
    // the already-solved port facing us on the trunk side
    let upstream_static = if let Some(fp) = delta.fixed_pressure {
        fp
    } else if let Some(port) = tree.downstream_port_on_trunk(id)? {
        tree.port(port)?
            .flow
            .map_or(0.0, |f| f.static_pressure)
    } else {
        0.0
    };

    let c = tree.get(id)?;
    let is_leaf_terminal = c.is_terminal() && c.trunk.is_some();
    if is_leaf_terminal {
        // a leaf terminal has no branch ports; its solved pressure is
        // recorded on its own trunk port
        let static_pressure = upstream_static - delta.pressure_change(0, direction);
        let branch = delta.branches.first().copied().unwrap_or_default();
        if let Some(port) = tree.get_mut(id)?.trunk_port_mut() {
            port.flow = Some(FlowData::new(
                static_pressure,
                branch.flow_rate,
                branch.velocity,
                branch.dynamic_pressure,
            ));
        }
        return Ok(());
    }

    let branch_refs = tree.branch_port_refs(id)?;
    for (i, pref) in branch_refs.into_iter().enumerate() {
        let branch = delta.branches.get(i).copied().unwrap_or_default();
        let static_pressure = upstream_static - delta.pressure_change(i, direction);
        tree.port_mut(pref)?.flow = Some(FlowData::new(
            static_pressure,
            branch.flow_rate,
            branch.velocity,
            branch.dynamic_pressure,
        ));
    }
    Ok(())
}

#[derive(Debug, Default)]
pub struct SolveOutcome {
    pub iterations: usize,
    pub converged: bool,
    pub errors: Vec<String>,
}

pub const DEFAULT_MAX_ITERATIONS: usize = 100;

/// Run the solve loop until the leaf flows stop changing.
///
/// Without an update strategy a single pass is exact and the loop runs
/// once. Section data on the flow tree is refreshed after every demand
/// change and once more on exit.
pub fn solve(
    tree: &mut FittingTree,
    flow: &mut FlowTree,
    assigner: &dyn FlowAssigner,
    pressures: &dyn PressureCalculator,
    mut update: Option<&mut dyn LeafFlowUpdate>,
    direction: FlowDirection,
    max_iterations: usize,
) -> FittingResult<SolveOutcome> {
    let mut outcome = SolveOutcome::default();
    for iteration in 0..max_iterations {
        outcome.iterations = iteration + 1;
        assigner.assign_flows(tree, flow)?;
        for id in tree.ids() {
            let delta = {
                let c = tree.get(id)?;
                pressures.delta_for(tree, flow, c)?
            };
            tree.get_mut(id)?.pressure = delta;
        }
        let errors = assign_port_pressures(tree, direction);
        if !errors.is_empty() {
            outcome.errors = errors;
            break;
        }
        match update.as_deref_mut() {
            None => {
                outcome.converged = true;
                break;
            }
            Some(strategy) => {
                if !strategy.update(tree, flow)? {
                    outcome.converged = true;
                    break;
                }
                flow.update_sections()?;
            }
        }
    }
    flow.update_sections()?;
    debug!(
        iterations = outcome.iterations,
        converged = outcome.converged,
        "solve finished"
    );
    Ok(outcome)
}
