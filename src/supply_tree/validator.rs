use std::{collections::BTreeMap, sync::Arc};

use petgraph::{
    algo::{tarjan_scc, toposort},
    graphmap::{DiGraphMap, UnGraphMap},
    visit::Dfs,
};
use serde::Serialize;
use tracing::{debug, instrument};

use super::{SupplyTree, ValidationState};
use crate::{
    domain::{Design, FacilityId, RequirementId, ValidationMode},
    plugin::DomainPlugin,
};

/// The outcome of checking one tree.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ValidationReport {
    /// Whether every check passed.
    pub valid: bool,
    /// Why the tree is invalid, one entry per violation.
    pub reasons: Vec<String>,
}

impl ValidationReport {
    fn from_reasons(reasons: Vec<String>) -> Self {
        Self {
            valid: reasons.is_empty(),
            reasons,
        }
    }
}

/// Checks the structural invariants of supply trees.
#[derive(Debug, Clone, Default)]
pub struct SupplyTreeValidator {
    mode: ValidationMode,
    plugin: Option<Arc<dyn DomainPlugin>>,
}

impl SupplyTreeValidator {
    /// A validator running the checks of `mode`.
    #[must_use]
    pub const fn new(mode: ValidationMode) -> Self {
        Self { mode, plugin: None }
    }

    /// Append the reasons reported by a domain plug-in.
    #[must_use]
    pub fn with_plugin(mut self, plugin: Arc<dyn DomainPlugin>) -> Self {
        self.plugin = Some(plugin);
        self
    }

    /// The checks this validator runs.
    #[must_use]
    pub const fn mode(&self) -> ValidationMode {
        self.mode
    }

    /// Check `tree` against the design it was assembled for.
    #[must_use]
    pub fn check(&self, tree: &SupplyTree, design: &Design) -> ValidationReport {
        let mut reasons = Vec::new();

        if tree.design() != design.id() {
            reasons.push(format!(
                "tree was assembled for design {}, not {}",
                tree.design(),
                design.id()
            ));
        }

        check_discharge(tree, design, &mut reasons);
        check_structure(tree, &mut reasons);
        check_workflows(tree, &mut reasons);
        check_snapshot(tree, &mut reasons);

        if self.mode == ValidationMode::Strict {
            check_capacity(tree, &mut reasons);
            check_timeline(tree, design, &mut reasons);
        }

        if let Some(plugin) = &self.plugin {
            reasons.extend(plugin.validate(tree, design));
        }

        ValidationReport::from_reasons(reasons)
    }

    /// Check `tree` and return it with its validation state set.
    #[instrument(skip_all, fields(tree = %tree.id(), mode = ?self.mode))]
    #[must_use]
    pub fn validate(&self, tree: SupplyTree, design: &Design) -> SupplyTree {
        let report = self.check(&tree, design);
        debug!(valid = report.valid, reasons = report.reasons.len(), "Validated supply tree");
        let state = if report.valid {
            ValidationState::Valid
        } else {
            ValidationState::Invalid(report.reasons)
        };
        tree.with_validation(state)
    }
}

/// Partition validated trees into ranked valid trees and rejected trees.
///
/// Valid trees are ordered by [`SupplyTree::rank_cmp`]; rejected trees keep
/// their input order. A tree that was never validated is rejected with a
/// reason saying so.
#[must_use]
pub fn rank(trees: Vec<SupplyTree>) -> (Vec<SupplyTree>, Vec<SupplyTree>) {
    let (mut valid, rejected): (Vec<_>, Vec<_>) =
        trees.into_iter().partition(SupplyTree::is_valid);
    valid.sort_by(SupplyTree::rank_cmp);

    let rejected = rejected
        .into_iter()
        .map(|tree| {
            if matches!(tree.validation(), ValidationState::Unvalidated) {
                tree.with_validation(ValidationState::Invalid(vec![
                    "tree has not been validated".to_string(),
                ]))
            } else {
                tree
            }
        })
        .collect();

    (valid, rejected)
}

fn check_discharge(tree: &SupplyTree, design: &Design, reasons: &mut Vec<String>) {
    let mut discharged: BTreeMap<&RequirementId, Vec<&str>> = BTreeMap::new();
    for node in tree.nodes() {
        for requirement in &node.requirements {
            discharged
                .entry(requirement)
                .or_default()
                .push(node.id.as_str());
        }
    }

    for requirement in design.requirements() {
        match discharged.get(requirement.id()).map(Vec::as_slice) {
            None | Some([]) => {
                let unresolved = tree
                    .unresolved()
                    .iter()
                    .find(|unresolved| &unresolved.requirement == requirement.id());
                reasons.push(match unresolved {
                    Some(unresolved) => format!(
                        "requirement {} is unresolved: {}",
                        requirement.id(),
                        unresolved.reason
                    ),
                    None => format!("requirement {} is not discharged", requirement.id()),
                });
            }
            Some([_]) => {}
            Some(nodes) => reasons.push(format!(
                "requirement {} is discharged by {} nodes: {}",
                requirement.id(),
                nodes.len(),
                nodes.join(", ")
            )),
        }
    }

    for (requirement, nodes) in &discharged {
        if design.requirement(requirement).is_none() {
            reasons.push(format!(
                "node {} discharges unknown requirement {requirement}",
                nodes.join(", ")
            ));
        }
    }
}

fn check_structure(tree: &SupplyTree, reasons: &mut Vec<String>) {
    let mut graph: DiGraphMap<&str, ()> = DiGraphMap::new();

    for workflow in tree.workflows() {
        for node in &workflow.nodes {
            if graph.contains_node(node.id.as_str()) {
                reasons.push(format!("node identifier {} is used more than once", node.id));
            }
            graph.add_node(node.id.as_str());

            if node.component != workflow.component {
                reasons.push(format!(
                    "node {} belongs to component {} but sits in the workflow for {}",
                    node.id, node.component, workflow.component
                ));
            }
            if tree.facility(&node.facility).is_none() {
                reasons.push(format!(
                    "node {} uses facility {}, which the tree does not record",
                    node.id, node.facility
                ));
            }
        }
    }

    for connection in tree.connections() {
        let mut dangling = false;
        for endpoint in [&connection.from, &connection.to] {
            if !graph.contains_node(endpoint.as_str()) {
                reasons.push(format!(
                    "connection {} -> {} refers to missing node {endpoint}",
                    connection.from, connection.to
                ));
                dangling = true;
            }
        }
        if !dangling {
            graph.add_edge(connection.from.as_str(), connection.to.as_str(), ());
        }
    }

    let mut cycles = Vec::new();
    for component in tarjan_scc(&graph) {
        if component.len() > 1 || graph.contains_edge(component[0], component[0]) {
            let mut nodes = component;
            nodes.sort_unstable();
            cycles.push(nodes);
        }
    }
    cycles.sort();
    for nodes in cycles {
        reasons.push(format!("cycle through nodes {}", nodes.join(", ")));
    }
}

fn check_workflows(tree: &SupplyTree, reasons: &mut Vec<String>) {
    for workflow in tree.workflows() {
        let mut graph: UnGraphMap<&str, ()> = UnGraphMap::new();
        for node in &workflow.nodes {
            graph.add_node(node.id.as_str());
            if node.requirements.is_empty() {
                reasons.push(format!("node {} discharges no requirement", node.id));
            }
        }

        for connection in &workflow.connections {
            let (from, to) = (connection.from.as_str(), connection.to.as_str());
            let outside = [from, to]
                .into_iter()
                .find(|endpoint| !graph.contains_node(*endpoint));
            match outside {
                // missing nodes are reported by the structural checks
                Some(endpoint) if tree.node(&endpoint.into()).is_some() => {
                    reasons.push(format!(
                        "connection {from} -> {to} leaves the workflow for {}",
                        workflow.component
                    ));
                }
                Some(_) => {}
                None => {
                    graph.add_edge(from, to, ());
                }
            }
        }

        let Some(first) = workflow.first() else {
            continue;
        };
        let mut dfs = Dfs::new(&graph, first.id.as_str());
        let mut reached = 0;
        while dfs.next(&graph).is_some() {
            reached += 1;
        }
        if reached < graph.node_count() {
            reasons.push(format!("workflow for {} is not connected", workflow.component));
        }
    }
}

fn check_snapshot(tree: &SupplyTree, reasons: &mut Vec<String>) {
    for workflow in tree.workflows() {
        let mut assumed: BTreeMap<&str, (&str, &str)> = BTreeMap::new();
        for node in &workflow.nodes {
            for (resource, state) in &node.assumptions {
                match assumed.get(resource.as_str()) {
                    Some(&(other, other_state)) if other_state != state.as_str() => {
                        reasons.push(format!(
                            "nodes {other} and {} assume different states of {resource}",
                            node.id
                        ));
                    }
                    Some(_) => {}
                    None => {
                        assumed.insert(resource.as_str(), (node.id.as_str(), state.as_str()));
                    }
                }
            }
        }
    }

    for node in tree.nodes() {
        for (resource, state) in &node.assumptions {
            let recorded = tree.snapshot().get(resource);
            if recorded.is_some_and(|recorded| recorded != state) {
                reasons.push(format!(
                    "node {} assumes a state of {resource} that differs from the tree snapshot",
                    node.id
                ));
            }
        }
    }
}

fn check_capacity(tree: &SupplyTree, reasons: &mut Vec<String>) {
    let mut loads: BTreeMap<&FacilityId, u64> = BTreeMap::new();
    for node in tree.nodes() {
        *loads.entry(&node.facility).or_default() += u64::from(node.quantity);
    }

    for (facility, load) in loads {
        let Some(capacity) = tree.facility(facility).and_then(|record| record.capacity) else {
            continue;
        };
        if load > u64::from(capacity) {
            reasons.push(format!(
                "facility {facility} is asked for {load} units but has capacity for {capacity}"
            ));
        }
    }
}

fn check_timeline(tree: &SupplyTree, design: &Design, reasons: &mut Vec<String>) {
    let Some(due) = design.due_within_days() else {
        return;
    };

    let mut graph: DiGraphMap<&str, ()> = DiGraphMap::new();
    let mut lead_times = BTreeMap::new();
    for node in tree.nodes() {
        graph.add_node(node.id.as_str());
        lead_times.insert(node.id.as_str(), u64::from(node.lead_time_days));
    }
    for connection in tree.connections() {
        if graph.contains_node(connection.from.as_str()) && graph.contains_node(connection.to.as_str())
        {
            graph.add_edge(connection.from.as_str(), connection.to.as_str(), ());
        }
    }

    // cycles are reported by the structural checks
    let Ok(order) = toposort(&graph, None) else {
        return;
    };

    let mut finish: BTreeMap<&str, u64> = BTreeMap::new();
    for node in order {
        let start = graph
            .neighbors_directed(node, petgraph::Direction::Incoming)
            .filter_map(|upstream| finish.get(upstream).copied())
            .max()
            .unwrap_or(0);
        let own = lead_times.get(node).copied().unwrap_or(0);
        finish.insert(node, start + own);
    }

    let total = finish.values().copied().max().unwrap_or(0);
    if total > u64::from(due) {
        reasons.push(format!(
            "longest lead-time path takes {total} days but the design is due within {due}"
        ));
    }
}
