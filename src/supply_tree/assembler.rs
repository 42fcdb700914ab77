use std::collections::{BTreeMap, BTreeSet};

use chrono::Utc;
use tracing::{debug, instrument};
use uuid::Uuid;

use super::{
    FacilityRecord, SolutionScore, SupplyTree, UnresolvedRequirement, ValidationState, Workflow,
    WorkflowConnection, WorkflowNode,
};
use crate::{
    domain::{CapabilityId, ComponentId, Design, Facility, FacilityId, NodeId},
    scoring::{FacilityScore, ScoreBoard},
};

/// The outcome of one greedy run.
#[derive(Debug, Default)]
struct Selection {
    /// Facility chosen for each requirement index, if any.
    assigned: Vec<Option<FacilityId>>,
    /// Facilities in the order they were chosen.
    chosen: Vec<FacilityId>,
}

impl Selection {
    fn facility_set(&self) -> BTreeSet<FacilityId> {
        self.chosen.iter().cloned().collect()
    }
}

/// Builds candidate supply trees from a score board by greedy set cover.
///
/// For the first unmet requirement (in design order), the eligible facility
/// that covers it and is preferred by, in turn,
///
/// 1. the number of still-unmet requirements it covers,
/// 2. its confidence on that requirement,
/// 3. its aggregate confidence, and
/// 4. the lowest facility identifier
///
/// is chosen, and discharges every unmet requirement it covers. A
/// requirement no eligible facility covers is recorded as unresolved.
///
/// Alternatives are found by banning each facility of the primary solution
/// in turn and re-running the greedy search.
#[derive(Debug, Clone)]
pub struct SolutionAssembler {
    max_alternatives: usize,
}

impl Default for SolutionAssembler {
    fn default() -> Self {
        Self::new(3)
    }
}

impl SolutionAssembler {
    /// An assembler producing at most `max_alternatives` trees (at least
    /// one).
    #[must_use]
    pub fn new(max_alternatives: usize) -> Self {
        Self {
            max_alternatives: max_alternatives.max(1),
        }
    }

    /// Assemble ranked, unvalidated candidate trees for `design`.
    ///
    /// Scores for facilities missing from `facilities` are ignored.
    #[instrument(skip_all, fields(design = %design.id(), facilities = facilities.len()))]
    pub fn assemble(
        &self,
        design: &Design,
        facilities: &[Facility],
        board: &ScoreBoard,
    ) -> Vec<SupplyTree> {
        let facilities: BTreeMap<&FacilityId, &Facility> = facilities
            .iter()
            .map(|facility| (facility.id(), facility))
            .collect();
        let eligible: Vec<&FacilityScore> = board
            .eligible()
            .filter(|score| facilities.contains_key(score.facility()))
            .collect();

        let primary = select(design, &eligible, None);
        let mut seen = BTreeSet::from([primary.facility_set()]);
        let mut selections = Vec::new();
        for banned in &primary.chosen {
            if selections.len() + 1 >= self.max_alternatives {
                break;
            }
            let alternative = select(design, &eligible, Some(banned));
            if !alternative.chosen.is_empty() && seen.insert(alternative.facility_set()) {
                selections.push(alternative);
            }
        }
        selections.insert(0, primary);

        let design_fingerprint = design.fingerprint();
        let mut trees: Vec<_> = selections
            .iter()
            .map(|selection| build(design, &design_fingerprint, &facilities, board, selection))
            .collect();
        trees.sort_by(SupplyTree::rank_cmp);

        debug!(candidates = trees.len(), "Assembled supply trees");
        trees
    }
}

fn select(design: &Design, eligible: &[&FacilityScore], banned: Option<&FacilityId>) -> Selection {
    let requirements = design.requirements();
    let candidates: Vec<&FacilityScore> = eligible
        .iter()
        .copied()
        .filter(|score| Some(score.facility()) != banned)
        .collect();

    let mut selection = Selection {
        assigned: vec![None; requirements.len()],
        chosen: Vec::new(),
    };
    let mut unmet: Vec<usize> = (0..requirements.len()).collect();

    while let Some(&first) = unmet.first() {
        let target = requirements[first].id();
        let covered = |score: &FacilityScore| {
            unmet
                .iter()
                .filter(|&&index| score.covers(requirements[index].id()))
                .count()
        };
        let confidence = |score: &FacilityScore| {
            score
                .best_match(target)
                .map_or(0.0, crate::matching::MatchResult::confidence)
        };

        let best = candidates
            .iter()
            .copied()
            .filter(|score| score.covers(target))
            .max_by(|a, b| {
                covered(a)
                    .cmp(&covered(b))
                    .then_with(|| confidence(a).total_cmp(&confidence(b)))
                    .then_with(|| a.aggregate_confidence().total_cmp(&b.aggregate_confidence()))
                    // `max_by` keeps the greater element, so the lower id must compare greater
                    .then_with(|| b.facility().cmp(a.facility()))
            });

        let Some(score) = best else {
            unmet.remove(0);
            continue;
        };

        let facility = score.facility().clone();
        unmet.retain(|&index| {
            if score.covers(requirements[index].id()) {
                selection.assigned[index] = Some(facility.clone());
                false
            } else {
                true
            }
        });
        selection.chosen.push(facility);
    }

    selection
}

#[allow(clippy::cast_precision_loss)]
fn build(
    design: &Design,
    design_fingerprint: &str,
    facilities: &BTreeMap<&FacilityId, &Facility>,
    board: &ScoreBoard,
    selection: &Selection,
) -> SupplyTree {
    let requirements = design.requirements();

    // (component, facility, capability) -> node, in order of first requirement
    let mut nodes: Vec<WorkflowNode> = Vec::new();
    let mut node_index: BTreeMap<(ComponentId, FacilityId, CapabilityId), usize> = BTreeMap::new();
    let mut unresolved = Vec::new();
    let mut total_confidence = 0.0;
    let mut discharged = 0_usize;

    for (requirement, assigned) in requirements.iter().zip(&selection.assigned) {
        let matched = assigned.as_ref().and_then(|facility| {
            let result = board.get(facility)?.best_match(requirement.id())?;
            let facility = facilities.get(facility)?;
            Some((facility, result))
        });
        let Some((facility, result)) = matched else {
            unresolved.push(UnresolvedRequirement {
                requirement: requirement.id().clone(),
                component: requirement.component().clone(),
                label: requirement.label().to_string(),
                reason: "no eligible facility satisfies the requirement".to_string(),
            });
            continue;
        };

        discharged += 1;
        total_confidence += result.confidence();
        let quantity = requirement.quantity().unwrap_or(1);

        let key = (
            requirement.component().clone(),
            facility.id().clone(),
            result.capability().clone(),
        );
        if let Some(&index) = node_index.get(&key) {
            let node = &mut nodes[index];
            node.requirements.push(requirement.id().clone());
            node.quantity = node.quantity.saturating_add(quantity);
            node.confidence = node.confidence.min(result.confidence());
            continue;
        }

        let lead_time_days = facility
            .capability(result.capability())
            .and_then(crate::domain::Capability::lead_time_days)
            .unwrap_or(0);
        let assumptions = BTreeMap::from([
            (format!("facility:{}", facility.id()), facility.fingerprint()),
            (format!("design:{}", design.id()), design_fingerprint.to_string()),
        ]);
        node_index.insert(key, nodes.len());
        nodes.push(WorkflowNode {
            id: node_id(requirement.component(), facility.id(), result.capability()),
            facility: facility.id().clone(),
            capability: result.capability().clone(),
            component: requirement.component().clone(),
            requirements: vec![requirement.id().clone()],
            quantity,
            lead_time_days,
            confidence: result.confidence(),
            assumptions,
        });
    }

    let mut by_component: BTreeMap<ComponentId, Vec<WorkflowNode>> = BTreeMap::new();
    for node in nodes {
        by_component
            .entry(node.component.clone())
            .or_default()
            .push(node);
    }
    let workflows: Vec<Workflow> = design
        .components()
        .iter()
        .filter_map(|component| by_component.remove(&component.id))
        .map(|nodes| {
            let connections = nodes
                .windows(2)
                .map(|pair| WorkflowConnection::new(pair[0].id.clone(), pair[1].id.clone()))
                .collect();
            Workflow {
                component: nodes[0].component.clone(),
                nodes,
                connections,
            }
        })
        .collect();

    let workflow_of = |component: &ComponentId| {
        workflows
            .iter()
            .find(|workflow| &workflow.component == component)
    };
    let connections = design
        .dependencies()
        .iter()
        .filter_map(|dependency| {
            let upstream = workflow_of(&dependency.dependency)?.last()?;
            let downstream = workflow_of(&dependency.dependent)?.first()?;
            Some(WorkflowConnection::new(
                upstream.id.clone(),
                downstream.id.clone(),
            ))
        })
        .collect();

    let snapshot: BTreeMap<String, String> = workflows
        .iter()
        .flat_map(|workflow| workflow.nodes.iter())
        .flat_map(|node| node.assumptions.clone())
        .collect();

    let used: BTreeMap<FacilityId, FacilityRecord> = workflows
        .iter()
        .flat_map(|workflow| workflow.nodes.iter())
        .filter_map(|node| facilities.get(&node.facility))
        .map(|facility| {
            (
                facility.id().clone(),
                FacilityRecord {
                    id: facility.id().clone(),
                    name: facility.name().to_string(),
                    capacity: facility.capacity(),
                    fingerprint: facility.fingerprint(),
                },
            )
        })
        .collect();

    let count = requirements.len() as f64;
    let score = SolutionScore {
        coverage: if requirements.is_empty() {
            0.0
        } else {
            discharged as f64 / count
        },
        facility_count: used.len(),
        aggregate_confidence: if requirements.is_empty() {
            0.0
        } else {
            total_confidence / count
        },
    };

    SupplyTree {
        id: Uuid::new_v4(),
        design: design.id().clone(),
        domain: design.domain().clone(),
        requirements: requirements.iter().map(|r| r.id().clone()).collect(),
        facilities: used,
        due_within_days: design.due_within_days(),
        workflows,
        connections,
        snapshot,
        unresolved,
        score,
        validation: ValidationState::Unvalidated,
        created_at: Utc::now(),
    }
}

/// `component/facility/capability`, with `%` and `/` escaped in each part so
/// that distinct keys never share an identifier.
fn node_id(component: &ComponentId, facility: &FacilityId, capability: &CapabilityId) -> NodeId {
    fn escape(part: &str) -> String {
        part.replace('%', "%25").replace('/', "%2F")
    }
    NodeId::from(format!(
        "{}/{}/{}",
        escape(component.as_str()),
        escape(facility.as_str()),
        escape(capability.as_str())
    ))
}
