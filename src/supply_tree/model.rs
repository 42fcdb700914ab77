use std::{cmp::Ordering, collections::BTreeMap};

use borsh::BorshSerialize;
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::domain::{
    fingerprint::fingerprint, CapabilityId, ComponentId, DesignId, Domain, FacilityId, NodeId,
    RequirementId,
};

/// One production step: a facility capability discharging one or more
/// requirements of a design component.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkflowNode {
    /// Unique within the tree.
    pub id: NodeId,
    /// The facility that performs the step.
    pub facility: FacilityId,
    /// The capability it uses.
    pub capability: CapabilityId,
    /// The design component the step belongs to.
    pub component: ComponentId,
    /// The requirements the step discharges, in design order.
    pub requirements: Vec<RequirementId>,
    /// Units of work the step places on the facility.
    pub quantity: u32,
    /// Days the step takes.
    pub lead_time_days: u32,
    /// The weakest match confidence among the discharged requirements.
    pub confidence: f64,
    /// Resource states the step relies on: resource id to fingerprint.
    pub assumptions: BTreeMap<String, String>,
}

/// A directed edge between two nodes: `to` needs the output of `from`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct WorkflowConnection {
    /// The upstream node.
    pub from: NodeId,
    /// The downstream node.
    pub to: NodeId,
}

impl WorkflowConnection {
    /// An edge from `from` to `to`.
    #[must_use]
    pub fn new(from: NodeId, to: NodeId) -> Self {
        Self { from, to }
    }
}

/// The steps producing one design component.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Workflow {
    /// The component produced.
    pub component: ComponentId,
    /// Steps in execution order.
    pub nodes: Vec<WorkflowNode>,
    /// Edges between this workflow's nodes.
    pub connections: Vec<WorkflowConnection>,
}

impl Workflow {
    /// The first step, which receives inputs from other workflows.
    #[must_use]
    pub fn first(&self) -> Option<&WorkflowNode> {
        self.nodes.first()
    }

    /// The last step, whose output feeds other workflows.
    #[must_use]
    pub fn last(&self) -> Option<&WorkflowNode> {
        self.nodes.last()
    }
}

/// A requirement that no eligible facility satisfies.
///
/// Reported as part of a normal result rather than as an error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnresolvedRequirement {
    /// The requirement.
    pub requirement: RequirementId,
    /// The component it belongs to.
    pub component: ComponentId,
    /// The requirement's label.
    pub label: String,
    /// Why it is unresolved.
    pub reason: String,
}

/// Summary figures used to rank trees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SolutionScore {
    /// Fraction of requirements discharged.
    pub coverage: f64,
    /// Number of distinct facilities used.
    pub facility_count: usize,
    /// Mean match confidence over all requirements; unresolved ones count as
    /// zero.
    pub aggregate_confidence: f64,
}

/// The facts about a facility that validation relies on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FacilityRecord {
    /// The facility.
    pub id: FacilityId,
    /// Display name.
    pub name: String,
    /// Units the facility can take on, if limited.
    pub capacity: Option<u32>,
    /// Fingerprint of the facility manifest at assembly time.
    pub fingerprint: String,
}

/// Where a tree stands in validation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "reasons", rename_all = "snake_case")]
pub enum ValidationState {
    /// Not yet checked.
    #[default]
    Unvalidated,
    /// Passed every check.
    Valid,
    /// Failed; the reasons are itemized.
    Invalid(Vec<String>),
}

/// A candidate production plan for one design.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SupplyTree {
    pub(super) id: Uuid,
    pub(super) design: DesignId,
    pub(super) domain: Domain,
    pub(super) requirements: Vec<RequirementId>,
    pub(super) facilities: BTreeMap<FacilityId, FacilityRecord>,
    pub(super) due_within_days: Option<u32>,
    pub(super) workflows: Vec<Workflow>,
    pub(super) connections: Vec<WorkflowConnection>,
    pub(super) snapshot: BTreeMap<String, String>,
    pub(super) unresolved: Vec<UnresolvedRequirement>,
    pub(super) score: SolutionScore,
    pub(super) validation: ValidationState,
    pub(super) created_at: DateTime<Utc>,
}

impl SupplyTree {
    /// Unique identifier of this candidate.
    #[must_use]
    pub const fn id(&self) -> Uuid {
        self.id
    }

    /// The design the tree produces.
    #[must_use]
    pub const fn design(&self) -> &DesignId {
        &self.design
    }

    /// The domain of the design.
    #[must_use]
    pub const fn domain(&self) -> &Domain {
        &self.domain
    }

    /// The design's requirements at assembly time, in design order.
    #[must_use]
    pub fn requirements(&self) -> &[RequirementId] {
        &self.requirements
    }

    /// Facilities used by the tree.
    pub fn facilities(&self) -> impl Iterator<Item = &FacilityRecord> {
        self.facilities.values()
    }

    /// Look up a facility used by the tree.
    #[must_use]
    pub fn facility(&self, id: &FacilityId) -> Option<&FacilityRecord> {
        self.facilities.get(id)
    }

    /// The design's deadline at assembly time.
    #[must_use]
    pub const fn due_within_days(&self) -> Option<u32> {
        self.due_within_days
    }

    /// Workflows in design component order.
    #[must_use]
    pub fn workflows(&self) -> &[Workflow] {
        &self.workflows
    }

    /// Edges between workflows.
    #[must_use]
    pub fn cross_connections(&self) -> &[WorkflowConnection] {
        &self.connections
    }

    /// Every edge in the tree: intra-workflow edges first, then
    /// cross-workflow edges.
    pub fn connections(&self) -> impl Iterator<Item = &WorkflowConnection> {
        self.workflows
            .iter()
            .flat_map(|workflow| workflow.connections.iter())
            .chain(self.connections.iter())
    }

    /// Every node in the tree, workflow by workflow.
    pub fn nodes(&self) -> impl Iterator<Item = &WorkflowNode> {
        self.workflows.iter().flat_map(|workflow| workflow.nodes.iter())
    }

    /// Look up a node.
    #[must_use]
    pub fn node(&self, id: &NodeId) -> Option<&WorkflowNode> {
        self.nodes().find(|node| &node.id == id)
    }

    /// Resource states the tree as a whole assumes.
    #[must_use]
    pub const fn snapshot(&self) -> &BTreeMap<String, String> {
        &self.snapshot
    }

    /// Requirements no facility satisfies.
    #[must_use]
    pub fn unresolved(&self) -> &[UnresolvedRequirement] {
        &self.unresolved
    }

    /// Ranking figures.
    #[must_use]
    pub const fn score(&self) -> SolutionScore {
        self.score
    }

    /// The validation state.
    #[must_use]
    pub const fn validation(&self) -> &ValidationState {
        &self.validation
    }

    /// Whether the tree passed validation.
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        matches!(self.validation, ValidationState::Valid)
    }

    /// When the tree was assembled.
    #[must_use]
    pub const fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub(super) fn with_validation(mut self, validation: ValidationState) -> Self {
        self.validation = validation;
        self
    }

    /// Fingerprint of the tree's structure.
    ///
    /// The identifier, timestamp and validation state do not contribute, so
    /// two assemblies of the same plan share a fingerprint.
    #[must_use]
    pub fn fingerprint(&self) -> String {
        #[derive(BorshSerialize)]
        struct NodeData<'a> {
            id: &'a str,
            facility: &'a str,
            capability: &'a str,
            requirements: Vec<&'a str>,
            quantity: u32,
            lead_time_days: u32,
        }

        #[derive(BorshSerialize)]
        struct FingerprintData<'a> {
            design: &'a str,
            domain: &'a str,
            nodes: Vec<NodeData<'a>>,
            connections: Vec<(&'a str, &'a str)>,
            snapshot: &'a BTreeMap<String, String>,
            unresolved: Vec<&'a str>,
        }

        fingerprint(&FingerprintData {
            design: self.design.as_str(),
            domain: self.domain.as_str(),
            nodes: self
                .nodes()
                .map(|node| NodeData {
                    id: node.id.as_str(),
                    facility: node.facility.as_str(),
                    capability: node.capability.as_str(),
                    requirements: node.requirements.iter().map(RequirementId::as_str).collect(),
                    quantity: node.quantity,
                    lead_time_days: node.lead_time_days,
                })
                .collect(),
            connections: self
                .connections()
                .map(|edge| (edge.from.as_str(), edge.to.as_str()))
                .collect(),
            snapshot: &self.snapshot,
            unresolved: self
                .unresolved
                .iter()
                .map(|unresolved| unresolved.requirement.as_str())
                .collect(),
        })
    }

    /// Ranking order: coverage descending, facility count ascending,
    /// aggregate confidence descending, then fingerprint.
    #[must_use]
    pub fn rank_cmp(&self, other: &Self) -> Ordering {
        other
            .score
            .coverage
            .total_cmp(&self.score.coverage)
            .then_with(|| self.score.facility_count.cmp(&other.score.facility_count))
            .then_with(|| {
                other
                    .score
                    .aggregate_confidence
                    .total_cmp(&self.score.aggregate_confidence)
            })
            .then_with(|| self.fingerprint().cmp(&other.fingerprint()))
    }
}
