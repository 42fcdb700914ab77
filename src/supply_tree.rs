//! Supply trees: multi-facility production plans.
//!
//! A [`SupplyTree`] binds every requirement of a design to a facility
//! capability through [`WorkflowNode`]s, grouped into one [`Workflow`] per
//! design component and linked by directed [`WorkflowConnection`]s. Trees are
//! built by the [`SolutionAssembler`] and checked by the
//! [`SupplyTreeValidator`].

mod assembler;
pub use assembler::SolutionAssembler;

mod model;
pub use model::{
    FacilityRecord, SolutionScore, SupplyTree, UnresolvedRequirement, ValidationState, Workflow,
    WorkflowConnection, WorkflowNode,
};

mod validator;
pub use validator::{rank, SupplyTreeValidator, ValidationReport};
