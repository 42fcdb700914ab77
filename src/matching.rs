//! The layered requirement/capability matcher.
//!
//! A pair is run through a fixed cascade: exact term equality, the domain's
//! capability rules, embedding similarity and, optionally, an external
//! reasoning oracle. Each layer is only consulted while no earlier layer has
//! produced a result at or above the domain's acceptance threshold.

mod exact;
mod heuristic;

mod matcher;
pub use matcher::{LayeredMatcher, MatchOptions};

mod reasoning;
pub use reasoning::{OracleError, ReasoningOracle, ReasoningReply, ReasoningRequest};

mod result;
pub use result::{MatchLayer, MatchResult};

mod semantic;
pub use semantic::{cosine_similarity, Embedder, HashingEmbedder, SemanticLayer};
