use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::Domain;

/// What the reasoning oracle is asked about one pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReasoningRequest {
    /// Label and description of the requirement.
    pub requirement: String,
    /// Label and description of the capability.
    pub capability: String,
    /// The domain both belong to.
    pub domain: Domain,
    /// What the local layers concluded.
    pub context: String,
}

/// The oracle's structured answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReasoningReply {
    /// Whether the capability satisfies the requirement.
    pub matched: bool,
    /// Confidence in `[0, 1]`.
    pub confidence: f64,
    /// Free-text justification.
    pub explanation: String,
}

/// Failures of the reasoning oracle.
///
/// These never fail a match: the matcher logs them and keeps the best
/// local result.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OracleError {
    /// The call did not complete in time.
    #[error("reasoning oracle timed out after {0:?}")]
    Timeout(Duration),

    /// The oracle could not be reached or returned an error.
    #[error("reasoning oracle unavailable: {0}")]
    Unavailable(String),

    /// The oracle answered with something that is not a valid reply.
    #[error("malformed reasoning reply: {0}")]
    MalformedReply(String),
}

/// An external judge consulted when the local layers are inconclusive.
#[async_trait]
pub trait ReasoningOracle: Send + Sync {
    /// Judge whether the capability satisfies the requirement.
    async fn consult(&self, request: ReasoningRequest) -> Result<ReasoningReply, OracleError>;
}

/// Consult `oracle` under a hard timeout and check the reply.
pub(super) async fn consult(
    oracle: &dyn ReasoningOracle,
    request: ReasoningRequest,
    timeout: Duration,
) -> Result<ReasoningReply, OracleError> {
    let reply = tokio::time::timeout(timeout, oracle.consult(request))
        .await
        .map_err(|_| OracleError::Timeout(timeout))??;

    if !reply.confidence.is_finite() || !(0.0..=1.0).contains(&reply.confidence) {
        return Err(OracleError::MalformedReply(format!(
            "confidence {} is outside [0, 1]",
            reply.confidence
        )));
    }
    Ok(reply)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(f64);

    #[async_trait]
    impl ReasoningOracle for Fixed {
        async fn consult(&self, _request: ReasoningRequest) -> Result<ReasoningReply, OracleError> {
            Ok(ReasoningReply {
                matched: true,
                confidence: self.0,
                explanation: "fixed".to_string(),
            })
        }
    }

    struct Stalled;

    #[async_trait]
    impl ReasoningOracle for Stalled {
        async fn consult(&self, _request: ReasoningRequest) -> Result<ReasoningReply, OracleError> {
            std::future::pending().await
        }
    }

    fn request() -> ReasoningRequest {
        ReasoningRequest {
            requirement: "anodizing".to_string(),
            capability: "surface treatment".to_string(),
            domain: Domain::new("manufacturing"),
            context: String::new(),
        }
    }

    #[tokio::test]
    async fn valid_replies_pass_through() {
        let reply = consult(&Fixed(0.8), request(), Duration::from_secs(1))
            .await
            .unwrap();
        assert!(reply.matched);
    }

    #[tokio::test]
    async fn out_of_range_confidence_is_malformed() {
        let error = consult(&Fixed(1.5), request(), Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(error, OracleError::MalformedReply(_)));
    }

    #[tokio::test]
    async fn stalled_oracles_time_out() {
        let timeout = Duration::from_millis(20);
        let error = consult(&Stalled, request(), timeout).await.unwrap_err();
        assert_eq!(error, OracleError::Timeout(timeout));
    }
}
