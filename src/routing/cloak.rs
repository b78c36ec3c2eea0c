//! Cloak gate contract.
//!
//! The rule set deciding whether a visit may reach real routing lives
//! outside the engine. The engine only calls it once per visit, before pool
//! filtering, and treats a gate that does not answer in time as a deny.

use std::time::Duration;

use async_trait::async_trait;

use crate::model::VisitContext;

/// Decision of a cloak gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloakDecision {
    Allow,
    Deny,
}

/// Pre-routing filter for randomizers with cloaking enabled.
///
/// Implementations must not have side effects the engine depends on.
#[async_trait]
pub trait CloakGate: Send + Sync {
    async fn evaluate(&self, visit: &VisitContext) -> CloakDecision;
}

/// Lets every visit through.
#[derive(Debug, Default, Clone, Copy)]
pub struct AllowAll;

#[async_trait]
impl CloakGate for AllowAll {
    async fn evaluate(&self, _visit: &VisitContext) -> CloakDecision {
        CloakDecision::Allow
    }
}

/// Diverts every visit.
#[derive(Debug, Default, Clone, Copy)]
pub struct DenyAll;

#[async_trait]
impl CloakGate for DenyAll {
    async fn evaluate(&self, _visit: &VisitContext) -> CloakDecision {
        CloakDecision::Deny
    }
}

/// Adapts a synchronous rule function into a gate.
pub struct FnGate<F>(pub F);

#[async_trait]
impl<F> CloakGate for FnGate<F>
where
    F: Fn(&VisitContext) -> CloakDecision + Send + Sync,
{
    async fn evaluate(&self, visit: &VisitContext) -> CloakDecision {
        (self.0)(visit)
    }
}

/// Runs the gate with a deadline. No answer within `timeout` means deny.
pub async fn evaluate_with_timeout(
    gate: &dyn CloakGate,
    visit: &VisitContext,
    timeout: Duration,
) -> CloakDecision {
    match tokio::time::timeout(timeout, gate.evaluate(visit)).await {
        Ok(decision) => decision,
        Err(_) => {
            tracing::warn!(
                timeout_ms = timeout.as_millis() as u64,
                "cloak gate timed out, denying"
            );
            CloakDecision::Deny
        }
    }
}
