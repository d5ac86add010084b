//! Interfaces of external collaborators consumed by the core.
//!
//! Storage, persistence and the query-language evaluator are out of scope
//! here; the core only consumes these seams as trait objects, the same way it
//! consumes its transport seams.

use crate::error::ProblemDetails;
use async_trait::async_trait;
use serde_json::Value;

/// Entity storage, used to fetch the current state rendered into notification
/// payloads.
#[async_trait]
pub trait EntityStore: Send + Sync {
    /// Snapshot of an entity, filtered to `attributes` when non-empty.
    async fn fetch_current_state(
        &self,
        entity_id: &str,
        attributes: &[String],
    ) -> Result<Value, ProblemDetails>;
}

/// Persistent subscription storage. A failed insert after the subscription was
/// cached triggers rollback of the cache entry.
#[async_trait]
pub trait SubscriptionStore: Send + Sync {
    async fn insert(&self, tenant: &str, representation: &Value) -> Result<(), ProblemDetails>;
    async fn update(
        &self,
        tenant: &str,
        subscription_id: &str,
        representation: &Value,
    ) -> Result<(), ProblemDetails>;
    async fn delete(&self, tenant: &str, subscription_id: &str) -> Result<(), ProblemDetails>;
}

/// Black-box evaluator for a subscription's query filter expression.
pub trait QueryPredicate: Send + Sync {
    fn matches(&self, filter: &str, entity_snapshot: &Value) -> bool;
}

/// Predicate that admits every entity; used when no evaluator is wired in.
pub struct AcceptAllPredicate;

impl QueryPredicate for AcceptAllPredicate {
    fn matches(&self, _filter: &str, _entity_snapshot: &Value) -> bool {
        true
    }
}
