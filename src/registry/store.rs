//! The registry container: insert, lookup, remove and matching snapshots.

use crate::error::ProblemDetails;
use crate::registry::subscription::CachedSubscription;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

const SUB_REGISTRY_TAG: &str = "SubscriptionRegistry:";
const SUB_REGISTRY_FN_INSERT_TAG: &str = "insert:";
const SUB_REGISTRY_FN_REMOVE_TAG: &str = "remove:";

pub(crate) type TenantSubscriptions = HashMap<String, Vec<Arc<CachedSubscription>>>;

/// The one long-lived shared mutable structure of the core.
///
/// The tenant map lock is held only for structural operations; per-subscription
/// state and counters have their own finer-grained synchronization so
/// concurrent matching passes do not serialize on each other.
pub struct SubscriptionRegistry {
    subscriptions: Mutex<TenantSubscriptions>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self {
            subscriptions: Mutex::new(HashMap::new()),
        }
    }

    /// Links a freshly built subscription into its tenant's active list.
    /// A duplicate id within the tenant fails with AlreadyExists; the caller
    /// must not have persisted yet.
    pub async fn insert(
        &self,
        subscription: CachedSubscription,
    ) -> Result<Arc<CachedSubscription>, ProblemDetails> {
        let mut subscriptions = self.subscriptions.lock().await;
        let tenant_list = subscriptions
            .entry(subscription.tenant.clone())
            .or_default();

        if tenant_list.iter().any(|s| s.id == subscription.id) {
            warn!(
                "{SUB_REGISTRY_TAG}:{SUB_REGISTRY_FN_INSERT_TAG} duplicate subscription id: {}",
                subscription.id
            );
            return Err(ProblemDetails::already_exists(
                "Subscription already exists",
                &subscription.id,
            ));
        }

        debug!(
            "{SUB_REGISTRY_TAG}:{SUB_REGISTRY_FN_INSERT_TAG} caching subscription '{}' for tenant '{}'",
            subscription.id, subscription.tenant
        );
        let subscription = Arc::new(subscription);
        tenant_list.push(subscription.clone());
        Ok(subscription)
    }

    pub async fn lookup(&self, tenant: &str, id: &str) -> Option<Arc<CachedSubscription>> {
        let subscriptions = self.subscriptions.lock().await;
        subscriptions
            .get(tenant)
            .and_then(|list| list.iter().find(|s| s.id == id).cloned())
    }

    /// Unlinks a subscription; used on delete and on rollback when downstream
    /// persistence fails.
    pub async fn remove(&self, tenant: &str, id: &str) -> Option<Arc<CachedSubscription>> {
        let mut subscriptions = self.subscriptions.lock().await;
        let tenant_list = subscriptions.get_mut(tenant)?;
        let position = tenant_list.iter().position(|s| s.id == id);
        match position {
            Some(position) => {
                debug!(
                    "{SUB_REGISTRY_TAG}:{SUB_REGISTRY_FN_REMOVE_TAG} removing subscription '{id}'"
                );
                Some(tenant_list.remove(position))
            }
            None => {
                warn!(
                    "{SUB_REGISTRY_TAG}:{SUB_REGISTRY_FN_REMOVE_TAG} no such subscription: '{id}'"
                );
                None
            }
        }
    }

    /// Live references for one tenant's matching pass. The lock is released
    /// before matching begins; mutation of the returned subscriptions goes
    /// through their own locks.
    pub async fn snapshot(&self, tenant: &str) -> Vec<Arc<CachedSubscription>> {
        let subscriptions = self.subscriptions.lock().await;
        subscriptions.get(tenant).cloned().unwrap_or_default()
    }

    /// Snapshot across all tenants, used when multitenancy is disabled.
    pub async fn snapshot_all(&self) -> Vec<Arc<CachedSubscription>> {
        let subscriptions = self.subscriptions.lock().await;
        subscriptions.values().flatten().cloned().collect()
    }
}

impl Default for SubscriptionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
