//! Read-mostly cache of context source registrations, indexed for the
//! federation pass.

use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

const REG_CACHE_TAG: &str = "RegistrationCache:";
const REG_CACHE_FN_REFRESH_TAG: &str = "refresh:";

/// One information descriptor of a registration: what the remote broker
/// claims to hold.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CoverageDescriptor {
    #[serde(rename = "type")]
    pub entity_type: Option<String>,
    pub entity_id: Option<String>,
    pub attributes: Vec<String>,
}

impl CoverageDescriptor {
    /// Federation only propagates subscriptions through descriptors that
    /// cover a whole entity type. Narrower descriptors (specific ids or
    /// attribute subsets) are served by forwarded queries, not subscriptions.
    pub fn is_type_only(&self) -> bool {
        self.entity_type.is_some() && self.entity_id.is_none() && self.attributes.is_empty()
    }
}

/// A cached context source registration.
#[derive(Debug, Clone)]
pub struct RegistrationCacheItem {
    pub registration_id: String,
    pub tenant: String,
    /// `host:port` of the remote broker, no scheme.
    pub address: String,
    pub coverage: Vec<CoverageDescriptor>,
}

/// Immutable index over one generation of the registration cache. Rebuilt
/// wholesale on refresh, never mutated in place.
#[derive(Default)]
pub struct RegistrationSnapshot {
    by_tenant_and_type: HashMap<(String, String), Vec<Arc<RegistrationCacheItem>>>,
    by_id: HashMap<String, Arc<RegistrationCacheItem>>,
}

impl RegistrationSnapshot {
    fn build(items: Vec<RegistrationCacheItem>) -> Self {
        let mut by_tenant_and_type: HashMap<(String, String), Vec<Arc<RegistrationCacheItem>>> =
            HashMap::new();
        let mut by_id = HashMap::new();

        for item in items {
            let item = Arc::new(item);
            by_id.insert(item.registration_id.clone(), item.clone());
            for descriptor in &item.coverage {
                if !descriptor.is_type_only() {
                    debug!(
                        "{REG_CACHE_TAG}:{REG_CACHE_FN_REFRESH_TAG} skipping non-type-only descriptor of '{}'",
                        item.registration_id
                    );
                    continue;
                }
                let Some(entity_type) = &descriptor.entity_type else {
                    continue;
                };
                by_tenant_and_type
                    .entry((item.tenant.clone(), entity_type.clone()))
                    .or_default()
                    .push(item.clone());
            }
        }

        Self {
            by_tenant_and_type,
            by_id,
        }
    }

    /// Registrations whose coverage includes the whole of `entity_type` under
    /// `tenant`, in refresh order.
    pub fn covering(&self, tenant: &str, entity_type: &str) -> &[Arc<RegistrationCacheItem>] {
        self.by_tenant_and_type
            .get(&(tenant.to_string(), entity_type.to_string()))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn find(&self, registration_id: &str) -> Option<&Arc<RegistrationCacheItem>> {
        self.by_id.get(registration_id)
    }
}

/// Holder of the current registration snapshot. Readers load lock-free; the
/// refresh path swaps in a freshly built index.
pub struct RegistrationCache {
    snapshot: ArcSwap<RegistrationSnapshot>,
}

impl RegistrationCache {
    pub fn new() -> Self {
        Self {
            snapshot: ArcSwap::from_pointee(RegistrationSnapshot::default()),
        }
    }

    pub fn refresh(&self, items: Vec<RegistrationCacheItem>) {
        debug!(
            "{REG_CACHE_TAG}:{REG_CACHE_FN_REFRESH_TAG} rebuilding with {} registrations",
            items.len()
        );
        self.snapshot.store(Arc::new(RegistrationSnapshot::build(items)));
    }

    pub fn load(&self) -> Arc<RegistrationSnapshot> {
        self.snapshot.load_full()
    }
}

impl Default for RegistrationCache {
    fn default() -> Self {
        Self::new()
    }
}
