//! Subscription propagation to remote brokers whose registrations cover a
//! subscribed entity type.

use crate::config::DEFAULT_TENANT;
use crate::dispatch::{NotificationDispatcher, OutboundRequest};
use crate::error::ProblemDetails;
use crate::federation::registration::{RegistrationCache, RegistrationCacheItem};
use crate::registry::{CachedSubscription, SubordinateSubscription};
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info, warn};

const FEDERATION_TAG: &str = "FederationManager:";
const FEDERATION_FN_FEDERATE_TAG: &str = "federate:";
const FEDERATION_FN_CREATE_TAG: &str = "create_subordinate:";
const FEDERATION_FN_TEARDOWN_TAG: &str = "teardown:";

/// Creates and tears down subordinate subscriptions on remote brokers.
///
/// Propagation is per entity filter: every wildcard-id, typed entity filter of
/// a new subscription is checked against the registration coverage index, and
/// each covering registration gets one subordinate subscription whose
/// notifications flow back through the relay endpoint.
pub struct FederationManager {
    registrations: Arc<RegistrationCache>,
    dispatcher: Arc<NotificationDispatcher>,
    /// `host:port` under which remote brokers can reach this one.
    local_address: String,
}

impl FederationManager {
    pub fn new(
        registrations: Arc<RegistrationCache>,
        dispatcher: Arc<NotificationDispatcher>,
        local_address: String,
    ) -> Self {
        Self {
            registrations,
            dispatcher,
            local_address,
        }
    }

    pub fn registrations(&self) -> &Arc<RegistrationCache> {
        &self.registrations
    }

    /// Propagates a freshly created subscription. A remote failure skips that
    /// registration and moves on; local creation already succeeded and partial
    /// propagation is acceptable.
    pub async fn federate(&self, subscription: &Arc<CachedSubscription>) {
        let snapshot = self.registrations.load();
        let entity_infos = subscription.config().entity_infos;

        for info in &entity_infos {
            // Only whole-type filters propagate.
            if !info.id_matcher.is_wildcard() || info.entity_type.is_empty() {
                continue;
            }
            for registration in snapshot.covering(&subscription.tenant, &info.entity_type) {
                match self
                    .create_subordinate(subscription, registration, &info.entity_type)
                    .await
                {
                    Ok(subordinate) => {
                        info!(
                            "{FEDERATION_TAG}:{FEDERATION_FN_FEDERATE_TAG} created subordinate '{}' on '{}'",
                            subordinate.subscription_id, registration.address
                        );
                    }
                    Err(err) => {
                        warn!(
                            "{FEDERATION_TAG}:{FEDERATION_FN_FEDERATE_TAG} propagation to '{}' failed: {err}",
                            registration.address
                        );
                    }
                }
            }
        }
    }

    /// Creates one subordinate subscription on a remote broker and records it
    /// under the parent. The parent's subordinate lock is held across the
    /// remote call so concurrent run-number allocation stays serialized.
    async fn create_subordinate(
        &self,
        subscription: &Arc<CachedSubscription>,
        registration: &Arc<RegistrationCacheItem>,
        entity_type: &str,
    ) -> Result<SubordinateSubscription, ProblemDetails> {
        let mut subordinates = subscription.subordinates().lock().await;

        let run_no = subordinates
            .iter()
            .map(|subordinate| subordinate.run_no)
            .max()
            .unwrap_or(0)
            + 1;
        let subordinate_id = format!("{}:{}", subscription.id, run_no);

        let body = json!({
            "id": subordinate_id,
            "type": "Subscription",
            "entities": [ { "type": entity_type } ],
            "notification": {
                "endpoint": {
                    "uri": format!(
                        "http://{}/ngsi-ld/ex/v1/notifications/{}",
                        self.local_address, subscription.id
                    )
                }
            }
        });
        let body = serde_json::to_vec(&body)
            .map_err(|err| ProblemDetails::internal("Payload rendering failed", &err.to_string()))?;

        debug!(
            "{FEDERATION_TAG}:{FEDERATION_FN_CREATE_TAG} creating '{subordinate_id}' on '{}'",
            registration.address
        );
        let mut headers = vec![("Content-Type".to_string(), "application/json".to_string())];
        if subscription.tenant != DEFAULT_TENANT {
            headers.push(("NGSILD-Tenant".to_string(), subscription.tenant.clone()));
        }
        let request = OutboundRequest {
            verb: "POST".to_string(),
            url: format!("http://{}/ngsi-ld/v1/subscriptions", registration.address),
            headers,
            body: Some(body),
            timeout_ms: self.dispatcher.timeout_ms(),
        };
        let response = self
            .dispatcher
            .outbound_request(request)
            .await
            .map_err(|err| {
                ProblemDetails::internal("Subordinate subscription creation failed", &err.to_string())
            })?;

        if response.status != 201 {
            return Err(ProblemDetails::internal(
                "Subordinate subscription creation failed",
                &format!(
                    "remote broker '{}' answered {}",
                    registration.address, response.status
                ),
            ));
        }

        let subordinate = SubordinateSubscription {
            subscription_id: subordinate_id,
            registration_id: registration.registration_id.clone(),
            run_no,
        };
        subordinates.push(subordinate.clone());
        Ok(subordinate)
    }

    /// Best-effort removal of a deleted subscription's subordinates on their
    /// remote brokers. A failed remote delete is logged and skipped; the
    /// subordinate record is dropped either way.
    pub async fn teardown(&self, subscription: &Arc<CachedSubscription>) {
        let snapshot = self.registrations.load();
        let mut subordinates = subscription.subordinates().lock().await;

        for subordinate in subordinates.drain(..) {
            let Some(registration) = snapshot.find(&subordinate.registration_id) else {
                warn!(
                    "{FEDERATION_TAG}:{FEDERATION_FN_TEARDOWN_TAG} registration '{}' gone; dropping '{}'",
                    subordinate.registration_id, subordinate.subscription_id
                );
                continue;
            };

            let mut headers = Vec::new();
            if subscription.tenant != DEFAULT_TENANT {
                headers.push(("NGSILD-Tenant".to_string(), subscription.tenant.clone()));
            }
            let request = OutboundRequest {
                verb: "DELETE".to_string(),
                url: format!(
                    "http://{}/ngsi-ld/v1/subscriptions/{}",
                    registration.address, subordinate.subscription_id
                ),
                headers,
                body: None,
                timeout_ms: self.dispatcher.timeout_ms(),
            };
            match self.dispatcher.outbound_request(request).await {
                Ok(response) if response.is_success() || response.status == 404 => {
                    debug!(
                        "{FEDERATION_TAG}:{FEDERATION_FN_TEARDOWN_TAG} removed '{}' from '{}'",
                        subordinate.subscription_id, registration.address
                    );
                }
                Ok(response) => {
                    warn!(
                        "{FEDERATION_TAG}:{FEDERATION_FN_TEARDOWN_TAG} remote broker '{}' answered {}",
                        registration.address, response.status
                    );
                }
                Err(err) => {
                    warn!(
                        "{FEDERATION_TAG}:{FEDERATION_FN_TEARDOWN_TAG} delete on '{}' failed: {err}",
                        registration.address
                    );
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::FederationManager;
    use crate::context::{NameResolver, VocabularyContext};
    use crate::dispatch::{
        DisabledMqttChannel, HttpRequester, NotificationDispatcher, OutboundRequest,
        OutboundResponse,
    };
    use crate::error::{ProblemDetails, TransportError};
    use crate::external::{AcceptAllPredicate, EntityStore};
    use crate::federation::registration::{
        CoverageDescriptor, RegistrationCache, RegistrationCacheItem,
    };
    use crate::registry::{
        CachedSubscription, EndpointDraft, EntitySelector, NotificationDraft, SubscriptionDraft,
    };
    use async_trait::async_trait;
    use chrono::Utc;
    use serde_json::{json, Value};
    use std::sync::{Arc, Mutex as StdMutex};

    struct RecordingRequester {
        requests: StdMutex<Vec<OutboundRequest>>,
        status: u16,
    }

    #[async_trait]
    impl HttpRequester for RecordingRequester {
        async fn request(
            &self,
            request: OutboundRequest,
        ) -> Result<OutboundResponse, TransportError> {
            self.requests.lock().expect("lock requests").push(request);
            Ok(OutboundResponse {
                status: self.status,
                body: None,
            })
        }
    }

    struct EmptyEntityStore;

    #[async_trait]
    impl EntityStore for EmptyEntityStore {
        async fn fetch_current_state(
            &self,
            entity_id: &str,
            _attributes: &[String],
        ) -> Result<Value, ProblemDetails> {
            Ok(json!({ "id": entity_id }))
        }
    }

    fn manager_for_tenant(
        status: u16,
        tenant: &str,
    ) -> (FederationManager, Arc<RecordingRequester>) {
        let http = Arc::new(RecordingRequester {
            requests: StdMutex::new(Vec::new()),
            status,
        });
        let resolver = Arc::new(NameResolver::new(Arc::new(VocabularyContext::new(
            "https://uri.etsi.org/ngsi-ld/default-context/",
            &[],
        ))));
        let dispatcher = Arc::new(NotificationDispatcher::new(
            Arc::new(EmptyEntityStore),
            Arc::new(AcceptAllPredicate),
            http.clone(),
            Arc::new(DisabledMqttChannel),
            resolver,
            5000,
        ));

        let registrations = Arc::new(RegistrationCache::new());
        registrations.refresh(vec![RegistrationCacheItem {
            registration_id: "urn:reg:1".to_string(),
            tenant: tenant.to_string(),
            address: "remote.example.org:1026".to_string(),
            coverage: vec![CoverageDescriptor {
                entity_type: Some("Sensor".to_string()),
                ..Default::default()
            }],
        }]);

        (
            FederationManager::new(registrations, dispatcher, "local.example.org:1026".to_string()),
            http,
        )
    }

    fn manager(status: u16) -> (FederationManager, Arc<RecordingRequester>) {
        manager_for_tenant(status, "")
    }

    fn subscription_for_tenant(
        tenant: &str,
        selectors: Vec<EntitySelector>,
    ) -> Arc<CachedSubscription> {
        let resolver = NameResolver::new(Arc::new(VocabularyContext::new(
            "https://uri.etsi.org/ngsi-ld/default-context/",
            &[],
        )));
        let draft = SubscriptionDraft {
            entities: selectors,
            notification: NotificationDraft {
                endpoint: EndpointDraft {
                    uri: "http://sink.example.org/notify".to_string(),
                    ..Default::default()
                },
                ..Default::default()
            },
            ..Default::default()
        };
        Arc::new(
            CachedSubscription::from_draft(
                tenant,
                "urn:sub:parent".to_string(),
                &draft,
                &resolver,
                None,
                Utc::now(),
            )
            .expect("valid draft"),
        )
    }

    fn subscription(selectors: Vec<EntitySelector>) -> Arc<CachedSubscription> {
        subscription_for_tenant("", selectors)
    }

    #[tokio::test]
    async fn covered_wildcard_filter_creates_a_subordinate_with_run_number_one() {
        let (manager, http) = manager(201);
        let sub = subscription(vec![EntitySelector {
            entity_type: "Sensor".to_string(),
            ..Default::default()
        }]);

        manager.federate(&sub).await;

        let subordinates = sub.subordinate_list().await;
        assert_eq!(subordinates.len(), 1);
        assert_eq!(subordinates[0].run_no, 1);
        assert_eq!(subordinates[0].subscription_id, "urn:sub:parent:1");
        assert_eq!(subordinates[0].registration_id, "urn:reg:1");

        let requests = http.requests.lock().expect("lock requests");
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].verb, "POST");
        assert_eq!(
            requests[0].url,
            "http://remote.example.org:1026/ngsi-ld/v1/subscriptions"
        );
        let body: Value =
            serde_json::from_slice(requests[0].body.as_ref().expect("body")).expect("json");
        assert_eq!(body["id"], "urn:sub:parent:1");
        assert_eq!(body["entities"][0]["type"], "Sensor");
        assert_eq!(
            body["notification"]["endpoint"]["uri"],
            "http://local.example.org:1026/ngsi-ld/ex/v1/notifications/urn:sub:parent"
        );
    }

    #[tokio::test]
    async fn tenant_scoped_parent_federates_under_its_tenant() {
        let (manager, http) = manager_for_tenant(201, "t1");
        let sub = subscription_for_tenant(
            "t1",
            vec![EntitySelector {
                entity_type: "Sensor".to_string(),
                ..Default::default()
            }],
        );

        manager.federate(&sub).await;
        assert_eq!(sub.subordinate_list().await.len(), 1);

        let requests = http.requests.lock().expect("lock requests");
        assert!(requests[0]
            .headers
            .iter()
            .any(|(k, v)| k == "NGSILD-Tenant" && v == "t1"));

        // The default tenant sends no tenant header.
        drop(requests);
        let (manager, http) = manager_for_tenant(201, "");
        let sub = subscription(vec![EntitySelector {
            entity_type: "Sensor".to_string(),
            ..Default::default()
        }]);
        manager.federate(&sub).await;
        let requests = http.requests.lock().expect("lock requests");
        assert!(!requests[0].headers.iter().any(|(k, _)| k == "NGSILD-Tenant"));
    }

    #[tokio::test]
    async fn run_numbers_grow_monotonically_per_parent() {
        let (manager, _http) = manager(201);
        let sub = subscription(vec![EntitySelector {
            entity_type: "Sensor".to_string(),
            ..Default::default()
        }]);

        manager.federate(&sub).await;
        manager.federate(&sub).await;

        let subordinates = sub.subordinate_list().await;
        assert_eq!(subordinates.len(), 2);
        assert_eq!(subordinates[0].run_no, 1);
        assert_eq!(subordinates[1].run_no, 2);
        assert_eq!(subordinates[1].subscription_id, "urn:sub:parent:2");
    }

    #[tokio::test]
    async fn literal_id_and_uncovered_type_filters_do_not_propagate() {
        let (manager, http) = manager(201);
        let sub = subscription(vec![
            EntitySelector {
                id: Some("urn:ngsi-ld:Sensor:1".to_string()),
                entity_type: "Sensor".to_string(),
                ..Default::default()
            },
            EntitySelector {
                entity_type: "Building".to_string(),
                ..Default::default()
            },
        ]);

        manager.federate(&sub).await;

        assert!(sub.subordinate_list().await.is_empty());
        assert!(http.requests.lock().expect("lock requests").is_empty());
    }

    #[tokio::test]
    async fn remote_rejection_leaves_no_subordinate_record() {
        let (manager, http) = manager(500);
        let sub = subscription(vec![EntitySelector {
            entity_type: "Sensor".to_string(),
            ..Default::default()
        }]);

        manager.federate(&sub).await;

        assert!(sub.subordinate_list().await.is_empty());
        // The create was attempted.
        assert_eq!(http.requests.lock().expect("lock requests").len(), 1);
    }

    #[tokio::test]
    async fn teardown_deletes_each_subordinate_remotely() {
        let (manager, http) = manager(201);
        let sub = subscription(vec![EntitySelector {
            entity_type: "Sensor".to_string(),
            ..Default::default()
        }]);
        manager.federate(&sub).await;

        manager.teardown(&sub).await;

        assert!(sub.subordinate_list().await.is_empty());
        let requests = http.requests.lock().expect("lock requests");
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[1].verb, "DELETE");
        assert_eq!(
            requests[1].url,
            "http://remote.example.org:1026/ngsi-ld/v1/subscriptions/urn:sub:parent:1"
        );
    }
}
