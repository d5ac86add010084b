/********************************************************************************
 * Copyright (c) 2026 Contributors to the ld-broker project
 *
 * This program and the accompanying materials are made available under the
 * terms of the Apache License Version 2.0 which is available at
 * https://www.apache.org/licenses/LICENSE-2.0
 *
 * SPDX-License-Identifier: Apache-2.0
 ********************************************************************************/

//! The broker service object: owns the subscription registry, the
//! notification dispatcher and the federation manager, and exposes the
//! subscription lifecycle and alteration processing to the host.

use crate::config::BrokerConfig;
use crate::context::{NameResolver, VocabularyContext};
use crate::dispatch::{DeliveryOutcome, MqttChannel, NotificationDispatcher};
use crate::error::ProblemDetails;
use crate::external::SubscriptionStore;
use crate::federation::{FederationManager, RegistrationCache};
use crate::matching::{match_alterations, Alteration, MatchList};
use crate::registry::{
    CachedSubscription, SubscriptionDraft, SubscriptionPatch, SubscriptionRegistry,
};
use chrono::Utc;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

const BROKER_TAG: &str = "ContextBroker:";
const BROKER_FN_NEW_TAG: &str = "new:";
const BROKER_FN_CREATE_TAG: &str = "create_subscription:";
const BROKER_FN_DELETE_TAG: &str = "delete_subscription:";
const BROKER_FN_PATCH_TAG: &str = "patch_subscription:";
const BROKER_FN_DISPATCH_TAG: &str = "dispatch:";
const BROKER_FN_RELAY_TAG: &str = "receive_relay_notification:";

/// External collaborators the core consumes but does not implement: storage,
/// the query evaluator and the outbound transports.
pub struct Collaborators {
    pub entity_store: Arc<dyn crate::external::EntityStore>,
    pub subscription_store: Arc<dyn SubscriptionStore>,
    pub query_predicate: Arc<dyn crate::external::QueryPredicate>,
    pub http: Arc<dyn crate::dispatch::HttpRequester>,
    pub mqtt: Arc<dyn MqttChannel>,
}

/// One broker instance. Everything hangs off this owned object; there is no
/// global state, so a process can host several independent instances.
pub struct ContextBroker {
    config: BrokerConfig,
    resolver: Arc<NameResolver>,
    registry: Arc<SubscriptionRegistry>,
    dispatcher: Arc<NotificationDispatcher>,
    federation: FederationManager,
    store: Arc<dyn SubscriptionStore>,
    mqtt: Arc<dyn MqttChannel>,
}

impl ContextBroker {
    pub fn new(
        config: BrokerConfig,
        default_context: Arc<VocabularyContext>,
        collaborators: Collaborators,
    ) -> Self {
        info!(
            "{BROKER_TAG}:{BROKER_FN_NEW_TAG} starting '{}' at '{}' (multitenancy: {}, distributed: {})",
            config.broker_id,
            config.local_address,
            config.multitenancy,
            config.distributed_subscriptions
        );

        let resolver = Arc::new(NameResolver::new(default_context));
        let dispatcher = Arc::new(NotificationDispatcher::new(
            collaborators.entity_store,
            collaborators.query_predicate,
            collaborators.http,
            collaborators.mqtt.clone(),
            resolver.clone(),
            config.notification_timeout_ms,
        ));
        let federation = FederationManager::new(
            Arc::new(RegistrationCache::new()),
            dispatcher.clone(),
            config.local_address.clone(),
        );

        Self {
            config,
            resolver,
            registry: Arc::new(SubscriptionRegistry::new()),
            dispatcher,
            federation,
            store: collaborators.subscription_store,
            mqtt: collaborators.mqtt,
        }
    }

    pub fn config(&self) -> &BrokerConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<SubscriptionRegistry> {
        &self.registry
    }

    /// The registration cache consumed by the federation pass. The host
    /// refreshes it whenever context source registrations change.
    pub fn registrations(&self) -> &Arc<RegistrationCache> {
        self.federation.registrations()
    }

    /// Creates a subscription: validates the draft, connects its MQTT channel
    /// if it has one, caches it, propagates it to covering remote brokers and
    /// persists it. Persistence failure rolls the cache entry back.
    pub async fn create_subscription(
        &self,
        tenant: &str,
        draft: &SubscriptionDraft,
        request_context: Option<Arc<VocabularyContext>>,
    ) -> Result<Arc<CachedSubscription>, ProblemDetails> {
        let id = match &draft.id {
            Some(id) => id.clone(),
            None => format!("urn:ngsi-ld:subscription:{}", Uuid::new_v4()),
        };
        let cached = CachedSubscription::from_draft(
            tenant,
            id,
            draft,
            &self.resolver,
            request_context,
            Utc::now(),
        )?;

        // The MQTT connection is established before the subscription becomes
        // visible; an unreachable broker rejects the whole creation.
        let mqtt_endpoint = cached.config().endpoint.as_mqtt().cloned();
        if let Some(endpoint) = &mqtt_endpoint {
            self.mqtt.connect(endpoint).await.map_err(|err| {
                ProblemDetails::internal("Unable to connect to MQTT server", &err.to_string())
            })?;
        }

        let subscription = self.registry.insert(cached).await?;
        debug!(
            "{BROKER_TAG}:{BROKER_FN_CREATE_TAG} cached subscription '{}'",
            subscription.id
        );

        if self.config.distributed_subscriptions {
            self.federation.federate(&subscription).await;
        }

        let representation = subscription.api_representation().await;
        if let Err(err) = self.store.insert(tenant, &representation).await {
            warn!(
                "{BROKER_TAG}:{BROKER_FN_CREATE_TAG} persistence of '{}' failed, rolling back: {err}",
                subscription.id
            );
            self.registry.remove(tenant, &subscription.id).await;
            if let Some(endpoint) = &mqtt_endpoint {
                self.mqtt.disconnect(endpoint).await;
            }
            return Err(err);
        }

        Ok(subscription)
    }

    /// Deletes a subscription, tearing down its remote subordinates and its
    /// MQTT connection before removing the persisted record.
    pub async fn delete_subscription(
        &self,
        tenant: &str,
        subscription_id: &str,
    ) -> Result<(), ProblemDetails> {
        let subscription = self
            .registry
            .remove(tenant, subscription_id)
            .await
            .ok_or_else(|| {
                ProblemDetails::not_found("Subscription not found", subscription_id)
            })?;

        self.federation.teardown(&subscription).await;
        if let Some(endpoint) = subscription.config().endpoint.as_mqtt() {
            self.mqtt.disconnect(endpoint).await;
        }

        debug!(
            "{BROKER_TAG}:{BROKER_FN_DELETE_TAG} deleted subscription '{}'",
            subscription.id
        );
        self.store.delete(tenant, subscription_id).await
    }

    /// Applies a partial update to a cached subscription and persists the
    /// resulting representation.
    pub async fn patch_subscription(
        &self,
        tenant: &str,
        subscription_id: &str,
        patch: &SubscriptionPatch,
    ) -> Result<Arc<CachedSubscription>, ProblemDetails> {
        let subscription = self
            .registry
            .lookup(tenant, subscription_id)
            .await
            .ok_or_else(|| {
                ProblemDetails::not_found("Subscription not found", subscription_id)
            })?;

        subscription.apply_patch(patch, &self.resolver, Utc::now())?;
        debug!(
            "{BROKER_TAG}:{BROKER_FN_PATCH_TAG} patched subscription '{}'",
            subscription.id
        );

        let representation = subscription.api_representation().await;
        self.store
            .update(tenant, subscription_id, &representation)
            .await?;
        Ok(subscription)
    }

    /// Evaluates an alteration batch against the active subscriptions. With
    /// multitenancy off, every subscription is considered regardless of the
    /// tenant it was created under.
    pub async fn compute_matches(&self, tenant: &str, alterations: &[Alteration]) -> MatchList {
        let subscriptions = if self.config.multitenancy {
            self.registry.snapshot(tenant).await
        } else {
            self.registry.snapshot_all().await
        };
        match_alterations(
            &subscriptions,
            alterations,
            tenant,
            self.config.multitenancy,
            Utc::now(),
        )
    }

    /// Delivers one notification per match group. Returns the number of
    /// successful deliveries; failures are recorded on the subscriptions.
    pub async fn dispatch(&self, match_list: MatchList) -> usize {
        let now = Utc::now();
        let groups = match_list.into_groups();
        debug!(
            "{BROKER_TAG}:{BROKER_FN_DISPATCH_TAG} dispatching {} notification(s)",
            groups.len()
        );

        let deliveries = groups
            .iter()
            .map(|group| self.dispatcher.notify(group, now));
        futures::future::join_all(deliveries)
            .await
            .iter()
            .filter(|outcome| outcome.is_delivered())
            .count()
    }

    /// Convenience wrapper: match an alteration batch and dispatch the result.
    pub async fn process_alterations(&self, tenant: &str, alterations: &[Alteration]) -> usize {
        let match_list = self.compute_matches(tenant, alterations).await;
        if match_list.is_empty() {
            return 0;
        }
        self.dispatch(match_list).await
    }

    /// Inbound relay: a notification from a subordinate subscription on a
    /// remote broker, forwarded to the parent's own endpoint with the parent's
    /// subscription id substituted in.
    pub async fn receive_relay_notification(
        &self,
        tenant: &str,
        parent_id: &str,
        mut payload: Value,
    ) -> Result<DeliveryOutcome, ProblemDetails> {
        if !self.config.distributed_subscriptions {
            return Err(ProblemDetails::not_supported(
                "Distributed subscriptions are not enabled",
                parent_id,
            ));
        }

        let subscription = self
            .registry
            .lookup(tenant, parent_id)
            .await
            .ok_or_else(|| {
                warn!(
                    "{BROKER_TAG}:{BROKER_FN_RELAY_TAG} relay for unknown subscription '{parent_id}'"
                );
                ProblemDetails::not_found("Subscription not found", parent_id)
            })?;

        // The subordinate's id must not leak to the subscriber.
        payload["subscriptionId"] = json!(parent_id);
        Ok(self
            .dispatcher
            .forward(&subscription, &payload, Utc::now())
            .await)
    }
}

#[cfg(test)]
mod tests {
    use super::{Collaborators, ContextBroker};
    use crate::config::BrokerConfig;
    use crate::context::VocabularyContext;
    use crate::dispatch::{
        DisabledMqttChannel, HttpRequester, OutboundRequest, OutboundResponse,
    };
    use crate::error::{ProblemDetails, ProblemKind, TransportError};
    use crate::external::{AcceptAllPredicate, EntityStore, SubscriptionStore};
    use crate::registry::{EndpointDraft, EntitySelector, NotificationDraft, SubscriptionDraft};
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::sync::{Arc, Mutex as StdMutex};

    struct OkRequester;

    #[async_trait]
    impl HttpRequester for OkRequester {
        async fn request(
            &self,
            _request: OutboundRequest,
        ) -> Result<OutboundResponse, TransportError> {
            Ok(OutboundResponse {
                status: 200,
                body: None,
            })
        }
    }

    struct StaticEntityStore;

    #[async_trait]
    impl EntityStore for StaticEntityStore {
        async fn fetch_current_state(
            &self,
            entity_id: &str,
            _attributes: &[String],
        ) -> Result<Value, ProblemDetails> {
            Ok(json!({ "id": entity_id, "type": "Sensor" }))
        }
    }

    enum StoreMode {
        Accept,
        RejectInserts,
    }

    struct FakeSubscriptionStore {
        mode: StoreMode,
        inserted: StdMutex<Vec<String>>,
    }

    impl FakeSubscriptionStore {
        fn accepting() -> Self {
            Self {
                mode: StoreMode::Accept,
                inserted: StdMutex::new(Vec::new()),
            }
        }

        fn rejecting() -> Self {
            Self {
                mode: StoreMode::RejectInserts,
                inserted: StdMutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl SubscriptionStore for FakeSubscriptionStore {
        async fn insert(&self, _tenant: &str, representation: &Value) -> Result<(), ProblemDetails> {
            if matches!(self.mode, StoreMode::RejectInserts) {
                return Err(ProblemDetails::internal("Database Error", "insert failed"));
            }
            let id = representation["id"].as_str().unwrap_or_default().to_string();
            self.inserted.lock().expect("lock inserted").push(id);
            Ok(())
        }

        async fn update(
            &self,
            _tenant: &str,
            _subscription_id: &str,
            _representation: &Value,
        ) -> Result<(), ProblemDetails> {
            Ok(())
        }

        async fn delete(
            &self,
            _tenant: &str,
            _subscription_id: &str,
        ) -> Result<(), ProblemDetails> {
            Ok(())
        }
    }

    fn broker(config: BrokerConfig, store: Arc<FakeSubscriptionStore>) -> ContextBroker {
        let default_context = Arc::new(VocabularyContext::new(
            "https://uri.etsi.org/ngsi-ld/default-context/",
            &[],
        ));
        ContextBroker::new(
            config,
            default_context,
            Collaborators {
                entity_store: Arc::new(StaticEntityStore),
                subscription_store: store,
                query_predicate: Arc::new(AcceptAllPredicate),
                http: Arc::new(OkRequester),
                mqtt: Arc::new(DisabledMqttChannel),
            },
        )
    }

    fn draft(uri: &str) -> SubscriptionDraft {
        SubscriptionDraft {
            entities: vec![EntitySelector {
                entity_type: "Sensor".to_string(),
                ..Default::default()
            }],
            notification: NotificationDraft {
                endpoint: EndpointDraft {
                    uri: uri.to_string(),
                    ..Default::default()
                },
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn created_subscription_gets_a_urn_id_and_is_persisted() {
        let store = Arc::new(FakeSubscriptionStore::accepting());
        let broker = broker(BrokerConfig::default(), store.clone());

        let subscription = broker
            .create_subscription("", &draft("http://sink.example.org/notify"), None)
            .await
            .expect("creation succeeds");

        assert!(subscription.id.starts_with("urn:ngsi-ld:subscription:"));
        assert_eq!(
            store.inserted.lock().expect("lock inserted").as_slice(),
            &[subscription.id.clone()]
        );
        assert!(broker.registry().lookup("", &subscription.id).await.is_some());
    }

    #[tokio::test]
    async fn duplicate_client_supplied_id_is_rejected() {
        let store = Arc::new(FakeSubscriptionStore::accepting());
        let broker = broker(BrokerConfig::default(), store);

        let mut d = draft("http://sink.example.org/notify");
        d.id = Some("urn:sub:fixed".to_string());
        broker
            .create_subscription("", &d, None)
            .await
            .expect("first creation");

        let err = broker
            .create_subscription("", &d, None)
            .await
            .expect_err("duplicate rejected");
        assert_eq!(err.kind, ProblemKind::AlreadyExists);
    }

    #[tokio::test]
    async fn failed_persistence_rolls_the_cache_entry_back() {
        let store = Arc::new(FakeSubscriptionStore::rejecting());
        let broker = broker(BrokerConfig::default(), store);

        let mut d = draft("http://sink.example.org/notify");
        d.id = Some("urn:sub:doomed".to_string());
        let err = broker
            .create_subscription("", &d, None)
            .await
            .expect_err("persistence failure surfaces");
        assert_eq!(err.kind, ProblemKind::InternalError);
        assert!(broker.registry().lookup("", "urn:sub:doomed").await.is_none());
    }

    #[tokio::test]
    async fn mqtt_subscription_fails_when_the_channel_cannot_connect() {
        // DisabledMqttChannel refuses every connect.
        let store = Arc::new(FakeSubscriptionStore::accepting());
        let broker = broker(BrokerConfig::default(), store);

        let err = broker
            .create_subscription("", &draft("mqtt://broker.example.org/alerts"), None)
            .await
            .expect_err("mqtt connect failure surfaces");
        assert_eq!(err.status, 500);
    }

    #[tokio::test]
    async fn deleting_an_unknown_subscription_is_not_found() {
        let store = Arc::new(FakeSubscriptionStore::accepting());
        let broker = broker(BrokerConfig::default(), store);

        let err = broker
            .delete_subscription("", "urn:sub:nope")
            .await
            .expect_err("unknown id");
        assert_eq!(err.kind, ProblemKind::ResourceNotFound);
    }

    #[tokio::test]
    async fn relay_is_refused_when_distributed_subscriptions_are_disabled() {
        let store = Arc::new(FakeSubscriptionStore::accepting());
        let broker = broker(BrokerConfig::default(), store);

        let err = broker
            .receive_relay_notification("", "urn:sub:parent", json!({ "data": [] }))
            .await
            .expect_err("relay refused");
        assert_eq!(err.kind, ProblemKind::OperationNotSupported);
        assert_eq!(err.status, 501);
    }

    #[tokio::test]
    async fn relay_for_an_unknown_parent_is_not_found() {
        let store = Arc::new(FakeSubscriptionStore::accepting());
        let config = BrokerConfig {
            distributed_subscriptions: true,
            ..Default::default()
        };
        let broker = broker(config, store);

        let err = broker
            .receive_relay_notification("", "urn:sub:parent", json!({ "data": [] }))
            .await
            .expect_err("unknown parent");
        assert_eq!(err.kind, ProblemKind::ResourceNotFound);
    }
}
