//! Renders a notification per matched subscription and delivers it, tracking
//! per-subscription delivery counters.

use crate::config::DEFAULT_TENANT;
use crate::context::NameResolver;
use crate::dispatch::payload::{render_entity, render_notification, RenderOptions};
use crate::dispatch::transport::{
    HttpRequester, MqttChannel, OutboundRequest, OutboundResponse,
};
use crate::error::TransportError;
use crate::external::{EntityStore, QueryPredicate};
use crate::matching::MatchGroup;
use crate::registry::{CachedSubscription, HttpEndpoint, NotificationEndpoint};
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, warn};

const DISPATCHER_TAG: &str = "NotificationDispatcher:";
const DISPATCHER_FN_NOTIFY_TAG: &str = "notify:";
const DISPATCHER_FN_DELIVER_TAG: &str = "deliver:";
const DISPATCHER_FN_OUTBOUND_TAG: &str = "outbound_request:";

const TENANT_HEADER: &str = "NGSILD-Tenant";

/// Result of one delivery attempt. At most one attempt per match pass per
/// subscription; failures are recorded, never retried here.
#[derive(Debug)]
pub enum DeliveryOutcome {
    Delivered,
    /// Every matched entity was rejected by the subscription's query filter.
    FilteredOut,
    Failed(TransportError),
}

impl DeliveryOutcome {
    pub fn is_delivered(&self) -> bool {
        matches!(self, DeliveryOutcome::Delivered)
    }
}

pub struct NotificationDispatcher {
    entity_store: Arc<dyn EntityStore>,
    query_predicate: Arc<dyn QueryPredicate>,
    http: Arc<dyn HttpRequester>,
    mqtt: Arc<dyn MqttChannel>,
    resolver: Arc<NameResolver>,
    timeout_ms: u64,
}

impl NotificationDispatcher {
    pub fn new(
        entity_store: Arc<dyn EntityStore>,
        query_predicate: Arc<dyn QueryPredicate>,
        http: Arc<dyn HttpRequester>,
        mqtt: Arc<dyn MqttChannel>,
        resolver: Arc<NameResolver>,
        timeout_ms: u64,
    ) -> Self {
        Self {
            entity_store,
            query_predicate,
            http,
            mqtt,
            resolver,
            timeout_ms,
        }
    }

    pub(crate) fn timeout_ms(&self) -> u64 {
        self.timeout_ms
    }

    /// Renders and delivers one notification carrying all of a subscription's
    /// matches from the pass.
    pub async fn notify(&self, group: &MatchGroup, now: DateTime<Utc>) -> DeliveryOutcome {
        let subscription = &group.subscription;
        // Clone of the mutable state so no lock is held across await points.
        let config = subscription.config();

        // Distinct entities in match order; per entity the set of matched
        // attribute names, or None for a whole-entity match (keep everything).
        let mut entity_order: Vec<(String, String)> = Vec::new();
        let mut matched_attributes: HashMap<String, Option<HashSet<String>>> = HashMap::new();
        for m in &group.matches {
            if !matched_attributes.contains_key(&m.entity_id) {
                entity_order.push((m.entity_id.clone(), m.entity_type.clone()));
            }
            let entry = matched_attributes
                .entry(m.entity_id.clone())
                .or_insert_with(|| Some(HashSet::new()));
            match &m.attribute {
                None => *entry = None,
                Some(attribute) => {
                    if let Some(set) = entry {
                        set.insert(attribute.attribute.clone());
                    }
                }
            }
        }

        let options = RenderOptions {
            format: config.render_format,
            sys_attrs: config.sys_attrs,
            resolver: &self.resolver,
            context: subscription.render_context(),
        };

        let mut data = Vec::with_capacity(entity_order.len());
        for (entity_id, entity_type) in &entity_order {
            let filter = matched_attributes
                .get(entity_id)
                .cloned()
                .unwrap_or(None);
            let attribute_names: Vec<String> = filter
                .as_ref()
                .map(|set| set.iter().cloned().collect())
                .unwrap_or_default();

            let snapshot = match self
                .entity_store
                .fetch_current_state(entity_id, &attribute_names)
                .await
            {
                Ok(snapshot) => snapshot,
                Err(err) => {
                    warn!(
                        "{DISPATCHER_TAG}:{DISPATCHER_FN_NOTIFY_TAG} no current state for '{entity_id}': {err}"
                    );
                    serde_json::json!({ "id": entity_id, "type": entity_type })
                }
            };

            if let Some(filter_expression) = &config.query_filter {
                if !self.query_predicate.matches(filter_expression, &snapshot) {
                    debug!(
                        "{DISPATCHER_TAG}:{DISPATCHER_FN_NOTIFY_TAG} entity '{entity_id}' rejected by query filter"
                    );
                    continue;
                }
            }

            data.push(render_entity(&snapshot, filter.as_ref(), &options));
        }

        if data.is_empty() && config.query_filter.is_some() {
            return DeliveryOutcome::FilteredOut;
        }

        let payload = render_notification(
            &subscription.id,
            data,
            config.show_changes.then(|| group.matches.as_slice()),
            &options,
            now,
        );

        self.send(subscription, &config.endpoint, &payload, now)
            .await
    }

    /// Delivers an already-rendered payload to a subscription's endpoint,
    /// with the same counter bookkeeping as a rendered notification. Used by
    /// the inbound federation relay.
    pub(crate) async fn forward(
        &self,
        subscription: &Arc<CachedSubscription>,
        payload: &Value,
        now: DateTime<Utc>,
    ) -> DeliveryOutcome {
        let endpoint = subscription.config().endpoint;
        self.send(subscription, &endpoint, payload, now).await
    }

    async fn send(
        &self,
        subscription: &Arc<CachedSubscription>,
        endpoint: &NotificationEndpoint,
        payload: &Value,
        now: DateTime<Utc>,
    ) -> DeliveryOutcome {
        let body = match serde_json::to_vec(payload) {
            Ok(body) => body,
            Err(err) => {
                subscription.record_failure(now);
                return DeliveryOutcome::Failed(TransportError::Connect(err.to_string()));
            }
        };

        match self.deliver(endpoint, &subscription.tenant, body).await {
            Ok(()) => {
                debug!(
                    "{DISPATCHER_TAG}:{DISPATCHER_FN_NOTIFY_TAG} notified '{}'",
                    subscription.id
                );
                subscription.record_success(now);
                DeliveryOutcome::Delivered
            }
            Err(err) => {
                // Delivery failure is non-fatal: counters only, no deactivation.
                warn!(
                    "{DISPATCHER_TAG}:{DISPATCHER_FN_NOTIFY_TAG} delivery for '{}' failed: {err}",
                    subscription.id
                );
                subscription.record_failure(now);
                DeliveryOutcome::Failed(err)
            }
        }
    }

    async fn deliver(
        &self,
        endpoint: &NotificationEndpoint,
        tenant: &str,
        body: Vec<u8>,
    ) -> Result<(), TransportError> {
        match endpoint {
            NotificationEndpoint::Http(http) => {
                let request = self.notification_request(http, tenant, body);
                let response = self.http.request(request).await?;
                if let Some(response_body) = &response.body {
                    debug!(
                        "{DISPATCHER_TAG}:{DISPATCHER_FN_DELIVER_TAG} response body: {response_body}"
                    );
                }
                if !response.is_success() {
                    return Err(TransportError::Status(response.status));
                }
                Ok(())
            }
            NotificationEndpoint::Mqtt(mqtt) => self.mqtt.publish(mqtt, &body).await,
        }
    }

    fn notification_request(
        &self,
        endpoint: &HttpEndpoint,
        tenant: &str,
        body: Vec<u8>,
    ) -> OutboundRequest {
        let mut headers = vec![
            ("Content-Type".to_string(), "application/json".to_string()),
            ("Content-Length".to_string(), body.len().to_string()),
        ];
        headers.extend(endpoint.headers.iter().cloned());
        if tenant != DEFAULT_TENANT {
            headers.push((TENANT_HEADER.to_string(), tenant.to_string()));
        }

        OutboundRequest {
            verb: endpoint.verb.clone(),
            url: endpoint.url.clone(),
            headers,
            body: Some(body),
            timeout_ms: self.timeout_ms,
        }
    }

    /// The dispatcher's request channel, reused by the federation manager for
    /// subordinate creation and teardown.
    pub(crate) async fn outbound_request(
        &self,
        request: OutboundRequest,
    ) -> Result<OutboundResponse, TransportError> {
        debug!(
            "{DISPATCHER_TAG}:{DISPATCHER_FN_OUTBOUND_TAG} {} {}",
            request.verb, request.url
        );
        self.http.request(request).await
    }
}
