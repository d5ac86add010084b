//! Outbound transport seams: the HTTP requester and the MQTT channel.

use crate::error::TransportError;
use crate::registry::MqttEndpoint;
use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;

/// One outbound HTTP call: a notification delivery or a federation request.
#[derive(Debug, Clone)]
pub struct OutboundRequest {
    pub verb: String,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<Vec<u8>>,
    pub timeout_ms: u64,
}

#[derive(Debug, Clone)]
pub struct OutboundResponse {
    pub status: u16,
    /// Parsed response body, when one was present and parseable. Logged, not
    /// otherwise acted upon.
    pub body: Option<Value>,
}

impl OutboundResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Seam for issuing outbound HTTP requests. Production uses
/// [`ReqwestRequester`]; tests substitute recording fakes.
#[async_trait]
pub trait HttpRequester: Send + Sync {
    async fn request(&self, request: OutboundRequest) -> Result<OutboundResponse, TransportError>;
}

pub struct ReqwestRequester {
    client: reqwest::Client,
}

impl ReqwestRequester {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for ReqwestRequester {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HttpRequester for ReqwestRequester {
    async fn request(&self, request: OutboundRequest) -> Result<OutboundResponse, TransportError> {
        let method = reqwest::Method::from_bytes(request.verb.as_bytes())
            .map_err(|err| TransportError::Connect(err.to_string()))?;

        let mut builder = self
            .client
            .request(method, &request.url)
            .timeout(Duration::from_millis(request.timeout_ms));
        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let response = builder.send().await.map_err(|err| {
            if err.is_timeout() {
                TransportError::Timeout(request.timeout_ms)
            } else {
                TransportError::Connect(err.to_string())
            }
        })?;

        let status = response.status().as_u16();
        let body = response.json::<Value>().await.ok();
        Ok(OutboundResponse { status, body })
    }
}

/// Seam over the external MQTT connection pool. The pool owns connection
/// lifecycle; this core only connects ahead of accepting a subscription,
/// publishes, and disconnects on rollback or delete.
#[async_trait]
pub trait MqttChannel: Send + Sync {
    async fn connect(&self, endpoint: &MqttEndpoint) -> Result<(), TransportError>;
    async fn publish(&self, endpoint: &MqttEndpoint, payload: &[u8]) -> Result<(), TransportError>;
    async fn disconnect(&self, endpoint: &MqttEndpoint);
}

/// Channel for brokers deployed without MQTT support: connection attempts
/// fail, so MQTT subscriptions are rejected at creation.
pub struct DisabledMqttChannel;

#[async_trait]
impl MqttChannel for DisabledMqttChannel {
    async fn connect(&self, _endpoint: &MqttEndpoint) -> Result<(), TransportError> {
        Err(TransportError::Connect("mqtt support disabled".to_string()))
    }

    async fn publish(&self, _endpoint: &MqttEndpoint, _payload: &[u8]) -> Result<(), TransportError> {
        Err(TransportError::Publish("mqtt support disabled".to_string()))
    }

    async fn disconnect(&self, _endpoint: &MqttEndpoint) {}
}
