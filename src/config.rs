//! Broker-level configuration handed to the service object at startup.

use serde::Deserialize;

/// Tenant name of the default tenant. Requests without a tenant header land here.
pub const DEFAULT_TENANT: &str = "";

#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct BrokerConfig {
    /// Name used in log tags.
    pub broker_id: String,
    /// `host:port` under which remote brokers can reach this instance.
    /// Subordinate subscriptions point their notification endpoint here.
    pub local_address: String,
    pub multitenancy: bool,
    /// Enables subordinate-subscription creation and the inbound relay path.
    pub distributed_subscriptions: bool,
    /// Per-delivery timeout in milliseconds. Also bounds federation requests.
    pub notification_timeout_ms: u64,
    /// Base URI of the default vocabulary. Long names under it compact by
    /// prefix stripping, without a table lookup.
    pub core_vocabulary_url: String,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            broker_id: "ld-broker".to_string(),
            local_address: "127.0.0.1:1026".to_string(),
            multitenancy: false,
            distributed_subscriptions: false,
            notification_timeout_ms: 5000,
            core_vocabulary_url: "https://uri.etsi.org/ngsi-ld/default-context/".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::BrokerConfig;

    #[test]
    fn config_deserializes_with_defaults_for_missing_fields() {
        let config: BrokerConfig =
            serde_json::from_str(r#"{"localAddress": "10.0.0.1:1026", "multitenancy": true}"#)
                .expect("valid config");
        assert_eq!(config.local_address, "10.0.0.1:1026");
        assert!(config.multitenancy);
        assert!(!config.distributed_subscriptions);
        assert_eq!(config.notification_timeout_ms, 5000);
    }
}
