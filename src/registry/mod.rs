//! Tenant-partitioned in-memory registry of active subscriptions.

mod store;
mod subscription;

pub use store::SubscriptionRegistry;
pub use subscription::{
    CachedSubscription, EndpointDraft, EntityIdMatcher, EntityInfo, EntitySelector, HttpEndpoint,
    KeyValue, MqttEndpoint, NotificationDraft, NotificationEndpoint, RenderFormat,
    SubordinateSubscription, SubscriptionDraft, SubscriptionPatch, SubscriptionState,
    SubscriptionStatus, TriggerMask,
};
