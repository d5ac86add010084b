//! Notification rendering and delivery over HTTP and MQTT.

mod dispatcher;
mod payload;
mod transport;

pub use dispatcher::{DeliveryOutcome, NotificationDispatcher};
pub use transport::{
    DisabledMqttChannel, HttpRequester, MqttChannel, OutboundRequest, OutboundResponse,
    ReqwestRequester,
};
