/********************************************************************************
 * Copyright (c) 2026 Contributors to the ld-broker project
 *
 * This program and the accompanying materials are made available under the
 * terms of the Apache License Version 2.0 which is available at
 * https://www.apache.org/licenses/LICENSE-2.0
 *
 * SPDX-License-Identifier: Apache-2.0
 ********************************************************************************/

//! # ld-broker
//!
//! `ld-broker` implements the subscription core of an NGSI-LD context broker:
//! the in-memory subscription registry, the alteration-matching pass, the
//! notification dispatcher and cross-broker subscription federation.
//!
//! Typical usage is API-first and remains centered on [`ContextBroker`]. The
//! host wires in its storage, query evaluator and transports through
//! [`Collaborators`]; entity mutations are reported as
//! [`matching::Alteration`] batches and flow through
//! [`ContextBroker::process_alterations`].
//!
//! Internal modules are organized by domain layer to keep behavior ownership
//! explicit:
//!
//! - [`registry`] holds the tenant-partitioned cache of active subscriptions.
//! - [`matching`] evaluates alteration batches against the cache and groups
//!   the admitted matches per subscription.
//! - [`dispatch`] renders notification payloads and delivers them over HTTP
//!   or MQTT.
//! - [`federation`] propagates subscriptions to remote brokers whose
//!   registrations cover a subscribed entity type, and relays their
//!   notifications back to the original subscriber.
//! - [`context`] compacts and expands entity and attribute names through the
//!   two-level vocabulary lookup.
//!
//! Logging is via the `tracing` crate; the host chooses the subscriber.

mod broker;
mod config;
pub mod context;
pub mod dispatch;
mod error;
pub mod external;
pub mod federation;
pub mod matching;
pub mod registry;

pub use broker::{Collaborators, ContextBroker};
pub use config::{BrokerConfig, DEFAULT_TENANT};
pub use error::{ProblemDetails, ProblemKind, TransportError};
