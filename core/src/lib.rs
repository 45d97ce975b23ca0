//! Blocking client for a FIWARE IoT platform.
//!
//! # Overview
//! Talks to the IoT agent (service and device provisioning, Ultralight 2.0
//! observations, commands), the context broker (entities, subscriptions),
//! Perseo (rules), STH Comet (history) and Cygnus (persistence), all scoped
//! by the `Fiware-Service` / `Fiware-ServicePath` headers of the current
//! `Config`.
//!
//! # Design
//! - `TransportClient` turns a method, URL and `RequestOptions` into a plain
//!   `HttpRequest`, executes it once through an `HttpBackend`, and returns an
//!   `Outcome`. MQTT publishes go through a `Publisher` the same way.
//! - Remote failures are data: status codes pass through unchanged and a
//!   request that never completes has status code 0. `ApiError` is reserved
//!   for local problems (unreadable config, broken templates).
//! - `IotClient` and `ContextClient` are thin builders of payloads and URLs
//!   on top of a shared transport.
//! - `ServiceProvisioner` is the only component that retries.

pub mod auth;
pub mod client;
pub mod config;
pub mod context;
pub mod error;
pub mod http;
pub mod iot;
pub mod mqtt;
pub mod provision;
pub mod response;
pub mod template;
pub mod ultralight;

pub use auth::AuthToken;
pub use client::{HttpBackend, Payload, RequestOptions, TransportClient, UreqBackend, DEFAULT_TIMEOUT};
pub use config::{Config, Endpoint};
pub use context::{ContextClient, EntityQuery, RuleAction};
pub use error::{ApiError, TransportError};
pub use http::{HttpMethod, HttpRequest, HttpResponse};
pub use iot::{IotClient, ObservationTransport, DEFAULT_DEVICE_PROTOCOL};
pub use mqtt::{MqttPublisher, Publisher};
pub use provision::{ApiKey, Provisioned, RetryPolicy, ServiceProvisioner};
pub use response::{Outcome, PublishOutcome, Response};
pub use template::{Placeholder, Template};
pub use ultralight::MeasurementGroup;
