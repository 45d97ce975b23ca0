//! Request/response orchestration shared by every platform call.
//!
//! # Design
//! `TransportClient` owns the current `Config` and the two network seams
//! (`HttpBackend`, `Publisher`). A call is split the same way every time:
//! `prepare` assembles an `HttpRequest` as plain data (default headers
//! merged with the caller's, payload serialized), then `send_request`
//! dispatches it exactly once and folds whatever happens into an `Outcome`.
//! Nothing here retries; that is a policy of the callers.

use std::time::Duration;

use serde_json::Value;
use tracing::{debug, error, info};

use crate::config::{mask_token, Config, Endpoint, AUTH_TOKEN_HEADER, NULL_TOKEN};
use crate::error::TransportError;
use crate::http::{merge_headers, Headers, HttpMethod, HttpRequest, HttpResponse};
use crate::mqtt::{MqttPublisher, Publisher};
use crate::response::{Outcome, PublishOutcome, Response};

/// Timeout applied to a call that does not set its own.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Body of an outbound request.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Payload {
    #[default]
    Empty,
    /// Sent verbatim.
    Text(String),
    /// Serialized to JSON text before sending.
    Json(Value),
}

impl Payload {
    /// The wire body, or `None` when there is nothing to send.
    pub fn serialize(&self) -> Option<String> {
        match self {
            Payload::Empty => None,
            Payload::Text(text) if text.is_empty() => None,
            Payload::Text(text) => Some(text.clone()),
            Payload::Json(value) => Some(format!("{value:#}")),
        }
    }
}

impl From<Value> for Payload {
    fn from(value: Value) -> Self {
        Payload::Json(value)
    }
}

impl From<String> for Payload {
    fn from(text: String) -> Self {
        Payload::Text(text)
    }
}

impl From<&str> for Payload {
    fn from(text: &str) -> Self {
        Payload::Text(text.to_string())
    }
}

/// Per-call inputs besides method and URL.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RequestOptions {
    pub payload: Payload,
    pub params: Vec<(String, String)>,
    pub headers: Headers,
    pub timeout: Option<Duration>,
}

impl RequestOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn payload(mut self, payload: impl Into<Payload>) -> Self {
        self.payload = payload.into();
        self
    }

    pub fn param(mut self, name: impl Into<String>, value: impl ToString) -> Self {
        self.params.push((name.into(), value.to_string()));
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Executes one assembled HTTP request.
pub trait HttpBackend {
    /// Perform the round-trip. Any status code is a success here; only a
    /// request that did not complete is an error.
    fn execute(&self, request: &HttpRequest, timeout: Duration) -> Result<HttpResponse, TransportError>;
}

/// `HttpBackend` backed by a blocking `ureq` agent, one agent per request.
#[derive(Debug, Clone, Default)]
pub struct UreqBackend;

fn decorate<B>(mut builder: ureq::RequestBuilder<B>, request: &HttpRequest) -> ureq::RequestBuilder<B> {
    for (name, value) in &request.headers {
        builder = builder.header(name.as_str(), value.as_str());
    }
    for (name, value) in &request.query {
        builder = builder.query(name, value);
    }
    builder
}

impl HttpBackend for UreqBackend {
    fn execute(&self, request: &HttpRequest, timeout: Duration) -> Result<HttpResponse, TransportError> {
        // Status codes are data for the caller, not errors.
        let agent = ureq::Agent::config_builder()
            .http_status_as_error(false)
            .timeout_global(Some(timeout))
            .build()
            .new_agent();

        let url = request.url.as_str();
        let body = request.body.as_deref();
        let result = match (request.method, body) {
            (HttpMethod::Get, None) => decorate(agent.get(url), request).call(),
            (HttpMethod::Get, Some(body)) => decorate(agent.get(url), request).force_send_body().send(body),
            (HttpMethod::Delete, None) => decorate(agent.delete(url), request).call(),
            (HttpMethod::Delete, Some(body)) => {
                decorate(agent.delete(url), request).force_send_body().send(body)
            }
            (HttpMethod::Post, Some(body)) => decorate(agent.post(url), request).send(body),
            (HttpMethod::Post, None) => decorate(agent.post(url), request).send_empty(),
            (HttpMethod::Put, Some(body)) => decorate(agent.put(url), request).send(body),
            (HttpMethod::Put, None) => decorate(agent.put(url), request).send_empty(),
        };

        let mut response = result.map_err(|e| TransportError::new(e.to_string()))?;
        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .map(|(name, value)| {
                (
                    name.as_str().to_string(),
                    String::from_utf8_lossy(value.as_bytes()).into_owned(),
                )
            })
            .collect();
        // A status arrived, so a large body must not turn into status 0.
        let bytes = response
            .body_mut()
            .with_config()
            .limit(u64::MAX)
            .read_to_vec()
            .map_err(|e| TransportError::new(format!("cannot read response body: {e}")))?;

        Ok(HttpResponse {
            status,
            headers,
            body: String::from_utf8_lossy(&bytes).into_owned(),
        })
    }
}

/// Builds and executes single HTTP requests and MQTT publishes against the
/// platform described by a `Config`.
#[derive(Debug, Clone)]
pub struct TransportClient<B = UreqBackend, P = MqttPublisher> {
    config: Config,
    backend: B,
    publisher: P,
    timeout: Duration,
}

impl TransportClient {
    pub fn new(config: Config) -> Self {
        Self::with_backends(config, UreqBackend, MqttPublisher)
    }
}

impl<B: HttpBackend, P: Publisher> TransportClient<B, P> {
    pub fn with_backends(config: Config, backend: B, publisher: P) -> Self {
        Self {
            config,
            backend,
            publisher,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Replace the timeout used by calls that do not set one.
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn publisher(&self) -> &P {
        &self.publisher
    }

    pub fn default_timeout(&self) -> Duration {
        self.timeout
    }

    /// Scope every following call to another service and service path.
    pub fn set_service(&mut self, service: &str, service_path: &str) {
        info!(service, service_path, "switching service context");
        self.config = self.config.with_service(service, service_path);
    }

    pub(crate) fn replace_config(&mut self, config: Config) {
        self.config = config;
    }

    /// Assemble the request `send_request` would dispatch, without sending
    /// it.
    pub fn prepare(&self, method: HttpMethod, url: &str, options: &RequestOptions) -> HttpRequest {
        HttpRequest {
            method,
            url: url.to_string(),
            query: options.params.clone(),
            headers: merge_headers(&self.config.default_headers(), &options.headers),
            body: options.payload.serialize(),
        }
    }

    /// Send one request and normalize the result.
    ///
    /// Never fails: a request that cannot complete yields
    /// `Outcome::TransportFailure` with status code 0.
    pub fn send_request(&self, method: HttpMethod, url: &str, options: RequestOptions) -> Outcome {
        let request = self.prepare(method, url, &options);
        self.dispatch(&request, options.timeout.unwrap_or(self.timeout))
    }

    /// Like `send_request`, with the method given by name.
    ///
    /// Names other than GET/POST/PUT/DELETE produce `Outcome::Unsupported`
    /// and nothing is sent.
    pub fn send_raw(&self, method: &str, url: &str, options: RequestOptions) -> Outcome {
        match method.parse::<HttpMethod>() {
            Ok(method) => self.send_request(method, url, options),
            Err(e) => {
                error!(method, url, "unsupported method");
                Outcome::Unsupported(e.to_string())
            }
        }
    }

    pub(crate) fn dispatch(&self, request: &HttpRequest, timeout: Duration) -> Outcome {
        self.log_request(request);

        match self.backend.execute(request, timeout) {
            Ok(raw) => {
                let response = Response::from(raw);
                debug!(
                    status = response.status,
                    headers = ?response.headers,
                    body = %response.body,
                    "received response"
                );
                Outcome::Completed(response)
            }
            Err(e) => {
                error!(method = %request.method, url = %request.url, error = %e, "request did not complete");
                Outcome::TransportFailure(e.to_string())
            }
        }
    }

    fn log_request(&self, request: &HttpRequest) {
        let headers: Headers = request
            .headers
            .iter()
            .map(|(name, value)| {
                if name.eq_ignore_ascii_case(AUTH_TOKEN_HEADER) && value != NULL_TOKEN {
                    (name.clone(), mask_token(value))
                } else {
                    (name.clone(), value.clone())
                }
            })
            .collect();
        debug!(
            method = %request.method,
            url = %request.url,
            query = %request.query_string(),
            headers = ?headers,
            "sending request"
        );
        if let Some(body) = &request.body {
            debug!(payload = %body, "request payload");
        }
    }

    /// Publish one message to the configured MQTT broker.
    pub fn publish(&self, topic: &str, payload: &str, timeout: Duration) -> PublishOutcome {
        let broker = self.config.mqtt_broker().clone();
        self.publish_to(topic, payload, &broker, timeout)
    }

    /// Publish one message to `broker`.
    pub fn publish_to(&self, topic: &str, payload: &str, broker: &Endpoint, timeout: Duration) -> PublishOutcome {
        info!(host = %broker.host, port = broker.port, topic, "publishing");
        debug!(payload, "publish payload");

        match self.publisher.publish(topic, payload, broker, timeout) {
            Ok(()) => PublishOutcome::Ok,
            Err(e) => {
                error!(topic, error = %e, "publish failed");
                PublishOutcome::Failed(e.to_string())
            }
        }
    }
}
