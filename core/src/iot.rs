//! IoT agent operations: services, devices, observations and commands.

use std::path::Path;
use std::time::Duration;

use serde_json::json;
use tracing::{debug, warn};

use crate::client::{HttpBackend, RequestOptions, TransportClient, UreqBackend};
use crate::config::{Config, SERVICE_HEADER, SERVICE_PATH_HEADER};
use crate::error::ApiError;
use crate::http::HttpMethod;
use crate::mqtt::{attrs_topic, MqttPublisher, Publisher};
use crate::provision::{ApiKey, Provisioned, RetryPolicy, ServiceProvisioner, UL_RESOURCE};
use crate::response::{Outcome, PublishOutcome};
use crate::template::{Placeholder, Template};
use crate::ultralight::{self, MeasurementGroup};

/// Protocol devices are registered with unless told otherwise.
pub const DEFAULT_DEVICE_PROTOCOL: &str = "IoTA-UL";

/// How an observation reaches the IoT agent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ObservationTransport {
    /// Publish to `/{api_key}/{device_id}/attrs` on the MQTT broker.
    #[default]
    Mqtt,
    /// POST to the agent's Ultralight HTTP endpoint.
    Http,
}

/// Client for the IoT agent and the MQTT broker in front of it.
#[derive(Debug, Clone)]
pub struct IotClient<B = UreqBackend, P = MqttPublisher> {
    transport: TransportClient<B, P>,
    api_key: ApiKey,
    retry_policy: RetryPolicy,
}

impl IotClient {
    pub fn new(config: Config) -> Self {
        Self::with_transport(TransportClient::new(config))
    }

    pub fn from_config_file(path: impl AsRef<Path>) -> Result<Self, ApiError> {
        Ok(Self::new(Config::from_file(path)?))
    }
}

impl<B: HttpBackend, P: Publisher> IotClient<B, P> {
    /// Wrap an existing transport; the API key starts as the configured one.
    pub fn with_transport(transport: TransportClient<B, P>) -> Self {
        let api_key = ApiKey::new(transport.config().api_key());
        Self {
            transport,
            api_key,
            retry_policy: RetryPolicy::default(),
        }
    }

    /// Policy used by `create_service` when it generates keys.
    #[must_use]
    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    pub fn transport(&self) -> &TransportClient<B, P> {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut TransportClient<B, P> {
        &mut self.transport
    }

    pub fn config(&self) -> &Config {
        self.transport.config()
    }

    pub fn set_service(&mut self, service: &str, service_path: &str) {
        self.transport.set_service(service, service_path);
    }

    pub fn api_key(&self) -> &ApiKey {
        &self.api_key
    }

    /// Key used to publish observations from now on.
    pub fn set_api_key(&mut self, api_key: ApiKey) {
        self.api_key = api_key;
    }

    fn north(&self, path: &str) -> String {
        format!("{}{path}", self.config().iota_north_url())
    }

    fn south(&self, path: &str) -> String {
        format!("{}{path}", self.config().iota_protocol_url())
    }

    /// Create a service, generating API keys until one is accepted unless
    /// `api_key` is given. See `ServiceProvisioner`.
    pub fn create_service(&self, service: &str, service_path: &str, api_key: Option<ApiKey>) -> Provisioned {
        ServiceProvisioner::new(&self.transport)
            .policy(self.retry_policy)
            .create_service(service, service_path, api_key)
    }

    /// Remove a service (or, for `/*` and `/#` paths, a service and all its
    /// sub-services).
    ///
    /// `remove_devices` is not sent for the wildcard paths, where the agent
    /// does not accept it.
    pub fn remove_service(&self, service: &str, service_path: &str, api_key: &str, remove_devices: bool) -> Outcome {
        let mut options = RequestOptions::new()
            .param("resource", UL_RESOURCE)
            .param("apikey", api_key)
            .header(SERVICE_HEADER, service)
            .header(SERVICE_PATH_HEADER, service_path);
        if service_path != "/*" && service_path != "/#" {
            options = options.param("device", remove_devices);
        }

        self.transport
            .send_request(HttpMethod::Delete, &self.north("/iot/services"), options)
    }

    /// Register a device described by `template` in the current service.
    ///
    /// `[DEVICE_ID]` and `[ENTITY_ID]` are always substituted. When the
    /// template has an `"endpoint"` key and `endpoint` is given as
    /// `ip:port`, `[DEVICE_IP]` and `[PORT]` are substituted too.
    pub fn register_device(
        &self,
        template: &Template,
        device_id: &str,
        entity_id: &str,
        endpoint: Option<&str>,
        protocol: &str,
    ) -> Result<Outcome, ApiError> {
        let mut values = vec![(Placeholder::DeviceId, device_id), (Placeholder::EntityId, entity_id)];
        if let Some(endpoint) = endpoint.filter(|e| !e.is_empty() && template.has_key("endpoint")) {
            let (ip, port) = split_endpoint(endpoint)?;
            values.push((Placeholder::DeviceIp, ip));
            values.push((Placeholder::Port, port));
        }
        let payload = template.render(&values)?;

        let options = RequestOptions::new()
            .param("protocol", protocol)
            .header("Content-Type", "application/json")
            .payload(payload);
        Ok(self
            .transport
            .send_request(HttpMethod::Post, &self.north("/iot/devices"), options))
    }

    pub fn register_device_from_file(
        &self,
        path: impl AsRef<Path>,
        device_id: &str,
        entity_id: &str,
        endpoint: Option<&str>,
        protocol: &str,
    ) -> Result<Outcome, ApiError> {
        let template = Template::from_file(path)?;
        self.register_device(&template, device_id, entity_id, endpoint, protocol)
    }

    pub fn remove_device(&self, device_id: &str) -> Outcome {
        let options = RequestOptions::new().header("Content-Type", "application/json");
        self.transport.send_request(
            HttpMethod::Delete,
            &self.north(&format!("/iot/devices/{device_id}")),
            options,
        )
    }

    pub fn get_device_by_id(&self, device_id: &str) -> Outcome {
        let options = RequestOptions::new().header("Content-Type", "application/json");
        self.transport.send_request(
            HttpMethod::Get,
            &self.north(&format!("/iot/devices/{device_id}")),
            options,
        )
    }

    pub fn list_devices(&self, limit: Option<u32>, offset: Option<u32>) -> Outcome {
        let mut options = RequestOptions::new().header("Content-Type", "application/json");
        if let Some(limit) = limit {
            options = options.param("limit", limit);
        }
        if let Some(offset) = offset {
            options = options.param("offset", offset);
        }
        self.transport
            .send_request(HttpMethod::Get, &self.north("/iot/devices"), options)
    }

    /// Send measurement groups from `device_id` to the platform.
    ///
    /// Over HTTP, a completed request with a non-2xx status counts as a
    /// failure.
    pub fn send_observation(
        &self,
        device_id: &str,
        measurements: &[MeasurementGroup],
        transport: ObservationTransport,
        timeout: Duration,
    ) -> PublishOutcome {
        let payload = ultralight::encode(measurements);

        match transport {
            ObservationTransport::Mqtt => {
                debug!("observation over MQTT");
                let topic = attrs_topic(self.api_key.as_str(), device_id);
                self.transport.publish(&topic, &payload, timeout)
            }
            ObservationTransport::Http => {
                debug!("observation over Ultralight HTTP");
                let options = RequestOptions::new()
                    .param("k", self.api_key.as_str())
                    .param("i", device_id)
                    .header("Content-Type", "text/plain")
                    .payload(payload)
                    .timeout(timeout);
                match self
                    .transport
                    .send_request(HttpMethod::Post, &self.south(UL_RESOURCE), options)
                {
                    outcome if outcome.is_success() => PublishOutcome::Ok,
                    Outcome::Completed(response) => {
                        warn!(device_id, status = response.status, "observation rejected");
                        PublishOutcome::Failed(format!("HTTP {}", response.status))
                    }
                    Outcome::TransportFailure(message) | Outcome::Unsupported(message) => {
                        PublishOutcome::Failed(message)
                    }
                }
            }
        }
    }

    /// Send measurements over HTTP and ask for the device's pending polling
    /// commands in the same request.
    pub fn get_polling_commands(&self, device_id: &str, measurements: &[MeasurementGroup]) -> Outcome {
        let options = RequestOptions::new()
            .param("k", self.api_key.as_str())
            .param("i", device_id)
            .param("getCmd", 1)
            .header("Content-Type", "text/plain")
            .payload(ultralight::encode(measurements));
        self.transport
            .send_request(HttpMethod::Post, &self.south(UL_RESOURCE), options)
    }

    /// Ask the agent to forward `command` to the device behind `entity_id`.
    ///
    /// Parameter values are joined with `|` into the command value.
    pub fn send_command(&self, entity_id: &str, command: &str, params: &[&str]) -> Outcome {
        let payload = json!({
            "contextElements": [{
                "type": "thing",
                "isPattern": "false",
                "id": entity_id,
                "attributes": [{
                    "name": command,
                    "type": "command",
                    "value": ultralight::join_values(params),
                }]
            }],
            "updateAction": "UPDATE"
        });
        let options = RequestOptions::new()
            .header("Content-Type", "application/json")
            .header("Accept", "application/json")
            .payload(payload);
        self.transport
            .send_request(HttpMethod::Post, &self.north("/v1/updateContext"), options)
    }
}

/// Split `ip:port`; both halves must be non-empty.
fn split_endpoint(endpoint: &str) -> Result<(&str, &str), ApiError> {
    match endpoint.rsplit_once(':') {
        Some((ip, port)) if !ip.is_empty() && !port.is_empty() => Ok((ip, port)),
        _ => Err(ApiError::InvalidEndpoint(endpoint.to_string())),
    }
}
