//! Service provisioning with client-generated API keys.
//!
//! # Design
//! The IoT agent binds a service to an API key and rejects keys already in
//! use. The provisioner draws a random key, asks for the service, and on any
//! status other than 201 draws a fresh key and asks again. It does not look
//! at why an attempt failed: a duplicate key and an unreachable agent are
//! handled alike.
//!
//! With the default `RetryPolicy` the loop has no cap and no backoff, so a
//! backend that never answers 201 blocks the caller forever. Every failed
//! attempt is logged at `warn` so the condition is visible. Callers that
//! cannot accept this pass `RetryPolicy::capped`.

use std::fmt;
use std::num::NonZeroU32;

use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;

use crate::client::{HttpBackend, RequestOptions, TransportClient};
use crate::config::{SERVICE_HEADER, SERVICE_PATH_HEADER};
use crate::http::HttpMethod;
use crate::mqtt::Publisher;
use crate::response::Outcome;

/// Resource path the IoT agent serves Ultralight devices on.
pub const UL_RESOURCE: &str = "/iot/d";

/// Entity type assigned to devices of a provisioned service.
pub const DEFAULT_ENTITY_TYPE: &str = "Thing";

/// Token tying device traffic to a provisioned service.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ApiKey(String);

impl ApiKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// A fresh 128-bit random key as 32 lowercase hex characters.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ApiKey {
    fn from(key: &str) -> Self {
        Self::new(key)
    }
}

/// How many creation attempts a generated-key provisioning may make.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: Option<NonZeroU32>,
}

impl RetryPolicy {
    /// Retry until the agent answers 201.
    pub const fn unbounded() -> Self {
        Self { max_attempts: None }
    }

    /// Stop after `max_attempts` attempts.
    pub const fn capped(max_attempts: NonZeroU32) -> Self {
        Self {
            max_attempts: Some(max_attempts),
        }
    }

    pub fn max_attempts(&self) -> Option<NonZeroU32> {
        self.max_attempts
    }

    fn allows(&self, attempt: u32) -> bool {
        self.max_attempts.map_or(true, |max| attempt <= max.get())
    }
}

/// Result of a provisioning run: the last outcome and the key it used.
#[derive(Debug, Clone, PartialEq)]
pub struct Provisioned {
    pub outcome: Outcome,
    pub api_key: ApiKey,
    pub attempts: u32,
}

impl Provisioned {
    pub fn is_created(&self) -> bool {
        self.outcome.is_created()
    }

    /// The outcome record with the key attached as `api_key`.
    pub fn to_json(&self) -> serde_json::Value {
        let mut record = self.outcome.to_json();
        record["api_key"] = json!(self.api_key);
        record
    }
}

/// Creates services on the IoT agent through a `TransportClient`.
pub struct ServiceProvisioner<'a, B, P> {
    transport: &'a TransportClient<B, P>,
    policy: RetryPolicy,
}

impl<'a, B: HttpBackend, P: Publisher> ServiceProvisioner<'a, B, P> {
    pub fn new(transport: &'a TransportClient<B, P>) -> Self {
        Self {
            transport,
            policy: RetryPolicy::default(),
        }
    }

    #[must_use]
    pub fn policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Create `service`/`service_path` bound to an API key.
    ///
    /// With `api_key` given, exactly one attempt is made and its outcome is
    /// returned whatever the status. Without one, random keys are drawn
    /// until an attempt answers 201 (or the policy's cap is reached).
    pub fn create_service(&self, service: &str, service_path: &str, api_key: Option<ApiKey>) -> Provisioned {
        if let Some(api_key) = api_key {
            let outcome = self.attempt(service, service_path, &api_key);
            return Provisioned {
                outcome,
                api_key,
                attempts: 1,
            };
        }

        let mut attempt = 1;
        loop {
            let api_key = ApiKey::generate();
            let outcome = self.attempt(service, service_path, &api_key);

            if outcome.is_created() {
                info!(service, service_path, attempts = attempt, "service created");
                return Provisioned {
                    outcome,
                    api_key,
                    attempts: attempt,
                };
            }

            if !self.policy.allows(attempt.saturating_add(1)) {
                warn!(
                    service,
                    service_path,
                    attempts = attempt,
                    status = outcome.status_code(),
                    "giving up on service creation"
                );
                return Provisioned {
                    outcome,
                    api_key,
                    attempts: attempt,
                };
            }

            warn!(
                service,
                service_path,
                attempt,
                status = outcome.status_code(),
                "service creation rejected, retrying with a new api key"
            );
            attempt = attempt.saturating_add(1);
        }
    }

    fn attempt(&self, service: &str, service_path: &str, api_key: &ApiKey) -> Outcome {
        let config = self.transport.config();
        let url = format!("{}/iot/services", config.iota_north_url());
        let payload = json!({
            "services": [{
                "apikey": api_key.as_str(),
                "cbroker": config.context_broker_url(),
                "entity_type": DEFAULT_ENTITY_TYPE,
                "resource": UL_RESOURCE,
            }]
        });
        let options = RequestOptions::new()
            .header("Content-Type", "application/json")
            .header(SERVICE_HEADER, service)
            .header(SERVICE_PATH_HEADER, service_path)
            .payload(payload);

        self.transport.send_request(HttpMethod::Post, &url, options)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_keys_are_hex_and_distinct() {
        let a = ApiKey::generate();
        let b = ApiKey::generate();
        assert_eq!(a.as_str().len(), 32);
        assert!(a.as_str().chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        assert_ne!(a, b);
    }

    #[test]
    fn default_policy_is_unbounded() {
        let policy = RetryPolicy::default();
        assert_eq!(policy, RetryPolicy::unbounded());
        assert!(policy.allows(u32::MAX));
    }

    #[test]
    fn capped_policy_stops_after_cap() {
        let policy = RetryPolicy::capped(NonZeroU32::new(3).unwrap());
        assert!(policy.allows(3));
        assert!(!policy.allows(4));
    }
}
