//! Platform configuration.
//!
//! # Design
//! `Config` is an immutable snapshot of every endpoint and credential the
//! clients need. It is deserialized from the camelCase JSON document the
//! platform deployments ship with (`ConfigFile`), then flattened. The only
//! ways to derive a different snapshot are `with_service`, which always
//! replaces service and service path together, and `with_token`.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ApiError;
use crate::http::Headers;

/// Header value sent as `X-Auth-Token` when no token is configured.
pub const NULL_TOKEN: &str = "NULL";

/// FIWARE Lab keystone endpoint used when the document does not name one.
pub const DEFAULT_TOKENS_URL: &str = "http://cloud.lab.fi-ware.org:4730/v2.0/tokens";

pub const AUTH_TOKEN_HEADER: &str = "X-Auth-Token";
pub const SERVICE_HEADER: &str = "Fiware-Service";
pub const SERVICE_PATH_HEADER: &str = "Fiware-ServicePath";

/// A `host:port` pair of one platform component.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// `http://host:port`, without a trailing slash.
    pub fn url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct IotaSection {
    aaa: bool,
    host: String,
    north_port: u16,
    protocol_port: u16,
    api_key: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct CygnusSection {
    host: String,
    port: u16,
    notification_host: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct UserSection {
    token: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct LocalSection {
    host_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct AuthSection {
    tokens_url: String,
}

impl Default for AuthSection {
    fn default() -> Self {
        Self {
            tokens_url: DEFAULT_TOKENS_URL.to_string(),
        }
    }
}

/// On-disk shape of the configuration document.
#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct ConfigFile {
    fiware_service: String,
    fiware_service_path: String,
    context_broker: Endpoint,
    iota: IotaSection,
    mqtt_broker: Endpoint,
    sth_comet: Endpoint,
    cygnus: CygnusSection,
    perseo: Endpoint,
    user: UserSection,
    local: LocalSection,
    auth: AuthSection,
}

/// Immutable snapshot of the platform endpoints and credentials.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    service: String,
    service_path: String,
    context_broker: Endpoint,
    iota_host: String,
    iota_north_port: u16,
    iota_protocol_port: u16,
    mqtt_broker: Endpoint,
    sth_comet: Endpoint,
    cygnus: Endpoint,
    cygnus_notification_host: String,
    perseo: Endpoint,
    api_key: String,
    token: Option<String>,
    host_id: String,
    tokens_url: String,
}

impl From<ConfigFile> for Config {
    fn from(file: ConfigFile) -> Self {
        // The user token only applies when the IoT agent runs behind AAA.
        let token = if file.iota.aaa && !file.user.token.is_empty() {
            Some(file.user.token)
        } else {
            None
        };

        Self {
            service: file.fiware_service,
            service_path: file.fiware_service_path,
            context_broker: file.context_broker,
            iota_host: file.iota.host,
            iota_north_port: file.iota.north_port,
            iota_protocol_port: file.iota.protocol_port,
            mqtt_broker: file.mqtt_broker,
            sth_comet: file.sth_comet,
            cygnus: Endpoint::new(file.cygnus.host, file.cygnus.port),
            cygnus_notification_host: file.cygnus.notification_host,
            perseo: file.perseo,
            api_key: file.iota.api_key,
            token,
            host_id: file.local.host_id,
            tokens_url: file.auth.tokens_url,
        }
    }
}

impl Config {
    pub fn from_json_str(raw: &str) -> Result<Self, ApiError> {
        let file: ConfigFile = serde_json::from_str(raw).map_err(ApiError::Config)?;
        Ok(file.into())
    }

    pub fn from_value(value: serde_json::Value) -> Result<Self, ApiError> {
        let file: ConfigFile = serde_json::from_value(value).map_err(ApiError::Config)?;
        Ok(file.into())
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ApiError> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path).map_err(|source| ApiError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&raw)
    }

    /// A copy of this snapshot scoped to another service and service path.
    #[must_use]
    pub fn with_service(&self, service: &str, service_path: &str) -> Self {
        Self {
            service: service.to_string(),
            service_path: service_path.to_string(),
            ..self.clone()
        }
    }

    /// A copy of this snapshot carrying `token`.
    #[must_use]
    pub fn with_token(&self, token: &str) -> Self {
        Self {
            token: Some(token.to_string()),
            ..self.clone()
        }
    }

    /// The three headers every platform request carries.
    pub fn default_headers(&self) -> Headers {
        vec![
            (
                AUTH_TOKEN_HEADER.to_string(),
                self.token.clone().unwrap_or_else(|| NULL_TOKEN.to_string()),
            ),
            (SERVICE_HEADER.to_string(), self.service.clone()),
            (SERVICE_PATH_HEADER.to_string(), self.service_path.clone()),
        ]
    }

    /// The token with all but its edges masked, for log output.
    pub fn token_preview(&self) -> String {
        match &self.token {
            Some(token) => mask_token(token),
            None => NULL_TOKEN.to_string(),
        }
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    pub fn service_path(&self) -> &str {
        &self.service_path
    }

    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    pub fn host_id(&self) -> &str {
        &self.host_id
    }

    pub fn tokens_url(&self) -> &str {
        &self.tokens_url
    }

    pub fn context_broker(&self) -> &Endpoint {
        &self.context_broker
    }

    pub fn mqtt_broker(&self) -> &Endpoint {
        &self.mqtt_broker
    }

    pub fn sth_comet(&self) -> &Endpoint {
        &self.sth_comet
    }

    pub fn cygnus(&self) -> &Endpoint {
        &self.cygnus
    }

    pub fn perseo(&self) -> &Endpoint {
        &self.perseo
    }

    pub fn context_broker_url(&self) -> String {
        self.context_broker.url()
    }

    /// IoT agent administration (north) API.
    pub fn iota_north_url(&self) -> String {
        Endpoint::new(self.iota_host.clone(), self.iota_north_port).url()
    }

    /// IoT agent device-facing (south) Ultralight API.
    pub fn iota_protocol_url(&self) -> String {
        Endpoint::new(self.iota_host.clone(), self.iota_protocol_port).url()
    }

    pub fn sth_url(&self) -> String {
        self.sth_comet.url()
    }

    pub fn perseo_url(&self) -> String {
        self.perseo.url()
    }

    /// Where the context broker should deliver notifications for Cygnus.
    pub fn cygnus_notification_url(&self) -> String {
        Endpoint::new(self.cygnus_notification_host.clone(), self.cygnus.port).url()
    }
}

/// Keep the first and last four characters of a credential, star the rest.
pub(crate) fn mask_token(token: &str) -> String {
    let chars: Vec<char> = token.chars().collect();
    if chars.len() <= 8 {
        return "*".repeat(chars.len());
    }
    let head: String = chars[..4].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{head}{}{tail}", "*".repeat(chars.len() - 8))
}
