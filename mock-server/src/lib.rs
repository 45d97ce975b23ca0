//! In-process fake of a FIWARE platform: IoT agent, context broker, Perseo,
//! STH Comet and a keystone token endpoint behind one router.
//!
//! Every request is recorded (method, path, raw query, headers, body) before
//! it reaches a handler, so tests can assert on exactly what a client sent.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use axum::{
    body::{to_bytes, Body},
    extract::{Request, State},
    http::StatusCode,
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use serde::Serialize;
use serde_json::Value;
use tokio::{net::TcpListener, sync::RwLock};
use tracing::debug;

mod analytics;
mod context_broker;
mod iot_agent;

/// One request as the platform received it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct RecordedRequest {
    pub method: String,
    pub path: String,
    pub query: Option<String>,
    /// Header names are lower-case.
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl RecordedRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Raw (undecoded) value of a query parameter.
    pub fn query_param(&self, name: &str) -> Option<&str> {
        self.query.as_deref()?.split('&').find_map(|pair| {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            (key == name).then_some(value)
        })
    }

    pub fn json(&self) -> Option<Value> {
        serde_json::from_str(&self.body).ok()
    }
}

/// An Ultralight measurement received on the southbound port.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Observation {
    pub api_key: String,
    pub device_id: String,
    pub payload: String,
}

#[derive(Debug, Default)]
pub struct PlatformState {
    requests: Vec<RecordedRequest>,
    reject_next_services: u32,
    services: Vec<Value>,
    devices: BTreeMap<String, Value>,
    entities: BTreeMap<(String, String), Value>,
    subscriptions: BTreeMap<String, Value>,
    rules: BTreeMap<String, Value>,
    observations: Vec<Observation>,
    pending_commands: BTreeMap<String, Vec<(String, String)>>,
    users: HashMap<String, String>,
}

pub type Db = Arc<RwLock<PlatformState>>;

/// Initial behavior of a `Platform`.
#[derive(Clone, Debug, Default)]
pub struct Seed {
    /// Answer this many service creations with 409 regardless of the key.
    pub service_rejections: u32,
    /// Credentials the token endpoint accepts.
    pub users: Vec<(String, String)>,
}

/// Handle on a fake platform. Clones share state.
#[derive(Clone, Debug, Default)]
pub struct Platform {
    db: Db,
}

impl Platform {
    pub fn new() -> Self {
        Self::default()
    }

    /// A platform with some behavior set up before it starts serving.
    pub fn seeded(seed: Seed) -> Self {
        let state = PlatformState {
            reject_next_services: seed.service_rejections,
            users: seed.users.into_iter().collect(),
            ..PlatformState::default()
        };
        Self {
            db: Arc::new(RwLock::new(state)),
        }
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route(
                "/iot/services",
                get(iot_agent::list_services)
                    .post(iot_agent::create_service)
                    .delete(iot_agent::remove_service),
            )
            .route(
                "/iot/devices",
                get(iot_agent::list_devices).post(iot_agent::register_devices),
            )
            .route(
                "/iot/devices/{device_id}",
                get(iot_agent::get_device).delete(iot_agent::remove_device),
            )
            .route("/iot/d", post(iot_agent::measure))
            .route("/v1/updateContext", post(iot_agent::update_context))
            .route(
                "/v2/entities",
                get(context_broker::list_entities).post(context_broker::create_entity),
            )
            .route(
                "/v2/entities/{entity_id}",
                get(context_broker::get_entity).delete(context_broker::remove_entity),
            )
            .route("/v1/subscribeContext", post(context_broker::subscribe))
            .route("/v1/unsubscribeContext", post(context_broker::unsubscribe))
            .route("/v2/subscriptions", get(context_broker::list_subscriptions))
            .route(
                "/v2/subscriptions/{subscription_id}",
                get(context_broker::get_subscription),
            )
            .route("/rules", get(analytics::list_rules).post(analytics::create_rule))
            .route(
                "/STH/v1/contextEntities/type/{entity_type}/id/{entity_id}/attributes/{attribute}",
                get(analytics::history),
            )
            .route("/v2.0/tokens", post(analytics::issue_token))
            .layer(middleware::from_fn_with_state(self.db.clone(), record))
            .with_state(self.db.clone())
    }

    /// Every request received so far, oldest first.
    ///
    /// Blocks on the state lock; call from outside the server's runtime.
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.db.blocking_read().requests.clone()
    }

    pub fn observations(&self) -> Vec<Observation> {
        self.db.blocking_read().observations.clone()
    }

    pub fn service_count(&self) -> usize {
        self.db.blocking_read().services.len()
    }
}

/// A fresh platform's router.
pub fn app() -> Router {
    Platform::new().router()
}

pub async fn run(listener: TcpListener) -> Result<(), std::io::Error> {
    serve(listener, Platform::new()).await
}

pub async fn serve(listener: TcpListener, platform: Platform) -> Result<(), std::io::Error> {
    axum::serve(listener, platform.router()).await
}

async fn record(State(db): State<Db>, request: Request, next: Next) -> Response {
    let (parts, body) = request.into_parts();
    let bytes = match to_bytes(body, usize::MAX).await {
        Ok(bytes) => bytes,
        Err(_) => return StatusCode::BAD_REQUEST.into_response(),
    };

    let recorded = RecordedRequest {
        method: parts.method.to_string(),
        path: parts.uri.path().to_string(),
        query: parts.uri.query().map(str::to_string),
        headers: parts
            .headers
            .iter()
            .map(|(name, value)| {
                (
                    name.as_str().to_string(),
                    String::from_utf8_lossy(value.as_bytes()).into_owned(),
                )
            })
            .collect(),
        body: String::from_utf8_lossy(&bytes).into_owned(),
    };
    debug!(method = %recorded.method, path = %recorded.path, "request");
    db.write().await.requests.push(recorded);

    next.run(Request::from_parts(parts, Body::from(bytes))).await
}

/// Value of a header, or an empty string.
fn header(headers: &axum::http::HeaderMap, name: &str) -> String {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recorded(query: Option<&str>) -> RecordedRequest {
        RecordedRequest {
            method: "POST".to_string(),
            path: "/iot/d".to_string(),
            query: query.map(str::to_string),
            headers: vec![("fiware-service".to_string(), "smart".to_string())],
            body: "t|21".to_string(),
        }
    }

    #[test]
    fn query_params_by_name() {
        let request = recorded(Some("k=abc&i=LED01&flag"));
        assert_eq!(request.query_param("k"), Some("abc"));
        assert_eq!(request.query_param("i"), Some("LED01"));
        assert_eq!(request.query_param("flag"), Some(""));
        assert_eq!(request.query_param("missing"), None);
        assert_eq!(recorded(None).query_param("k"), None);
    }

    #[test]
    fn header_lookup_ignores_case() {
        assert_eq!(recorded(None).header("Fiware-Service"), Some("smart"));
    }

    #[test]
    fn text_body_is_not_json() {
        assert!(recorded(None).json().is_none());
    }
}
