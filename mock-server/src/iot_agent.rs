//! IoT agent: north API (services, devices, commands) and the Ultralight
//! south endpoint.

use std::collections::HashMap;

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::{header, Db, Observation};

fn error(status: StatusCode, name: &str, message: &str) -> Response {
    (status, Json(json!({ "name": name, "message": message }))).into_response()
}

#[derive(Deserialize)]
pub(crate) struct Page {
    limit: Option<usize>,
    offset: Option<usize>,
}

#[derive(Deserialize)]
pub(crate) struct Measure {
    k: String,
    i: String,
    #[serde(rename = "getCmd")]
    get_cmd: Option<u8>,
}

pub(crate) async fn list_services(State(db): State<Db>, headers: HeaderMap) -> Json<Value> {
    let service = header(&headers, "fiware-service");
    let state = db.read().await;
    let services: Vec<Value> = state
        .services
        .iter()
        .filter(|s| s["service"] == service.as_str())
        .cloned()
        .collect();
    Json(json!({ "count": services.len(), "services": services }))
}

pub(crate) async fn create_service(
    State(db): State<Db>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    let mut state = db.write().await;
    if state.reject_next_services > 0 {
        state.reject_next_services -= 1;
        return error(StatusCode::CONFLICT, "DUPLICATE_GROUP", "duplicated configuration");
    }

    let Some(services) = body["services"].as_array() else {
        return error(StatusCode::BAD_REQUEST, "WRONG_SYNTAX", "services array expected");
    };
    for service in services {
        if !service.is_object() {
            return error(StatusCode::BAD_REQUEST, "WRONG_SYNTAX", "service object expected");
        }
        let api_key = service["apikey"].as_str().unwrap_or_default();
        if state.services.iter().any(|s| s["apikey"] == api_key) {
            return error(StatusCode::CONFLICT, "DUPLICATE_GROUP", "duplicated configuration");
        }
    }

    for service in services {
        let mut record = service.clone();
        record["service"] = json!(header(&headers, "fiware-service"));
        record["subservice"] = json!(header(&headers, "fiware-servicepath"));
        state.services.push(record);
    }
    StatusCode::CREATED.into_response()
}

pub(crate) async fn remove_service(
    State(db): State<Db>,
    headers: HeaderMap,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let service = header(&headers, "fiware-service");
    let service_path = header(&headers, "fiware-servicepath");
    let wildcard = service_path == "/*" || service_path == "/#";
    let api_key = params.get("apikey").map(String::as_str).unwrap_or_default();
    let resource = params.get("resource").map(String::as_str).unwrap_or_default();

    let mut state = db.write().await;
    let before = state.services.len();
    state.services.retain(|s| {
        !(s["service"] == service.as_str()
            && (wildcard || s["subservice"] == service_path.as_str())
            && s["apikey"] == api_key
            && s["resource"] == resource)
    });
    if state.services.len() == before {
        return error(StatusCode::NOT_FOUND, "DEVICE_GROUP_NOT_FOUND", "no configuration found");
    }

    if params.get("device").map(String::as_str) == Some("true") {
        state.devices.retain(|_, d| d["service"] != service.as_str());
    }
    StatusCode::NO_CONTENT.into_response()
}

pub(crate) async fn register_devices(
    State(db): State<Db>,
    headers: HeaderMap,
    Query(params): Query<HashMap<String, String>>,
    Json(body): Json<Value>,
) -> Response {
    let Some(devices) = body["devices"].as_array() else {
        return error(StatusCode::BAD_REQUEST, "WRONG_SYNTAX", "devices array expected");
    };

    let mut state = db.write().await;
    for device in devices {
        let Some(device_id) = device["device_id"].as_str() else {
            return error(StatusCode::BAD_REQUEST, "WRONG_SYNTAX", "device_id expected");
        };
        if state.devices.contains_key(device_id) {
            return error(StatusCode::CONFLICT, "DUPLICATE_DEVICE_ID", "device already exists");
        }
    }

    for device in devices {
        let mut record = device.clone();
        record["service"] = json!(header(&headers, "fiware-service"));
        record["service_path"] = json!(header(&headers, "fiware-servicepath"));
        if let Some(protocol) = params.get("protocol") {
            record["protocol"] = json!(protocol);
        }
        let device_id = record["device_id"].as_str().unwrap_or_default().to_string();
        state.devices.insert(device_id, record);
    }
    StatusCode::CREATED.into_response()
}

pub(crate) async fn list_devices(
    State(db): State<Db>,
    headers: HeaderMap,
    Query(page): Query<Page>,
) -> Json<Value> {
    let service = header(&headers, "fiware-service");
    let state = db.read().await;
    let matching: Vec<&Value> = state
        .devices
        .values()
        .filter(|d| d["service"] == service.as_str())
        .collect();
    let devices: Vec<Value> = matching
        .iter()
        .skip(page.offset.unwrap_or(0))
        .take(page.limit.unwrap_or(20))
        .map(|d| (*d).clone())
        .collect();
    Json(json!({ "count": matching.len(), "devices": devices }))
}

pub(crate) async fn get_device(State(db): State<Db>, Path(device_id): Path<String>) -> Response {
    match db.read().await.devices.get(&device_id) {
        Some(device) => Json(device.clone()).into_response(),
        None => error(StatusCode::NOT_FOUND, "DEVICE_NOT_FOUND", "no device found"),
    }
}

pub(crate) async fn remove_device(State(db): State<Db>, Path(device_id): Path<String>) -> Response {
    match db.write().await.devices.remove(&device_id) {
        Some(_) => StatusCode::NO_CONTENT.into_response(),
        None => error(StatusCode::NOT_FOUND, "DEVICE_NOT_FOUND", "no device found"),
    }
}

/// Ultralight measures. With `getCmd=1` the answer carries the device's
/// pending commands as `device@command|value` lines.
pub(crate) async fn measure(
    State(db): State<Db>,
    Query(measure): Query<Measure>,
    body: String,
) -> Response {
    let mut state = db.write().await;
    if !state.services.iter().any(|s| s["apikey"] == measure.k.as_str()) {
        return error(StatusCode::NOT_FOUND, "DEVICE_GROUP_NOT_FOUND", "unknown api key");
    }
    state.observations.push(Observation {
        api_key: measure.k.clone(),
        device_id: measure.i.clone(),
        payload: body,
    });

    if measure.get_cmd != Some(1) {
        return (StatusCode::OK, String::new()).into_response();
    }
    let entity_id = state
        .devices
        .get(&measure.i)
        .and_then(|d| d["entity_name"].as_str())
        .unwrap_or(measure.i.as_str())
        .to_string();
    let commands = state.pending_commands.remove(&entity_id).unwrap_or_default();
    let lines: Vec<String> = commands
        .iter()
        .map(|(command, value)| format!("{}@{command}|{value}", measure.i))
        .collect();
    (StatusCode::OK, lines.join("\n")).into_response()
}

/// NGSI v1 update on the agent; command attributes are queued for polling.
pub(crate) async fn update_context(State(db): State<Db>, Json(body): Json<Value>) -> Response {
    let Some(elements) = body["contextElements"].as_array() else {
        return error(StatusCode::BAD_REQUEST, "WRONG_SYNTAX", "contextElements expected");
    };

    let mut state = db.write().await;
    let mut responses = Vec::new();
    for element in elements {
        let entity_id = element["id"].as_str().unwrap_or_default().to_string();
        let commands = element["attributes"]
            .as_array()
            .into_iter()
            .flatten()
            .filter(|a| a["type"] == "command")
            .map(|a| {
                (
                    a["name"].as_str().unwrap_or_default().to_string(),
                    a["value"].as_str().unwrap_or_default().to_string(),
                )
            });
        state.pending_commands.entry(entity_id).or_default().extend(commands);
        responses.push(json!({
            "contextElement": element,
            "statusCode": { "code": "200", "reasonPhrase": "OK" }
        }));
    }
    Json(json!({ "contextResponses": responses })).into_response()
}
