//! Context broker: NGSI v2 entities, NGSI v1 subscriptions with a v2 read
//! view.

use axum::{
    extract::{Path, Query, State},
    http::{header::LOCATION, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::Db;

/// Entity type the broker assigns when none is given.
const DEFAULT_TYPE: &str = "Thing";

fn error(status: StatusCode, error: &str, description: &str) -> Response {
    (status, Json(json!({ "error": error, "description": description }))).into_response()
}

#[derive(Deserialize)]
pub(crate) struct EntityFilter {
    #[serde(rename = "type")]
    entity_type: Option<String>,
    #[serde(rename = "idPattern")]
    id_pattern: Option<String>,
    limit: Option<usize>,
    offset: Option<usize>,
}

/// Only exact ids and `prefix.*` patterns are understood.
fn id_matches(pattern: &str, id: &str) -> bool {
    match pattern.strip_suffix(".*") {
        Some(prefix) => id.starts_with(prefix),
        None => id == pattern,
    }
}

pub(crate) async fn create_entity(State(db): State<Db>, Json(entity): Json<Value>) -> Response {
    let Some(id) = entity["id"].as_str().map(str::to_string) else {
        return error(StatusCode::BAD_REQUEST, "BadRequest", "entity id is missing");
    };
    let entity_type = entity["type"].as_str().unwrap_or(DEFAULT_TYPE).to_string();

    let mut state = db.write().await;
    let key = (id.clone(), entity_type.clone());
    if state.entities.contains_key(&key) {
        return error(StatusCode::UNPROCESSABLE_ENTITY, "Unprocessable", "Already Exists");
    }
    let mut record = entity;
    record["type"] = json!(entity_type);
    state.entities.insert(key, record);

    let location = format!("/v2/entities/{id}?type={entity_type}");
    (StatusCode::CREATED, [(LOCATION, location)]).into_response()
}

pub(crate) async fn list_entities(State(db): State<Db>, Query(filter): Query<EntityFilter>) -> Json<Value> {
    let state = db.read().await;
    let entities: Vec<Value> = state
        .entities
        .iter()
        .filter(|((id, entity_type), _)| {
            filter.entity_type.as_deref().map_or(true, |t| t == entity_type.as_str())
                && filter.id_pattern.as_deref().map_or(true, |p| id_matches(p, id))
        })
        .skip(filter.offset.unwrap_or(0))
        .take(filter.limit.unwrap_or(20))
        .map(|(_, entity)| entity.clone())
        .collect();
    Json(Value::Array(entities))
}

fn find_key(
    entities: &std::collections::BTreeMap<(String, String), Value>,
    id: &str,
    entity_type: Option<&str>,
) -> Option<(String, String)> {
    entities
        .keys()
        .find(|(i, t)| i == id && entity_type.map_or(true, |wanted| wanted == t))
        .cloned()
}

fn entity_not_found() -> Response {
    error(
        StatusCode::NOT_FOUND,
        "NotFound",
        "The requested entity has not been found. Check type and id",
    )
}

pub(crate) async fn get_entity(
    State(db): State<Db>,
    Path(entity_id): Path<String>,
    Query(filter): Query<EntityFilter>,
) -> Response {
    let state = db.read().await;
    match find_key(&state.entities, &entity_id, filter.entity_type.as_deref()) {
        Some(key) => Json(state.entities[&key].clone()).into_response(),
        None => entity_not_found(),
    }
}

pub(crate) async fn remove_entity(
    State(db): State<Db>,
    Path(entity_id): Path<String>,
    Query(filter): Query<EntityFilter>,
) -> Response {
    let mut state = db.write().await;
    match find_key(&state.entities, &entity_id, filter.entity_type.as_deref()) {
        Some(key) => {
            state.entities.remove(&key);
            StatusCode::NO_CONTENT.into_response()
        }
        None => entity_not_found(),
    }
}

pub(crate) async fn subscribe(State(db): State<Db>, Json(body): Json<Value>) -> Response {
    let subscription_id = Uuid::new_v4().simple().to_string()[..24].to_string();
    let response = json!({
        "subscribeResponse": {
            "subscriptionId": subscription_id,
            "duration": body["duration"],
            "throttling": body["throttling"],
        }
    });
    db.write().await.subscriptions.insert(subscription_id, body);
    Json(response).into_response()
}

/// NGSI v1 reports an unknown id inside a 200 answer.
pub(crate) async fn unsubscribe(State(db): State<Db>, Json(body): Json<Value>) -> Json<Value> {
    let subscription_id = body["subscriptionId"].as_str().unwrap_or_default().to_string();
    let removed = db.write().await.subscriptions.remove(&subscription_id).is_some();
    let status = if removed {
        json!({ "code": "200", "reasonPhrase": "OK" })
    } else {
        json!({ "code": "404", "reasonPhrase": "No context element found" })
    };
    Json(json!({ "subscriptionId": subscription_id, "statusCode": status }))
}

/// The v2 representation of a subscription created through v1.
fn as_v2(id: &str, v1: &Value) -> Value {
    json!({
        "id": id,
        "status": "active",
        "subject": {
            "entities": v1["entities"],
            "condition": { "attrs": v1["notifyConditions"][0]["condValues"] },
        },
        "notification": {
            "attrs": v1["attributes"],
            "http": { "url": v1["reference"] },
        },
        "throttling": 1,
    })
}

pub(crate) async fn list_subscriptions(State(db): State<Db>) -> Json<Value> {
    let state = db.read().await;
    let subscriptions: Vec<Value> = state
        .subscriptions
        .iter()
        .map(|(id, v1)| as_v2(id, v1))
        .collect();
    Json(Value::Array(subscriptions))
}

pub(crate) async fn get_subscription(State(db): State<Db>, Path(subscription_id): Path<String>) -> Response {
    match db.read().await.subscriptions.get(&subscription_id) {
        Some(v1) => Json(as_v2(&subscription_id, v1)).into_response(),
        None => error(
            StatusCode::NOT_FOUND,
            "NotFound",
            "The requested subscription has not been found. Check id",
        ),
    }
}
