//! Perseo rules, STH Comet history and the keystone token endpoint.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::Db;

#[derive(Deserialize)]
pub(crate) struct LastN {
    #[serde(rename = "lastN")]
    last_n: Option<usize>,
}

pub(crate) async fn create_rule(State(db): State<Db>, Json(rule): Json<Value>) -> Response {
    let Some(name) = rule["name"].as_str().map(str::to_string) else {
        return (StatusCode::BAD_REQUEST, Json(json!({ "error": "missing name", "data": null }))).into_response();
    };
    let mut state = db.write().await;
    if state.rules.contains_key(&name) {
        return (StatusCode::BAD_REQUEST, Json(json!({ "error": "rule exists", "data": null }))).into_response();
    }
    state.rules.insert(name, rule.clone());
    Json(json!({ "error": null, "data": rule })).into_response()
}

pub(crate) async fn list_rules(State(db): State<Db>) -> Json<Value> {
    let rules: Vec<Value> = db.read().await.rules.values().cloned().collect();
    Json(json!({ "error": null, "data": rules }))
}

/// History of one attribute. The fake keeps no time series: the entity's
/// current value, if any, is the only recorded value.
pub(crate) async fn history(
    State(db): State<Db>,
    Path((entity_type, entity_id, attribute)): Path<(String, String, String)>,
    Query(query): Query<LastN>,
) -> Json<Value> {
    let state = db.read().await;
    let values: Vec<Value> = state
        .entities
        .get(&(entity_id.clone(), entity_type.clone()))
        .map(|entity| &entity[attribute.as_str()]["value"])
        .filter(|value| !value.is_null())
        .map(|value| json!({ "attrValue": value }))
        .into_iter()
        .take(query.last_n.unwrap_or(usize::MAX))
        .collect();

    Json(json!({
        "contextResponses": [{
            "contextElement": {
                "attributes": [{ "name": attribute, "values": values }],
                "id": entity_id,
                "isPattern": false,
                "type": entity_type,
            },
            "statusCode": { "code": "200", "reasonPhrase": "OK" }
        }]
    }))
}

pub(crate) async fn issue_token(State(db): State<Db>, Json(body): Json<Value>) -> Response {
    let credentials = &body["auth"]["passwordCredentials"];
    let username = credentials["username"].as_str().unwrap_or_default();
    let password = credentials["password"].as_str().unwrap_or_default();

    let accepted = db.read().await.users.get(username).is_some_and(|p| p == password);
    if !accepted {
        let body = json!({
            "error": {
                "code": 401,
                "message": "The request you have made requires authentication.",
                "title": "Unauthorized",
            }
        });
        return (StatusCode::UNAUTHORIZED, Json(body)).into_response();
    }

    Json(json!({
        "access": {
            "token": {
                "id": Uuid::new_v4().simple().to_string(),
                "expires": "2099-01-01T00:00:00Z",
            }
        }
    }))
    .into_response()
}
