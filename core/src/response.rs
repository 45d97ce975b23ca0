//! Uniform results of platform calls.
//!
//! # Design
//! Every request ends in an `Outcome`; callers match on it (or read
//! `status_code()`) instead of handling errors. A status code of 0 means no
//! code was received: the transport failed, or the request was never sent.

use serde_json::{json, Map, Value};

use crate::http::{header_value, Headers, HttpResponse};

/// A completed HTTP exchange with its body parsed as JSON.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub status: u16,
    /// Parsed body, or an empty object when the body was empty or not JSON.
    pub body: Value,
    pub headers: Headers,
}

impl Response {
    pub fn header(&self, name: &str) -> Option<&str> {
        header_value(&self.headers, name)
    }
}

impl From<HttpResponse> for Response {
    fn from(raw: HttpResponse) -> Self {
        Self {
            status: raw.status,
            body: parse_body(&raw.body),
            headers: raw.headers,
        }
    }
}

/// Parse a response body, treating empty or malformed content as "no
/// structured payload".
pub fn parse_body(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::Object(Map::new()))
}

/// The result of `TransportClient::send_request`.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// The server answered, whatever the status.
    Completed(Response),
    /// The request did not complete (refused, unreachable, timed out).
    TransportFailure(String),
    /// The method is not one of GET/POST/PUT/DELETE; nothing was sent.
    Unsupported(String),
}

impl Outcome {
    /// The HTTP status, or 0 when no status was received.
    pub fn status_code(&self) -> u16 {
        match self {
            Outcome::Completed(response) => response.status,
            Outcome::TransportFailure(_) | Outcome::Unsupported(_) => 0,
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status_code())
    }

    pub fn is_created(&self) -> bool {
        self.status_code() == 201
    }

    pub fn response(&self) -> Option<&Response> {
        match self {
            Outcome::Completed(response) => Some(response),
            _ => None,
        }
    }

    /// The parsed body of a completed exchange.
    pub fn body(&self) -> Option<&Value> {
        self.response().map(|response| &response.body)
    }

    /// The description of a transport failure or unsupported method.
    pub fn error(&self) -> Option<&str> {
        match self {
            Outcome::Completed(_) => None,
            Outcome::TransportFailure(message) | Outcome::Unsupported(message) => Some(message),
        }
    }

    /// Render as the `{status_code, response, headers}` record.
    ///
    /// Failures carry `{"error": ...}` as the response and no headers.
    pub fn to_json(&self) -> Value {
        match self {
            Outcome::Completed(response) => {
                let headers: Map<String, Value> = response
                    .headers
                    .iter()
                    .map(|(name, value)| (name.clone(), Value::String(value.clone())))
                    .collect();
                json!({
                    "status_code": response.status,
                    "response": response.body,
                    "headers": headers,
                })
            }
            Outcome::TransportFailure(message) | Outcome::Unsupported(message) => json!({
                "status_code": 0,
                "response": { "error": message },
            }),
        }
    }
}

/// The result of an MQTT publish or an Ultralight-over-HTTP observation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishOutcome {
    Ok,
    Failed(String),
}

impl PublishOutcome {
    pub fn is_ok(&self) -> bool {
        matches!(self, PublishOutcome::Ok)
    }

    pub fn to_json(&self) -> Value {
        match self {
            PublishOutcome::Ok => json!({ "result": "OK" }),
            PublishOutcome::Failed(message) => json!({ "error": message }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(status: u16, body: &str) -> HttpResponse {
        HttpResponse {
            status,
            headers: vec![("Content-Type".to_string(), "application/json".to_string())],
            body: body.to_string(),
        }
    }

    #[test]
    fn json_body_is_parsed() {
        let response = Response::from(raw(200, r#"{"id":"Room1","type":"Room"}"#));
        assert_eq!(response.body["id"], "Room1");
        assert_eq!(response.header("content-type"), Some("application/json"));
    }

    #[test]
    fn array_body_is_kept() {
        let response = Response::from(raw(200, r#"[{"id":"a"},{"id":"b"}]"#));
        assert_eq!(response.body.as_array().map(Vec::len), Some(2));
    }

    #[test]
    fn empty_body_becomes_empty_object() {
        let response = Response::from(raw(201, ""));
        assert_eq!(response.body, json!({}));
    }

    #[test]
    fn malformed_body_becomes_empty_object() {
        let response = Response::from(raw(500, "<html>Internal error</html>"));
        assert_eq!(response.body, json!({}));
        assert_eq!(response.status, 500);
    }

    #[test]
    fn failures_report_status_zero() {
        let failed = Outcome::TransportFailure("connection refused".to_string());
        assert_eq!(failed.status_code(), 0);
        assert!(!failed.is_success());
        assert_eq!(failed.error(), Some("connection refused"));
        assert_eq!(
            failed.to_json(),
            json!({ "status_code": 0, "response": { "error": "connection refused" } })
        );

        let unsupported = Outcome::Unsupported("PATCH".to_string());
        assert_eq!(unsupported.status_code(), 0);
        assert!(unsupported.body().is_none());
    }

    #[test]
    fn completed_renders_record_shape() {
        let outcome = Outcome::Completed(Response::from(raw(201, "")));
        assert!(outcome.is_created());
        assert_eq!(
            outcome.to_json(),
            json!({
                "status_code": 201,
                "response": {},
                "headers": { "Content-Type": "application/json" },
            })
        );
    }

    #[test]
    fn publish_outcome_markers() {
        assert_eq!(PublishOutcome::Ok.to_json(), json!({ "result": "OK" }));
        assert_eq!(
            PublishOutcome::Failed("broker down".to_string()).to_json(),
            json!({ "error": "broker down" })
        );
    }
}
