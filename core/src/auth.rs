//! One-shot token fetch from the FIWARE Lab keystone.
//!
//! The token is requested once, on demand, and installed into the client's
//! config; nothing refreshes it when it expires.

use serde_json::json;
use tracing::{debug, info};

use crate::client::{HttpBackend, TransportClient};
use crate::error::ApiError;
use crate::http::{HttpMethod, HttpRequest};
use crate::mqtt::Publisher;
use crate::response::Response;

/// A token issued by keystone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthToken {
    pub id: String,
    pub expires: String,
}

impl<B: HttpBackend, P: Publisher> TransportClient<B, P> {
    /// Exchange user credentials for a token and use it on every later call.
    ///
    /// The request goes to `Config::tokens_url` without the platform
    /// headers.
    pub fn authenticate(&mut self, username: &str, password: &str) -> Result<AuthToken, ApiError> {
        info!(username, "requesting token");

        let payload = json!({
            "auth": {
                "passwordCredentials": {
                    "username": username,
                    "password": password,
                }
            }
        });
        let request = HttpRequest {
            method: HttpMethod::Post,
            url: self.config().tokens_url().to_string(),
            query: Vec::new(),
            headers: vec![("Content-Type".to_string(), "application/json".to_string())],
            body: Some(payload.to_string()),
        };

        // Sent straight to the backend so the credentials never reach the
        // request log.
        let response = Response::from(self.backend().execute(&request, self.default_timeout())?);
        if !(200..300).contains(&response.status) {
            return Err(ApiError::HttpError {
                status: response.status,
                body: response.body.to_string(),
            });
        }

        let token = &response.body["access"]["token"];
        let id = token["id"].as_str().ok_or(ApiError::MissingField("access.token.id"))?;
        let expires = token["expires"].as_str().unwrap_or_default();

        let config = self.config().with_token(id);
        self.replace_config(config);
        debug!(token = %self.config().token_preview(), expires, "token installed");

        Ok(AuthToken {
            id: id.to_string(),
            expires: expires.to_string(),
        })
    }
}
