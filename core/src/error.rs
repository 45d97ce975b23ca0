//! Error types for the FIWARE client.
//!
//! # Design
//! Requests never fail with an `Err`: transport problems and platform
//! errors are folded into `Outcome` so callers branch on the status code.
//! `ApiError` covers the local work that happens before a request exists
//! (loading config, rendering templates, parsing an endpoint) and the
//! one-shot token fetch, whose result the client has to interpret.

use std::path::PathBuf;

use thiserror::Error;

/// Errors returned by fallible client operations.
#[derive(Debug, Error)]
pub enum ApiError {
    /// A config or template file could not be read.
    #[error("cannot read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The configuration document is not valid JSON of the expected shape.
    #[error("invalid configuration: {0}")]
    Config(#[source] serde_json::Error),

    /// A template did not produce valid JSON after substitution.
    #[error("template is not valid JSON: {0}")]
    Template(#[source] serde_json::Error),

    /// A device endpoint was not in `ip:port` form.
    #[error("invalid device endpoint `{0}`, expected `ip:port`")]
    InvalidEndpoint(String),

    /// The request could not be completed.
    #[error("transport failure: {0}")]
    Transport(#[from] TransportError),

    /// The server returned an unexpected status.
    #[error("HTTP {status}: {body}")]
    HttpError { status: u16, body: String },

    /// The response did not contain the expected field.
    #[error("response is missing `{0}`")]
    MissingField(&'static str),
}

/// A request or publish that did not complete: refused connection,
/// unreachable host, timeout, or a broken body stream.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct TransportError(pub String);

impl TransportError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// A method name outside GET/POST/PUT/DELETE.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unsupported method `{0}`, select one of 'GET', 'POST', 'PUT' and 'DELETE'")]
pub struct UnsupportedMethod(pub String);
