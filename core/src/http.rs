//! HTTP transport types for the FIWARE APIs.
//!
//! # Design
//! Requests and responses are plain data. `TransportClient` assembles an
//! `HttpRequest` (defaults merged, payload serialized) and hands it to an
//! `HttpBackend`, which performs the round-trip and returns an
//! `HttpResponse`. Keeping the assembled request as a value makes the header
//! and payload rules testable without a network.
//!
//! Headers are an ordered list of pairs rather than a map: the order the
//! platform sees is the order they were merged in, and the merge rule is a
//! pure function over two lists.

use std::fmt;
use std::str::FromStr;

use crate::error::UnsupportedMethod;

/// Ordered list of header (or query parameter) name/value pairs.
pub type Headers = Vec<(String, String)>;

/// HTTP method for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Delete,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Delete => "DELETE",
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Method names are matched exactly: `"get"` is not a method.
impl FromStr for HttpMethod {
    type Err = UnsupportedMethod;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "GET" => Ok(HttpMethod::Get),
            "POST" => Ok(HttpMethod::Post),
            "PUT" => Ok(HttpMethod::Put),
            "DELETE" => Ok(HttpMethod::Delete),
            other => Err(UnsupportedMethod(other.to_string())),
        }
    }
}

/// Merge `overrides` on top of `defaults`.
///
/// Names compare case-insensitively. An override replaces the default value
/// in place, keeping the default's position; overrides with new names are
/// appended in their own order. When `overrides` repeats a name the last
/// occurrence wins.
pub fn merge_headers(defaults: &[(String, String)], overrides: &[(String, String)]) -> Headers {
    let mut merged: Headers = defaults.to_vec();
    for (name, value) in overrides {
        match merged
            .iter_mut()
            .find(|(existing, _)| existing.eq_ignore_ascii_case(name))
        {
            Some(slot) => slot.1 = value.clone(),
            None => merged.push((name.clone(), value.clone())),
        }
    }
    merged
}

/// Look up a header value by case-insensitive name.
pub fn header_value<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(name))
        .map(|(_, value)| value.as_str())
}

/// An HTTP request described as plain data.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub url: String,
    pub query: Vec<(String, String)>,
    pub headers: Headers,
    pub body: Option<String>,
}

impl HttpRequest {
    /// Rebuild the query string (`a=1&b=2`) for logging.
    ///
    /// Values are not percent-encoded here; the backend encodes them on the
    /// wire.
    pub fn query_string(&self) -> String {
        self.query
            .iter()
            .map(|(key, value)| format!("{key}={value}"))
            .collect::<Vec<_>>()
            .join("&")
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        header_value(&self.headers, name)
    }
}

/// An HTTP response described as plain data, as returned by a backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: Headers,
    pub body: String,
}
