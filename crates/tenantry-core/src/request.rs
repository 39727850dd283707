//! Framework-neutral view of an inbound request
//!
//! Identification only needs the hostname, the URL and the header/query
//! maps. The host server builds a [`RequestInfo`] from its own request type.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RequestInfo {
    /// Hostname without port
    pub hostname: Option<String>,

    /// Request target (path plus optional query string)
    pub url: Option<String>,

    /// Header map; `None` means the host supplied no headers object at all
    pub headers: Option<HashMap<String, String>>,

    /// Decoded query parameters
    #[serde(default)]
    pub query: HashMap<String, String>,
}

impl RequestInfo {
    /// Create an empty request with an (empty) header map
    pub fn new() -> Self {
        Self {
            hostname: None,
            url: None,
            headers: Some(HashMap::new()),
            query: HashMap::new(),
        }
    }

    /// Set the hostname, stripping any `:port` suffix
    pub fn with_hostname(mut self, hostname: impl Into<String>) -> Self {
        let hostname = hostname.into();
        let host = match hostname.rsplit_once(':') {
            Some((host, port)) if port.chars().all(|c| c.is_ascii_digit()) => host.to_string(),
            _ => hostname,
        };
        self.hostname = Some(host);
        self
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers
            .get_or_insert_with(HashMap::new)
            .insert(name.into(), value.into());
        self
    }

    pub fn with_query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.insert(name.into(), value.into());
        self
    }

    /// Drop the header map entirely
    pub fn without_headers(mut self) -> Self {
        self.headers = None;
        self
    }

    /// URL path with the query string stripped
    pub fn path(&self) -> Option<&str> {
        self.url
            .as_deref()
            .map(|url| url.split_once('?').map_or(url, |(path, _)| path))
    }

    /// Case-insensitive header lookup; `None` if the header map itself is missing
    pub fn header(&self, name: &str) -> Option<Option<&str>> {
        self.headers.as_ref().map(|headers| {
            headers
                .iter()
                .find(|(key, _)| key.eq_ignore_ascii_case(name))
                .map(|(_, value)| value.as_str())
        })
    }

    /// Query parameter lookup
    pub fn query_param(&self, name: &str) -> Option<&str> {
        self.query.get(name).map(|s| s.as_str())
    }
}
