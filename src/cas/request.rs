//! Incoming request view handed to the strategy by the host.

use std::collections::HashMap;

/// Query parameter carrying the service ticket.
pub const TICKET_PARAM: &str = "ticket";

/// The parts of an incoming HTTP request the CAS flow needs.
#[derive(Debug, Clone, Default)]
pub struct CasRequest {
    /// Request path without the query string.
    pub path: String,
    /// Decoded query parameters. On repeated keys the first value wins.
    pub query: HashMap<String, String>,
    /// Request headers, as delivered by the host.
    pub headers: HashMap<String, Vec<String>>,
}

impl CasRequest {
    /// Build a request from a path-and-query URI such as `/cas?ticket=ST-1`.
    pub fn from_uri(uri: &str) -> Self {
        let (path, query_str) = match uri.split_once('?') {
            Some((path, query)) => (path, query),
            None => (uri, ""),
        };

        let mut query = HashMap::new();
        for pair in query_str.split('&').filter(|p| !p.is_empty()) {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            let key = decode_component(key);
            let value = decode_component(value);
            query.entry(key).or_insert(value);
        }

        Self {
            path: path.to_string(),
            query,
            headers: HashMap::new(),
        }
    }

    /// Attach a header value.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.entry(name.into()).or_default().push(value.into());
        self
    }

    /// First value of a header (case-insensitive).
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .and_then(|(_, v)| v.first())
            .map(|s| s.as_str())
    }

    /// The service ticket, if one was sent and it is not empty.
    pub fn ticket(&self) -> Option<&str> {
        self.query
            .get(TICKET_PARAM)
            .map(|t| t.as_str())
            .filter(|t| !t.is_empty())
    }
}

fn decode_component(raw: &str) -> String {
    let spaced = raw.replace('+', " ");
    urlencoding::decode(&spaced)
        .map(|s| s.into_owned())
        .unwrap_or_else(|_| spaced.clone())
}
