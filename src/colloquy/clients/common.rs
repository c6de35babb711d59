//! Plumbing shared by the provider clients.
//!
//! A single `reqwest::Client` is kept for the whole process so that HTTP connections, DNS
//! lookups and TLS sessions are reused across turns:
//! - `pool_idle_timeout`: keeps idle connections alive for 90 seconds
//! - `pool_max_idle_per_host`: allows up to 10 idle connections per host
//! - `tcp_keepalive`: sends keepalive packets every 60 seconds
//!
//! No overall request timeout is set because a streamed completion legitimately stays open
//! for as long as the model keeps producing tokens.

use lazy_static::lazy_static;
use std::error::Error;
use std::fmt;
use std::time::Duration;

lazy_static! {
    static ref SHARED_HTTP_CLIENT: reqwest::Client = reqwest::ClientBuilder::new()
        .pool_idle_timeout(Some(Duration::from_secs(90)))
        .pool_max_idle_per_host(10)
        .tcp_keepalive(Some(Duration::from_secs(60)))
        .connect_timeout(Duration::from_secs(10))
        .build()
        .unwrap_or_else(|err| {
            log::error!(
                "colloquy::clients::common: falling back to default HTTP client: {}",
                err
            );
            reqwest::Client::new()
        });
}

/// Process-wide HTTP client used by every provider and by the HTTP transport.
pub fn get_shared_http_client() -> &'static reqwest::Client {
    &SHARED_HTTP_CLIENT
}

/// Error raised while opening or consuming a provider stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamError(pub String);

impl fmt::Display for StreamError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Error for StreamError {}

/// Join a base URL and a path without doubling or dropping the slash.
pub fn join_url(base_url: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base_url.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_url() {
        assert_eq!(
            join_url("https://api.anthropic.com/v1/", "/messages"),
            "https://api.anthropic.com/v1/messages"
        );
        assert_eq!(join_url("http://localhost:9000", "v1/messages"), "http://localhost:9000/v1/messages");
    }
}
