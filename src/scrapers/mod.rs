//! Upstream news sources.
//!
//! | Source | Module | Method | Notes |
//! |--------|--------|--------|-------|
//! | NewsData.io | [`newsdata`] | JSON API | Requires `NEWSDATA_API_KEY`; cursor pagination |
//! | Catalog feeds | [`rss`] | RSS 2.0 / Atom | Feed list from the catalog file |
//!
//! Both hand raw records to [`crate::normalize`]; neither knows about the
//! canonical schema.

pub mod newsdata;
pub mod rss;

use reqwest::Client;
use std::time::Duration;

/// Sent with every outbound request.
pub const USER_AGENT: &str = concat!(
    "newswire_snapshot/",
    env!("CARGO_PKG_VERSION"),
    " (+https://github.com)"
);

/// Shared HTTP client with an explicit per-request timeout.
pub fn http_client(timeout: Duration) -> reqwest::Result<Client> {
    Client::builder()
        .timeout(timeout)
        .connect_timeout(timeout.min(Duration::from_secs(10)))
        .user_agent(USER_AGENT)
        .build()
}
