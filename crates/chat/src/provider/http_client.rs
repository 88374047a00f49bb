use std::time::Duration;

use axum::http;
use reqwest::Client;

/// Client settings shared by the provider and the function host.
pub(crate) fn default_http_client_builder(mut headers: http::HeaderMap) -> reqwest::ClientBuilder {
    headers.insert(http::header::CONNECTION, http::HeaderValue::from_static("keep-alive"));

    Client::builder()
        .timeout(Duration::from_secs(60))
        // The pool has no connection TTL. A short idle timeout is what makes us pick up
        // DNS changes of the provider endpoint.
        .pool_idle_timeout(Some(Duration::from_secs(5)))
        .tcp_nodelay(true)
        .tcp_keepalive(Some(Duration::from_secs(60)))
        .default_headers(headers)
}
