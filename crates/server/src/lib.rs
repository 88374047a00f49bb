//! HTTP server hosting the conversation endpoints.

mod error;
pub mod logger;

use std::{net::SocketAddr, time::Duration};

use axum::{Json, Router, response::IntoResponse, routing::get};
use axum_server::{Handle, tls_rustls::RustlsConfig};
use config::Config;
use serde_json::json;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

pub use error::Error;

pub(crate) type Result<T> = std::result::Result<T, error::Error>;

/// How long in-flight responses may keep streaming after shutdown was requested.
const GRACEFUL_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

pub struct ServeConfig {
    pub listen_address: SocketAddr,
    pub config: Config,
    /// Cancel to stop accepting connections and drain the open ones.
    pub shutdown_signal: CancellationToken,
}

pub async fn serve(
    ServeConfig {
        listen_address,
        config,
        shutdown_signal,
    }: ServeConfig,
) -> crate::Result<()> {
    let mut app = chat::router(&config).await.map_err(error::Error::Router)?;

    if config.server.health.enabled {
        app = app.merge(Router::new().route(&config.server.health.path, get(health)));
    }

    let listener = TcpListener::bind(listen_address).await.map_err(error::Error::Bind)?;

    match &config.server.tls {
        Some(tls_config) => {
            // Fails when a provider is already installed.
            let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();

            let rustls_config = RustlsConfig::from_pem_file(&tls_config.certificate, &tls_config.key)
                .await
                .map_err(|e| error::Error::Tls(e.to_string()))?;

            log::info!("Conversation endpoint available at: https://{listen_address}/conversation");

            // axum-server accepts only std listeners
            let std_listener = listener.into_std().map_err(error::Error::Bind)?;

            let handle = Handle::new();

            tokio::spawn({
                let handle = handle.clone();

                async move {
                    shutdown_signal.cancelled().await;
                    handle.graceful_shutdown(Some(GRACEFUL_SHUTDOWN_TIMEOUT));
                }
            });

            axum_server::from_tcp_rustls(std_listener, rustls_config)
                .handle(handle)
                .serve(app.into_make_service())
                .await
                .map_err(|e| error::Error::Server(std::io::Error::other(e)))?;
        }
        None => {
            log::info!("Conversation endpoint available at: http://{listen_address}/conversation");

            axum::serve(listener, app)
                .with_graceful_shutdown(shutdown_signal.cancelled_owned())
                .await
                .map_err(error::Error::Server)?;
        }
    }

    log::info!("Server stopped");

    Ok(())
}

async fn health() -> impl IntoResponse {
    Json(json!({ "status": "healthy" }))
}
