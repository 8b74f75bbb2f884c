//! Kisan+ gateway
//!
//! Local sidecar that stands in for the app's API module:
//! 1. Holds the session credentials (JSON file, 0600)
//! 2. Forwards app requests to the Kisan+ backend with a bearer credential
//! 3. Refreshes an expired access credential once, however many requests
//!    hit the expiry, and replays them
//! 4. Signals a login redirect when the session cannot be recovered

mod config;
mod error;
mod metrics;
mod proxy;
mod service;
mod session;

use std::sync::Arc;
use std::sync::atomic::Ordering;

use anyhow::{Context, Result};
use axum::Router;
use axum::extract::{DefaultBodyLimit, State};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use kisan_auth::{FileTokenStore, TokenStore};
use kisan_client::{AuthenticatedHttpClient, ClientConfig, LoginRedirect};
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use transport::ReqwestTransport;

use crate::config::Config;
use crate::proxy::ProxyState;
use crate::service::{
    DRAIN_TIMEOUT, ServiceAction, ServiceEvent, ServiceMetrics, ServiceState, handle_event,
};
use crate::session::SessionState;

/// Shared application state accessible from all handlers
#[derive(Clone)]
struct AppState {
    proxy: ProxyState,
    metrics: ServiceMetrics,
    prometheus: PrometheusHandle,
}

/// Build the axum router with all routes and shared state.
///
/// The concurrency and body limits cover every route, session management
/// included.
fn build_router(state: AppState, max_connections: usize) -> Router {
    let session = SessionState::new(
        state.proxy.client.token_store().clone(),
        state.proxy.redirect.clone(),
    );
    Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .fallback(proxy_handler)
        .with_state(state)
        .merge(session::build_session_router(session))
        .layer(DefaultBodyLimit::max(proxy::MAX_BODY_BYTES))
        .layer(tower::limit::ConcurrencyLimitLayer::new(max_connections))
}

/// Wire the transport, session store and login redirect into a client.
async fn build_client(
    config: &Config,
) -> error::Result<(Arc<AuthenticatedHttpClient>, Arc<LoginRedirect>)> {
    let http = reqwest::Client::builder()
        .build()
        .map_err(|e| error::Error::HttpClient(e.to_string()))?;
    let transport = ReqwestTransport::new(http).with_timeout(config.backend.timeout());

    let store: Arc<dyn TokenStore> =
        Arc::new(FileTokenStore::load(config.session.credentials_path.clone()).await?);
    let redirect = Arc::new(LoginRedirect::new(config.session.login_path.clone()));

    let mut client_config = ClientConfig::new(config.backend.api_base.clone())
        .with_auth_base(config.backend.auth_base());
    if let Some(limit) = config.backend.refresh_wait_timeout() {
        client_config = client_config.with_refresh_wait_timeout(limit);
    }

    let client = AuthenticatedHttpClient::new(
        Arc::new(transport),
        store,
        redirect.clone(),
        client_config,
    );
    Ok((Arc::new(client), redirect))
}

#[tokio::main]
async fn main() -> Result<()> {
    // JSON logs, filter from LOG_LEVEL then RUST_LOG
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_env("LOG_LEVEL")
                .or_else(|_| EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("starting kisan-gateway");

    // Install before anything records
    let prometheus_handle =
        metrics::install_recorder().context("failed to install Prometheus recorder")?;

    let mut state = ServiceState::Initializing;

    let args: Vec<String> = std::env::args().collect();
    let cli_config_path = args
        .iter()
        .position(|a| a == "--config")
        .and_then(|i| args.get(i + 1))
        .map(|s| s.as_str());

    let config_path = Config::resolve_path(cli_config_path);
    info!(path = %config_path.display(), "loading configuration");

    let config = Config::load(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;

    info!(
        listen_addr = %config.gateway.listen_addr,
        api_base = %config.backend.api_base,
        auth_base = %config.backend.auth_base(),
        credentials = %config.session.credentials_path.display(),
        "configuration loaded"
    );

    // Initializing -> Starting
    let (new_state, action) = handle_event(
        state,
        ServiceEvent::ConfigLoaded {
            listen_addr: config.gateway.listen_addr,
        },
    );
    state = new_state;
    let listen_addr = match action {
        ServiceAction::StartListener { addr } => addr,
        _ => anyhow::bail!("unexpected action after ConfigLoaded: {action:?}"),
    };

    let (client, redirect) = match build_client(&config).await {
        Ok(parts) => parts,
        Err(e) => {
            let _ = handle_event(state, ServiceEvent::StartupFailed(e.to_string()));
            return Err(e).context("failed to initialize the backend client");
        }
    };

    let metrics = ServiceMetrics::new();
    let app_state = AppState {
        proxy: ProxyState {
            client,
            redirect,
            requests_total: metrics.requests_total.clone(),
            errors_total: metrics.errors_total.clone(),
            in_flight: metrics.in_flight.clone(),
        },
        metrics: metrics.clone(),
        prometheus: prometheus_handle,
    };
    let app = build_router(app_state, config.gateway.max_connections);

    let listener = match TcpListener::bind(listen_addr).await {
        Ok(l) => l,
        Err(e) => {
            let _ = handle_event(state, ServiceEvent::StartupFailed(e.to_string()));
            return Err(e).with_context(|| format!("failed to bind to {listen_addr}"));
        }
    };

    // Starting -> Running
    let (new_state, _) = handle_event(state, ServiceEvent::ListenerReady);
    state = new_state;
    info!(addr = %listen_addr, "state: Running, accepting requests");

    // The drain deadline starts at signal receipt: the server is told to stop
    // accepting, then raced against DRAIN_TIMEOUT.
    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
    let server_handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            })
            .await
    });

    shutdown_signal().await;

    // Running -> Draining
    let (new_state, action) = handle_event(state, ServiceEvent::ShutdownSignal);
    state = new_state;
    info!(?action, "state: Draining");
    let _ = shutdown_tx.send(());

    let event = match tokio::time::timeout(DRAIN_TIMEOUT, server_handle).await {
        Ok(Ok(Ok(()))) => {
            info!("all in-flight requests drained");
            ServiceEvent::Drained
        }
        Ok(Ok(Err(e))) => {
            error!(error = %e, "server error during shutdown");
            ServiceEvent::Drained
        }
        Ok(Err(e)) => {
            error!(error = %e, "server task panicked");
            ServiceEvent::Drained
        }
        Err(_) => {
            warn!(
                remaining = metrics.in_flight.load(Ordering::Relaxed),
                drain_timeout_secs = DRAIN_TIMEOUT.as_secs(),
                "drain timeout exceeded, forcing shutdown"
            );
            ServiceEvent::DrainTimeout
        }
    };

    // Draining -> Stopped
    let (_state, action) = handle_event(state, event);
    info!(?action, "shutdown complete");
    Ok(())
}

/// Health endpoint: process counters plus session and refresh state.
async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let client = &state.proxy.client;
    let refresh = client.refresh_status();
    let store = client.token_store();
    let body = serde_json::json!({
        "status": "healthy",
        "uptime_seconds": state.metrics.started_at.elapsed().as_secs(),
        "requests_served": state.metrics.requests_total.load(Ordering::Relaxed),
        "errors_total": state.metrics.errors_total.load(Ordering::Relaxed),
        "auth": {
            "refresh": refresh.label(),
            "waiters": refresh.waiters,
            "authenticated": store.access().await.is_some(),
            "reauth_required": state.proxy.redirect.is_required(),
            "reauth_signals": state.proxy.redirect.signal_count(),
        },
    });

    (
        axum::http::StatusCode::OK,
        [(axum::http::header::CONTENT_TYPE, "application/json")],
        body.to_string(),
    )
}

/// Prometheus metrics endpoint in text exposition format.
async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    (
        axum::http::StatusCode::OK,
        [(
            axum::http::header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )],
        state.prometheus.render(),
    )
}

/// Catch-all handler that forwards everything else to the backend.
async fn proxy_handler(
    State(state): State<AppState>,
    request: axum::http::Request<axum::body::Body>,
) -> Response {
    let request_id = format!("req_{}", uuid::Uuid::new_v4().as_simple());
    proxy::proxy_request(&state.proxy, request, request_id).await
}

/// Wait for SIGTERM or SIGINT for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}
