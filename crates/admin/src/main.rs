//! Starboard privileged backend.
//!
//! Serves the account-moderation API and the read-only plan catalogue.
//!
//! # Security
//!
//! **This binary holds write access to every tenant account.**
//!
//! - Each moderation request carries an ID token; its signature, expiry and
//!   `admin` claim are verified on every call
//! - Admin accounts and the caller's own account cannot be disabled
//!
//! Migrations are not run on startup; use `sb-cli migrate`.

#![cfg_attr(not(test), forbid(unsafe_code))]

use std::borrow::Cow;
use std::sync::Arc;

use sentry::integrations::tracing::{self as sentry_tracing, EventFilter};
use tokio::net::TcpListener;
use tracing::{Level, Metadata, info};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use starboard_admin::config::{AdminConfig, SentryConfig};
use starboard_admin::db::{self, PgUserDirectory};
use starboard_admin::identity::TokenKeys;
use starboard_admin::routes;
use starboard_admin::state::AppState;

const DEFAULT_LOG_FILTER: &str = "starboard_admin=info,tower_http=debug";

#[tokio::main]
async fn main() {
    let config = AdminConfig::from_env().expect("Failed to load configuration");

    // Sentry must be up before the subscriber so its layer sees events.
    let _sentry = config.sentry.as_ref().map(init_sentry);
    init_tracing();

    let pool = db::create_pool(&config.database_url)
        .await
        .expect("Failed to create database pool");
    let state = AppState::new(
        Arc::new(PgUserDirectory::new(pool)),
        TokenKeys::new(&config.tokens),
    );

    let app = routes::app(state)
        .layer(sentry_tower::NewSentryLayer::new_from_top())
        .layer(sentry_tower::SentryHttpLayer::new().enable_transaction());

    let addr = config.socket_addr();
    let listener = TcpListener::bind(addr)
        .await
        .expect("Failed to bind to address");
    info!(%addr, "privileged backend listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Server error");
}

fn init_sentry(config: &SentryConfig) -> sentry::ClientInitGuard {
    sentry::init((
        config.dsn.as_str(),
        sentry::ClientOptions {
            release: sentry::release_name!(),
            environment: config.environment.clone().map(Cow::Owned),
            sample_rate: config.sample_rate,
            traces_sample_rate: config.traces_sample_rate,
            attach_stacktrace: true,
            ..Default::default()
        },
    ))
}

/// JSON logs on Fly (`FLY_APP_NAME` set), human-readable text elsewhere.
fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| DEFAULT_LOG_FILTER.into());
    let hosted = std::env::var_os("FLY_APP_NAME").is_some();

    tracing_subscriber::registry()
        .with(filter)
        .with(hosted.then(|| tracing_subscriber::fmt::layer().json().flatten_event(true)))
        .with((!hosted).then(tracing_subscriber::fmt::layer))
        .with(sentry_tracing::layer().event_filter(sentry_filter))
        .init();
}

/// Warnings and errors become Sentry events; info and debug ride along as
/// breadcrumbs.
fn sentry_filter(metadata: &Metadata<'_>) -> EventFilter {
    match *metadata.level() {
        Level::ERROR | Level::WARN => EventFilter::Event,
        Level::INFO | Level::DEBUG => EventFilter::Breadcrumb,
        _ => EventFilter::Ignore,
    }
}

/// Resolves on Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
    info!("shutdown signal received; draining connections");
}
