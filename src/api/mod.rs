use crate::{
    api::handlers::health,
    auth::{self, AuthConfig, AuthState, RateLimitConfig, ledger, rate_limit},
    cli::telemetry,
    store::PgStore,
};
use anyhow::{Context, Result};
use axum::{
    Extension, Router,
    body::Body,
    extract::MatchedPath,
    http::{HeaderName, HeaderValue, Request},
    middleware::from_fn,
    routing::options,
};
use secrecy::SecretString;
use sqlx::postgres::PgPoolOptions;
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{
    request_id::PropagateRequestIdLayer, set_header::SetRequestHeaderLayer, trace::TraceLayer,
};
use tracing::{Span, info, info_span, warn};
use ulid::Ulid;
use utoipa_axum::router::OpenApiRouter;

pub mod handlers;
mod openapi;

pub use openapi::openapi;

/// Build the API router with all documented routes registered.
#[must_use]
pub fn router() -> OpenApiRouter {
    openapi::api_router()
}

/// Full application: documented routes, rate limiting, tracing and request ids.
#[must_use]
pub fn app(state: Arc<AuthState>) -> Router {
    let (router, _openapi) = router().split_for_parts();
    router
        .route("/health", options(health::health))
        .layer(from_fn(rate_limit::enforce))
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestHeaderLayer::if_not_present(
                    HeaderName::from_static("x-request-id"),
                    |_req: &_| HeaderValue::from_str(Ulid::new().to_string().as_str()).ok(),
                ))
                .layer(PropagateRequestIdLayer::new(HeaderName::from_static(
                    "x-request-id",
                )))
                .layer(TraceLayer::new_for_http().make_span_with(make_span))
                .layer(Extension(state)),
        )
}

/// Start the server
/// # Errors
/// Return error if failed to start the server
pub async fn new(
    port: u16,
    dsn: String,
    jwt_secret: SecretString,
    auth_config: AuthConfig,
    rate_limit_config: RateLimitConfig,
) -> Result<()> {
    let pool = PgPoolOptions::new()
        .min_connections(1)
        .max_connections(5)
        .max_lifetime(Duration::from_secs(60 * 2))
        .test_before_acquire(true)
        .connect(&dsn)
        .await
        .context("Failed to connect to database")?;

    let store = Arc::new(PgStore::new(pool));
    let state = Arc::new(
        AuthState::build(
            auth_config,
            rate_limit_config,
            jwt_secret,
            store.clone(),
            store,
        )
        .context("Invalid token signing configuration")?,
    );

    if let Some(email) = state.config().seed_admin_email() {
        seed_admin(&state, email).await?;
    }

    // Background sweeps: expired/revoked refresh tokens and idle limiter buckets.
    let ledger_sweeper = ledger::spawn_sweeper(
        state.authenticator().ledger(),
        state.config().refresh_sweep_interval(),
    );
    let limiter_sweeper = rate_limit::spawn_sweeper(
        state.rate_limiter_handle(),
        state.rate_limit_config().sweep_interval(),
    );

    let app = app(state);

    let listener = TcpListener::bind(format!("::0:{port}")).await?;

    info!("Listening on [::]:{}", port);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for shutdown signal: {err}");
        }
        info!("Gracefully shutdown");
    })
    .await?;

    ledger_sweeper.abort();
    limiter_sweeper.abort();
    telemetry::shutdown_tracer();

    Ok(())
}

async fn seed_admin(state: &AuthState, email: &str) -> Result<()> {
    match state.authenticator().seed_admin(email).await {
        Ok(Some(password)) => {
            warn!(
                email,
                password = %password,
                "Seeded admin account; store this password now, it is not shown again"
            );
            Ok(())
        }
        Ok(None) => Ok(()),
        Err(auth::AuthError::InvalidRequest(reason)) => Err(anyhow::anyhow!(reason)),
        Err(err) => Err(anyhow::anyhow!("Failed to seed admin account: {err}")),
    }
}

fn make_span(request: &Request<Body>) -> Span {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|val| val.to_str().ok())
        .unwrap_or("none");
    let matched_path = request
        .extensions()
        .get::<MatchedPath>()
        .map_or_else(|| request.uri().path(), MatchedPath::as_str);

    info_span!(
        "http.request",
        http.method = %request.method(),
        http.route = matched_path,
        request_id
    )
}
