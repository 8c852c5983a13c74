use std::net::SocketAddr;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use axum::body::Body;
use axum::response::IntoResponse;
use axum::{routing::get, Router};
use http::HeaderValue;
use tower_governor::governor::GovernorConfigBuilder;
use tower_governor::key_extractor::SmartIpKeyExtractor;
use tower_governor::{GovernorError, GovernorLayer};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod config;
mod db;
mod error;
mod middleware;
mod routes;
mod services;

use config::Config;
use error::AppError;
use services::{feed::EventFeed, init};

pub struct AppState {
    pub db: sqlx::SqlitePool,
    pub config: Config,
    pub feed: EventFeed,
}

/// All routes and per-request middleware. `auth` is mounted at `/api/auth` so
/// the caller decides whether it is rate limited.
fn build_router(state: Arc<AppState>, auth: Router<Arc<AppState>>) -> Router {
    Router::new()
        .route("/health", get(routes::health::health_check))
        .nest("/api/auth", auth)
        .nest("/api/settings", routes::settings::router())
        .nest("/api/events", routes::events::router())
        .nest("/api/import", routes::import::router())
        .nest("/api/calendar", routes::calendar::router())
        .with_state(state)
        .layer(axum::middleware::from_fn(
            middleware::csp::security_headers,
        ))
        .layer(TraceLayer::new_for_http())
}

#[cfg(test)]
pub(crate) fn router(state: Arc<AppState>) -> Router {
    build_router(state, routes::auth::router())
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "team_calendar=debug,tower_http=debug".into());
    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

/// Response for requests rejected by the auth rate limiter, in the `AppError` shape.
fn rate_limit_response(error: GovernorError) -> http::Response<Body> {
    let (error, headers) = match error {
        GovernorError::TooManyRequests { wait_time, headers } => (
            AppError::RateLimited {
                retry_after_seconds: wait_time,
            },
            headers,
        ),
        GovernorError::UnableToExtractKey => (
            AppError::BadRequest("Unable to determine client IP for rate limiting".to_string()),
            None,
        ),
        GovernorError::Other { code, msg, headers } => (
            AppError::Internal(anyhow::anyhow!(
                "Rate limiting error ({}): {}",
                code,
                msg.unwrap_or_default()
            )),
            headers,
        ),
    };

    let mut resp = error.into_response();
    if let Some(hmap) = headers {
        for (name, value) in hmap.iter() {
            resp.headers_mut().append(name.clone(), value.clone());
        }
    }
    resp
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = ctrl_c => {},
                    _ = term.recv() => {},
                }
            }
            Err(e) => {
                tracing::warn!("Failed to bind SIGTERM, waiting for Ctrl+C only: {}", e);
                let _ = ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = ctrl_c.await;
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let config = Config::from_env()?;

    tracing::info!(
        "Starting team calendar (time zone {})",
        config.calendar.timezone.name()
    );

    let pool = init::init_db(&config).await?;

    let app_state = Arc::new(AppState {
        db: pool,
        config: config.clone(),
        feed: EventFeed::new(),
    });

    let thread_shutdown = Arc::new(AtomicBool::new(false));

    // Auth rate limiter; rejected requests get a 429 with Retry-After.
    let mut auth_builder = GovernorConfigBuilder::default().key_extractor(SmartIpKeyExtractor);
    auth_builder
        .per_second(config.rate_limit.auth_per_second.into())
        .burst_size(config.rate_limit.auth_burst)
        .error_handler(rate_limit_response);
    let auth_gov_conf = Arc::new(
        auth_builder
            .finish()
            .ok_or_else(|| anyhow::anyhow!("Failed to build auth governor config"))?,
    );

    // Background cleanup for auth limiter storage
    let auth_cleaner = {
        let limiter = auth_gov_conf.limiter().clone();
        let interval = Duration::from_secs(60);
        let flag = thread_shutdown.clone();
        std::thread::spawn(move || {
            // Small sleep granularity so shutdown is quick.
            let tick = Duration::from_secs(1);
            loop {
                for _ in 0..interval.as_secs() {
                    if flag.load(Ordering::SeqCst) {
                        tracing::info!("Auth rate limiter cleanup thread exiting");
                        return;
                    }
                    std::thread::sleep(tick);
                }
                tracing::debug!("auth rate limiter size: {}", limiter.len());
                limiter.retain_recent();
            }
        })
    };

    let auth_rate_layer = GovernorLayer {
        config: auth_gov_conf.clone(),
    };

    let frontend_origin = config
        .server
        .frontend_url
        .parse::<HeaderValue>()
        .map_err(|e| anyhow::anyhow!("Invalid FRONTEND_URL for CORS: {}", e))?;

    let app = build_router(
        app_state.clone(),
        routes::auth::router().layer(auth_rate_layer),
    )
    .layer(
        CorsLayer::new()
            .allow_origin(frontend_origin)
            .allow_methods([
                http::Method::GET,
                http::Method::POST,
                http::Method::DELETE,
                http::Method::OPTIONS,
                http::Method::PATCH,
            ])
            .allow_headers([
                http::header::CONTENT_TYPE,
                http::header::AUTHORIZATION,
                http::header::ACCEPT,
            ])
            .allow_credentials(true),
    );

    let addr = format!("{}:{}", config.server.host, config.server.port);
    tracing::info!("Server listening on {}", addr);

    // Event streams never finish on their own, so on a signal the server future
    // is dropped instead of drained.
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let server_fut = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    );

    tokio::select! {
        res = server_fut => {
            if let Err(e) = res {
                tracing::error!("Server error: {}", e);
            }
        }
        _ = shutdown_signal() => {
            tracing::info!("Shutdown signal received, no longer accepting connections");
        }
    }

    thread_shutdown.store(true, Ordering::SeqCst);
    if let Err(e) = auth_cleaner.join() {
        tracing::warn!("Auth cleanup thread join failed: {:?}", e);
    }

    app_state.db.close().await;
    tracing::info!("Shutdown complete");
    Ok(())
}
