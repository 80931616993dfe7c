mod config;
mod error;
mod fanout;
mod handlers;
mod history;
mod models;
mod rate_limit;
mod registry;
mod service;
mod sse;

use actix_cors::Cors;
use actix_web::{http::Method, web, App, HttpServer};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};
use tracing_actix_web::TracingLogger;

use crate::config::Settings;
use crate::fanout::FanoutHub;
use crate::handlers::{
    capture_handler, capture_handler_base, create_endpoint_handler, get_endpoint_handler,
    health_check_handler, list_endpoints_handler, stream_payloads_handler,
};
use crate::rate_limit::RateLimiter;
use crate::registry::EndpointRegistry;
use crate::service::IngestionService;

/// Application state shared across all handlers
pub struct AppState {
    pub registry: Arc<EndpointRegistry>,
    pub hub: Arc<FanoutHub>,
    pub service: Arc<IngestionService>,
    pub settings: Arc<Settings>,
    pub started_at: Instant,
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file (if exists)
    dotenvy::dotenv().ok();

    // Initialize logging
    init_tracing();

    // Load configuration
    let settings = Settings::load()?;
    let settings = Arc::new(settings);

    info!(
        server_host = %settings.server.host,
        server_port = %settings.server.port,
        endpoint_ceiling = settings.capture.endpoint_ceiling,
        history_capacity = settings.capture.history_capacity,
        "Starting capture server"
    );

    // Build the core: registry, fan-out hub, rate limiter, ingestion service
    let registry = Arc::new(EndpointRegistry::new(
        settings.capture.endpoint_ceiling,
        settings.capture.history_capacity,
    ));
    let hub = Arc::new(FanoutHub::new(settings.capture.sse_buffer_size));
    let limiter = Arc::new(RateLimiter::new(
        settings.capture.rate_limit_max,
        Duration::from_secs(settings.capture.rate_limit_window_seconds),
    ));
    let service = Arc::new(IngestionService::new(
        registry.clone(),
        hub.clone(),
        limiter.clone(),
    ));

    // Create shared application state
    let app_state = web::Data::new(AppState {
        registry: registry.clone(),
        hub: hub.clone(),
        service,
        settings: settings.clone(),
        started_at: Instant::now(),
    });

    // Spawn background task for maintenance (rate window + SSE channel sweeps)
    let maintenance_limiter = limiter.clone();
    let maintenance_hub = hub.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(60)); // Every minute

        loop {
            interval.tick().await;

            let swept_clients = maintenance_limiter.sweep();
            let swept_channels = maintenance_hub.sweep_idle();
            debug!(
                swept_clients,
                swept_channels,
                tracked_clients = maintenance_limiter.tracked_clients(),
                active_channels = maintenance_hub.channel_count(),
                "Maintenance sweep completed"
            );
        }
    });

    // Start HTTP server
    let server_host = settings.server.host.clone();
    let server_port = settings.server.port;
    let cors_origins = settings.server.cors_allowed_origins.clone();

    info!("Binding to {}:{}", server_host, server_port);

    HttpServer::new(move || {
        // Configure CORS
        let cors = build_cors(&cors_origins);

        App::new()
            .app_data(app_state.clone())
            .app_data(web::PayloadConfig::new(settings.server.max_body_size))
            .wrap(TracingLogger::default())
            .wrap(cors)
            // Health check endpoint
            .route("/health", web::get().to(health_check_handler))
            // Endpoint creation and listing
            .service(
                web::resource("/api/endpoints")
                    .route(web::post().to(create_endpoint_handler))
                    .route(web::get().to(list_endpoints_handler)),
            )
            // Endpoint detail with payload history
            .route(
                "/api/endpoints/{endpoint_id}",
                web::get().to(get_endpoint_handler),
            )
            // SSE stream of live captures
            .route(
                "/api/endpoints/{endpoint_id}/stream",
                web::get().to(stream_payloads_handler),
            )
            // Request capture (all HTTP methods) - base path
            .service(
                web::resource("/capture/{endpoint_id}")
                    .route(web::get().to(capture_handler_base))
                    .route(web::post().to(capture_handler_base))
                    .route(web::put().to(capture_handler_base))
                    .route(web::patch().to(capture_handler_base))
                    .route(web::delete().to(capture_handler_base))
                    .route(web::head().to(capture_handler_base))
                    .route(web::method(Method::OPTIONS).to(capture_handler_base)),
            )
            // Catch-all for capture with sub-paths
            .service(
                web::resource("/capture/{endpoint_id}/{tail:.*}")
                    .route(web::get().to(capture_handler))
                    .route(web::post().to(capture_handler))
                    .route(web::put().to(capture_handler))
                    .route(web::patch().to(capture_handler))
                    .route(web::delete().to(capture_handler))
                    .route(web::head().to(capture_handler))
                    .route(web::method(Method::OPTIONS).to(capture_handler)),
            )
    })
    .bind((server_host.as_str(), server_port))
    .map_err(|e| anyhow::anyhow!("Failed to bind to {}:{}: {}", server_host, server_port, e))?
    .workers(num_cpus::get())
    .shutdown_timeout(30)
    .run()
    .await
    .map_err(|e| anyhow::anyhow!("Server error: {}", e))?;

    info!("Server shutting down");
    Ok(())
}

/// Initialize tracing/logging subscriber
fn init_tracing() {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .init();
}

/// Build CORS configuration
fn build_cors(allowed_origins: &str) -> Cors {
    if allowed_origins == "*" {
        Cors::permissive()
    } else {
        let origins: Vec<&str> = allowed_origins.split(',').map(|s| s.trim()).collect();
        let mut cors = Cors::default()
            .allowed_methods(vec!["GET", "POST", "PUT", "PATCH", "DELETE", "HEAD", "OPTIONS"])
            .allowed_headers(vec![
                actix_web::http::header::CONTENT_TYPE,
                actix_web::http::header::AUTHORIZATION,
                actix_web::http::header::ACCEPT,
            ])
            .max_age(3600);

        for origin in origins {
            cors = cors.allowed_origin(origin);
        }

        cors
    }
}
