use actix_cors::Cors;
use actix_web::middleware::from_fn;
use actix_web::{web, App, HttpServer};
use credgate::auth::handlers;
use credgate::config::{CorsConfig, StorageBackend};
use credgate::{health_check, telemetry, AppState, Backend, Settings};
use dotenv::dotenv;
use metrics_exporter_prometheus::PrometheusHandle;
use std::net::TcpListener;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

fn build_cors(config: &CorsConfig) -> Cors {
    if !config.enabled {
        return Cors::default();
    }

    let cors = if config.allow_any_origin {
        Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
    } else {
        Cors::default()
            .allowed_methods(vec!["GET", "POST"])
            .allowed_headers(vec!["Authorization", "Content-Type"])
    };

    cors.max_age(config.max_age as usize)
}

/// Periodic maintenance that runs beside request handling: idle rate-limit
/// bucket eviction, expired code/session purging and exporter upkeep.
fn spawn_sweeper<B: Backend>(state: &AppState<B>, metrics: Option<PrometheusHandle>) {
    let governor = state.governor.clone();
    let auth_service = state.auth_service.clone();
    let interval = Duration::from_secs(state.config.rate_limit.sweep_interval_secs.max(1));

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            governor.evict_idle();

            match auth_service.purge_expired().await {
                Ok(0) => {}
                Ok(n) => info!("Purged {} expired sessions/codes", n),
                Err(e) => error!("Expired entry purge failed: {}", e),
            }

            if let Some(handle) = &metrics {
                handle.run_upkeep();
            }
        }
    });
}

async fn serve<B: Backend>(state: AppState<B>) -> anyhow::Result<()> {
    let config = state.config.clone();

    let metrics = if config.metrics.enabled {
        Some(telemetry::install_prometheus()?)
    } else {
        None
    };
    spawn_sweeper(&state, metrics.clone());

    let listener = TcpListener::bind(format!("{}:{}", config.server.host, config.server.port))?;
    info!("Listening on http://{}:{}", config.server.host, config.server.port);

    let state = web::Data::new(state);
    let cors_config = config.cors.clone();

    HttpServer::new(move || {
        let metrics = metrics.clone();
        App::new()
            .wrap(from_fn(telemetry::track_requests))
            .wrap(build_cors(&cors_config))
            .app_data(state.clone())
            .route("/health", web::get().to(health_check))
            .configure(move |cfg| {
                if let Some(handle) = metrics {
                    cfg.app_data(web::Data::new(handle))
                        .route("/metrics", web::get().to(telemetry::render));
                }
            })
            .configure(handlers::configure::<B>)
    })
    .listen(listener)?
    .workers(config.server.workers as usize)
    .run()
    .await?;

    Ok(())
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();

    FmtSubscriber::builder()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .init();

    let config = Settings::new()?;
    info!("Configuration loaded ({} environment)", config.environment);

    match config.storage.backend {
        StorageBackend::Memory => {
            info!("Using in-memory stores");
            let state = AppState::in_memory(config)?;
            serve(state).await
        }
        StorageBackend::Postgres => {
            info!("Connecting to Postgres");
            let (state, pg) = AppState::connect(config).await?;
            let result = serve(state).await;
            pg.close().await;
            result
        }
    }
}
