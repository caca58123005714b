use std::{net::SocketAddr, path::PathBuf, sync::Arc, time::Duration};

use anyhow::Context;
use tokio::signal;
use tracing::info;

use scholar_endpoint::{api, service, Config, EndpointSelector};

const DEFAULT_CONFIG_PATH: &str = "/etc/scholar-endpoint/config.toml";
const DEFAULT_LOG_FILTER: &str = "scholar_endpoint=info,tower_http=warn";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_path = std::env::var("SCHOLAR_ENDPOINT_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH));

    let config = Config::load_or_builtin(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;

    // RUST_LOG wins over the config file's log_level.
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        config
            .service
            .log_level
            .as_deref()
            .unwrap_or(DEFAULT_LOG_FILTER)
            .into()
    });
    tracing_subscriber::fmt().with_env_filter(filter).init();

    if !config_path.exists() {
        info!(path = %config_path.display(), "no config file — using built-in endpoints");
    }

    let selector = Arc::new(EndpointSelector::from_config(&config)?);

    // One-shot mode: probe, print the report, exit.
    if std::env::args().nth(1).as_deref() == Some("--once") {
        let selection = selector.select_with_report().await;
        println!("{}", serde_json::to_string_pretty(&*selection)?);
        return Ok(());
    }

    info!(
        admin_port = config.service.admin_port,
        candidates = ?selector.candidate_names(),
        "scholar-endpoint starting"
    );

    selector.select_best_endpoint().await;

    let reselect_every = config
        .service
        .reselect_interval_secs
        .filter(|&secs| secs > 0)
        .map(Duration::from_secs);
    let addr: SocketAddr = format!("0.0.0.0:{}", config.service.admin_port).parse()?;

    let state = Arc::new(service::ServiceState::new(
        Arc::new(config),
        config_path,
        Arc::clone(&selector),
    ));

    if let Some(every) = reselect_every {
        info!(interval_secs = every.as_secs(), "periodic re-selection enabled");
        tokio::spawn(service::reselect_loop(Arc::clone(&state), every));
    }
    tokio::spawn(service::config_watcher(Arc::clone(&state)));

    let app = api::router(Arc::clone(&state)).layer(
        tower_http::trace::TraceLayer::new_for_http()
            .make_span_with(tower_http::trace::DefaultMakeSpan::new().level(tracing::Level::INFO))
            .on_response(tower_http::trace::DefaultOnResponse::new().level(tracing::Level::INFO)),
    );

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    info!(%addr, "status API listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("status API server error")?;

    info!("shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("shutdown signal received");
}
