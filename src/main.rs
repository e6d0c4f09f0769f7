use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::http::Method;
use clap::Parser;
use readpress::config::{Cli, Command, Config, default_config_dir, default_config_path};
use readpress::db::Database;
use readpress::handler::AppState;
use readpress::readwise::ReadwiseClient;
use readpress::routes::routes;
use readpress::schedule::Scheduler;
use readpress::sync::{self, SyncOptions, Syncer};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();
    let args = Cli::parse();

    // With --config the database lives next to the config file,
    // otherwise both go to ~/.readpress/
    let (config_path, data_dir) = match args.config_path {
        Some(path) => {
            let path = PathBuf::from(path);
            let dir = path
                .parent()
                .map(|p| p.to_path_buf())
                .unwrap_or_else(|| PathBuf::from("."));
            (path, dir)
        }
        None => (default_config_path(), default_config_dir()),
    };

    if let Err(e) = std::fs::create_dir_all(&data_dir) {
        eprintln!("failed to create data directory {:?}: {}", data_dir, e);
        std::process::exit(1);
    }

    tracing_subscriber::fmt()
        .json()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cfg = Config::new(&config_path.to_string_lossy()).unwrap_or_else(|e| {
        tracing::error!(error = %e, path = ?config_path, "failed to load config file");
        std::process::exit(1);
    });
    let db = Arc::new(Database::new(&cfg, &data_dir).await.unwrap_or_else(|e| {
        tracing::error!(error = %e, "failed to setup database");
        std::process::exit(1);
    }));
    let client = ReadwiseClient::new(&cfg.readwise).unwrap_or_else(|e| {
        tracing::error!(error = %e, "failed to setup readwise client");
        std::process::exit(1);
    });
    let syncer = Arc::new(Syncer::new(
        Arc::new(client),
        db.clone(),
        SyncOptions::from(&cfg),
    ));

    match args.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(&cfg, db, syncer).await,
        Command::Sync { fetch_all } => run_sync(&syncer, fetch_all).await,
        Command::Set { key, value } => {
            if let Err(e) = sync::validate_setting(key, &value) {
                eprintln!("{}", e);
                std::process::exit(2);
            }
            if let Err(e) = db.set_setting(key, &value).await {
                tracing::error!(error = %e, key = key.as_str(), "failed to save setting");
                std::process::exit(1);
            }
            tracing::info!(key = key.as_str(), "setting saved");
        }
    }
}

async fn run_sync(syncer: &Syncer, fetch_all: bool) {
    match syncer.run(fetch_all).await {
        Ok(report) => match serde_json::to_string_pretty(&report) {
            Ok(json) => println!("{}", json),
            Err(e) => {
                tracing::error!(error = %e, "failed to encode sync report");
                std::process::exit(1);
            }
        },
        Err(e) => {
            eprintln!("sync failed ({}): {}", e.kind(), readpress::unpack_error(&e));
            std::process::exit(1);
        }
    }
}

async fn serve(cfg: &Config, db: Arc<Database>, syncer: Arc<Syncer>) {
    tracing::info!("readpress.svc starting");

    let address = format!("0.0.0.0:{}", cfg.app.get_port());
    let cancellation_token = CancellationToken::new();

    let scheduler = Scheduler::new(
        syncer.clone(),
        Duration::from_secs(cfg.app.sync_interval_seconds.max(1)),
    );
    scheduler.start(cancellation_token.clone());

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::PUT])
        .allow_headers(Any);

    let app = routes().layer(cors).with_state(AppState { db, syncer });

    let listener = tokio::net::TcpListener::bind(&address).await.unwrap_or_else(|e| {
        tracing::error!(error = %e, "failed to setup tcp listener");
        std::process::exit(1);
    });

    tracing::info!("readpress.svc running on {}", &address);
    let shutdown = cancellation_token.clone();
    let server = axum::serve(listener, app).with_graceful_shutdown(async move {
        if signal::ctrl_c().await.is_ok() {
            tracing::info!("ctrl+c signal received, preparing to shutdown");
        }
        shutdown.cancel();
    });

    if let Err(err) = server.await {
        tracing::error!(error = %err, "server stopped unexpectedly");
        std::process::exit(1);
    }

    tracing::info!("readpress.svc going off, graceful shutdown complete");
}
