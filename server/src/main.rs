//! FileSense binary — thin CLI shell and HTTP server over the
//! [`filesense_core`] engine.

mod api;
mod config;
mod embed;
mod extract;

use anyhow::Context;
use axum::{
    routing::{get, post},
    Router,
};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use filesense_core::{CancelToken, Engine};

// ---------------------------------------------------------------------------
// CLI definition (clap derive)
// ---------------------------------------------------------------------------

/// Local file recommendation engine: ranks "what file next" from semantic,
/// recency, and co-access signals, fully offline.
#[derive(Parser)]
#[command(name = "filesense", version, about, long_about = None)]
struct Cli {
    /// Path to the YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// Override the listen port from the config
    #[arg(long)]
    port: Option<u16>,

    /// Bind to 0.0.0.0 instead of 127.0.0.1 (localhost)
    #[arg(long)]
    bind_all: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Scan a directory root and update the index
    Scan {
        /// Directory to reconcile
        root: PathBuf,
    },
    /// Print ranked recommendations for a file
    Recommend {
        /// Query file path
        path: String,

        /// Number of results
        #[arg(long, default_value_t = 5)]
        limit: usize,
    },
    /// Record an access event for a file
    Log {
        /// Accessed file path
        path: String,
    },
}

// ---------------------------------------------------------------------------
// Graceful shutdown signal
// ---------------------------------------------------------------------------

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to register SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => info!("Received SIGINT, shutting down..."),
            _ = sigterm.recv() => info!("Received SIGTERM, shutting down..."),
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await.expect("failed to listen for Ctrl+C");
        info!("Received Ctrl+C, shutting down...");
    }
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

fn build_engine(cfg: &config::ServerConfig) -> anyhow::Result<Arc<Engine>> {
    let embedder = embed::StaticModelEmbedder::load(&cfg.embedding.model, cfg.embedding.dim)?;
    let engine = Engine::new(
        cfg.engine_config(),
        Arc::new(extract::PlainTextExtractor),
        Arc::new(embedder),
    )?;
    Ok(Arc::new(engine))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("filesense=info".parse().unwrap()),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let cfg = config::load(&cli.config)?;
    let engine = build_engine(&cfg)?;

    match cli.command {
        Some(Commands::Scan { root }) => {
            let engine = engine.clone();
            let outcome =
                tokio::task::spawn_blocking(move || engine.scan(&root, &CancelToken::new()))
                    .await?;
            match outcome {
                Ok(report) => println!("{}", serde_json::to_string_pretty(&report)?),
                Err(failure) => {
                    error!(code = failure.error.code(), "Scan aborted: {}", failure.error);
                    eprintln!("partial: {}", serde_json::to_string_pretty(&failure.partial)?);
                    std::process::exit(1);
                }
            }
        }
        Some(Commands::Recommend { path, limit }) => {
            let engine = engine.clone();
            let recs =
                tokio::task::spawn_blocking(move || engine.recommend(&path, limit)).await??;
            if recs.is_empty() {
                println!("no recommendations yet (run a scan first)");
            }
            for (i, rec) in recs.iter().enumerate() {
                println!(
                    "{:>2}. {:.3}  {}  (sem {:.2}, rec {:.2}, co {:.2})",
                    i + 1,
                    rec.final_score,
                    rec.path,
                    rec.factors.semantic,
                    rec.factors.recency,
                    rec.factors.cooccurrence,
                );
            }
        }
        Some(Commands::Log { path }) => {
            let engine = engine.clone();
            let summary =
                tokio::task::spawn_blocking(move || engine.log_activity(&path)).await??;
            println!("{}", serde_json::to_string(&summary)?);
        }
        None => serve(cli, cfg, engine).await?,
    }
    Ok(())
}

async fn serve(cli: Cli, cfg: config::ServerConfig, engine: Arc<Engine>) -> anyhow::Result<()> {
    // Kick off configured root scans in the background; queries stay
    // responsive while the index warms up.
    for root in cfg.scan_roots.clone() {
        let engine = engine.clone();
        tokio::task::spawn_blocking(move || {
            match engine.scan(&root, &CancelToken::new()) {
                Ok(report) => info!(
                    root = %root.display(),
                    added = report.added,
                    updated = report.updated,
                    "Startup scan finished"
                ),
                Err(failure) => {
                    error!(root = %root.display(), error = %failure.error, "Startup scan failed")
                }
            }
        });
    }

    let ctx = api::AppContext { engine, start_time: Instant::now() };
    let app = Router::new()
        .route("/health", get(api::api_health))
        .route("/api/scan", post(api::api_scan))
        .route("/api/recommend", get(api::api_recommend))
        .route("/api/activity/log", post(api::api_log))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(ctx);

    let bind_addr = if cli.bind_all { "0.0.0.0" } else { "127.0.0.1" };
    let port = cli.port.unwrap_or(cfg.port);
    let listener = tokio::net::TcpListener::bind(format!("{bind_addr}:{port}"))
        .await
        .with_context(|| format!("could not bind {bind_addr}:{port}"))?;

    info!(port, "http://localhost:{port}");
    axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await?;
    Ok(())
}
