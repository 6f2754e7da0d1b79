//! # Vigil Server
//!
//! Asynchronous vulnerability-scan service.
//!
//! ## Overview
//!
//! Accepts scan requests over HTTP, queues them durably, and runs a worker
//! pool that drives each job through claim, scan, and atomic result
//! publication:
//!
//! - **Submission**: `POST /api/v1/scans` validates and enqueues a job
//! - **Results**: `GET /api/v1/scans/{id}` returns status, findings, and a
//!   severity summary once the scan completes
//! - **Workers**: poll the Postgres-backed dispatch queue, invoke the scan
//!   engines (Trivy for images, a header probe for URLs), and retry
//!   transient failures with bounded backoff
//!
//! ## Architecture
//!
//! The server is built on Axum and uses:
//! - PostgreSQL for job, finding, and dispatch-queue storage
//! - Trivy as the container-image scan engine
//! - tokio worker tasks coordinated purely through the store and queue

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use sqlx::postgres::PgPoolOptions;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use vigil_core::domain::ScanType;
use vigil_core::engine::{EngineRouter, HttpHeaderEngine, ScanEngine, TrivyEngine};
use vigil_core::orchestration::{OrchestratorConfig, PgDispatchQueue, WorkerPool};
use vigil_core::persistence::{self, PgApiKeyStore, PgJobStore};
use vigil_core::query::QueryService;
use vigil_core::submission::SubmissionService;

use vigil_server::{AppState, create_router};

/// CLI entry point
#[derive(Parser, Debug)]
#[command(name = "vigil-server")]
#[command(about = "Asynchronous vulnerability scan service")]
struct Cli {
    /// Server host
    #[arg(long, env = "SERVER_HOST", default_value = "0.0.0.0")]
    host: String,

    /// Server port
    #[arg(short, long, env = "SERVER_PORT", default_value_t = 8080)]
    port: u16,

    /// Postgres connection string
    #[arg(long, env = "DATABASE_URL")]
    database_url: String,

    /// Maximum database connections
    #[arg(long, env = "DATABASE_MAX_CONNECTIONS", default_value_t = 10)]
    database_max_connections: u32,

    /// Number of concurrent scan workers
    #[arg(long, env = "SCAN_WORKERS", default_value_t = 4)]
    workers: usize,

    /// Path to the trivy binary
    #[arg(long, env = "TRIVY_PATH", default_value = "trivy")]
    trivy_path: String,

    /// Scan engine invocation timeout in seconds
    #[arg(long, env = "SCAN_TIMEOUT_SECS", default_value_t = 600)]
    scan_timeout_secs: u64,

    /// Run the HTTP API without scan workers (dedicated API node)
    #[arg(long, env = "VIGIL_NO_WORKERS", default_value_t = false)]
    no_workers: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=warn,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let pool = PgPoolOptions::new()
        .max_connections(cli.database_max_connections)
        .acquire_timeout(Duration::from_secs(5))
        .connect(&cli.database_url)
        .await
        .context("failed to connect to Postgres")?;

    persistence::run_migrations(&pool)
        .await
        .context("failed to run migrations")?;
    info!("database migrations applied");

    let orchestrator = OrchestratorConfig {
        workers: cli.workers,
        scan_timeout_secs: cli.scan_timeout_secs,
        ..OrchestratorConfig::default()
    };

    let jobs = Arc::new(PgJobStore::new(pool.clone()));
    let queue = Arc::new(
        PgDispatchQueue::new(
            pool.clone(),
            orchestrator.retry,
            orchestrator.visibility_timeout_secs,
        )
        .await
        .context("failed to initialize dispatch queue")?,
    );
    let api_keys = Arc::new(PgApiKeyStore::new(pool.clone()));

    let engine: Arc<dyn ScanEngine> = Arc::new(
        EngineRouter::new()
            .register(
                ScanType::DockerImage,
                Arc::new(TrivyEngine::new(cli.trivy_path.clone())),
            )
            .register(ScanType::WebUrl, Arc::new(HttpHeaderEngine::default())),
    );

    let worker_pool = Arc::new(WorkerPool::new(
        orchestrator,
        queue.clone(),
        jobs.clone(),
        engine,
    ));
    if cli.no_workers {
        info!("worker pool disabled on this node");
    } else {
        worker_pool.start().await;
    }

    let state = AppState {
        submission: Arc::new(SubmissionService::new(jobs.clone(), queue.clone())),
        query: Arc::new(QueryService::new(jobs)),
        api_keys,
    };
    let router = create_router(state);

    let addr: SocketAddr = format!("{}:{}", cli.host, cli.port)
        .parse()
        .context("invalid host/port")?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(%addr, "vigil server listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    info!("http server stopped, draining workers");
    worker_pool.shutdown().await;
    pool.close().await;
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("shutdown signal received");
}
