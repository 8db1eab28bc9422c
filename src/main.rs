//! Price Ensemble - Main Entry Point
//!
//! Reads JSON-lines requests from stdin, runs ensemble inference and writes
//! one JSON response line per request to stdout. Logs go to stderr.

use anyhow::{Context, Result};
use price_ensemble::{
    config::AppConfig,
    metrics::MetricsReporter,
    models::inference::InferenceEngine,
    serving::{handle_request, parse_line, write_responses},
    types::ServingResponse,
};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{mpsc, Semaphore};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

fn init_logging(config: &AppConfig) -> Result<()> {
    let filter = EnvFilter::from_default_env()
        .add_directive(format!("price_ensemble={}", config.logging.level).parse()?);

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    if config.logging.format == "json" {
        builder.json().init();
    } else {
        builder.init();
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = match std::env::args().nth(1) {
        Some(path) => AppConfig::load_from_path(&path)
            .with_context(|| format!("Failed to load configuration from {}", path))?,
        None => AppConfig::load()?,
    };

    init_logging(&config)?;
    info!("Starting Price Ensemble");
    info!(
        dir = %config.artifacts.dir,
        workers = config.serving.workers,
        batch_size = config.serving.batch_size,
        "Configuration loaded"
    );

    let engine = Arc::new(InferenceEngine::new(&config));
    let status = engine.status();
    info!(
        state = ?status.state,
        version = ?status.version,
        "Inference engine ready with {} models: {:?}",
        engine.model_count(),
        status.model_names()
    );

    let metrics = engine.metrics();
    if config.metrics.report_interval_secs > 0 {
        let reporter = MetricsReporter::new(metrics.clone(), config.metrics.report_interval_secs);
        tokio::spawn(reporter.start());
    }

    // Responses funnel through one writer so lines never interleave
    let (tx, rx) = mpsc::channel::<ServingResponse>(config.serving.workers.max(1) * 4);
    let writer = tokio::spawn(write_responses(rx, tokio::io::stdout()));

    let num_workers = config.serving.workers.max(1);
    let semaphore = Arc::new(Semaphore::new(num_workers));
    let handled = Arc::new(AtomicU64::new(0));
    let batch_limit = config.serving.batch_size;

    info!("Serving requests with {} parallel workers", num_workers);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await.context("Failed to read stdin")? {
        if line.trim().is_empty() {
            continue;
        }

        let request = match parse_line(&line) {
            Ok(request) => request,
            Err(response) => {
                if tx.send(response).await.is_err() {
                    error!("Response writer closed, dropping error response");
                }
                continue;
            }
        };

        let permit = semaphore
            .clone()
            .acquire_owned()
            .await
            .context("Worker pool closed")?;

        let request_id = request.id().map(str::to_string);
        let engine = engine.clone();
        let tx = tx.clone();
        let handled = handled.clone();
        let metrics = metrics.clone();

        tokio::spawn(async move {
            let response = tokio::task::spawn_blocking(move || {
                handle_request(&engine, request, batch_limit)
            })
            .await;

            match response {
                Ok(response) => {
                    if tx.send(response).await.is_err() {
                        error!(request_id = ?request_id, "Response writer closed, dropping response");
                    }
                }
                Err(e) => error!(request_id = ?request_id, error = %e, "Request task panicked"),
            }

            let count = handled.fetch_add(1, Ordering::Relaxed) + 1;
            if count % 1000 == 0 {
                let latency = metrics.get_latency_stats();
                info!(
                    handled = count,
                    throughput = format!("{:.1} req/s", metrics.get_throughput()),
                    avg_latency_us = latency.mean_us,
                    "Serving milestone"
                );
            }

            drop(permit);
        });
    }

    // Wait for in-flight requests
    let _all = semaphore
        .acquire_many(num_workers as u32)
        .await
        .context("Worker pool closed")?;
    drop(tx);
    match writer.await {
        Ok(written) => info!(responses = written, "Response writer finished"),
        Err(e) => error!(error = %e, "Response writer task failed"),
    }

    info!("Input closed, shutting down...");
    metrics.print_summary();

    Ok(())
}
