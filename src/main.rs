//! Surrogate PV Server - Main Entry Point
//!
//! Loads the surrogate model, publishes its input and output PVs, and reruns
//! inference on every input write received over NATS.

use anyhow::{Context, Result};
use futures::StreamExt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use surrogate_pv_server::{
    config::{AppConfig, LoggingConfig},
    consumer::{parse_put, PutConsumer, PutReply},
    metrics::{MetricsReporter, ServingMetrics},
    models::{
        loader::load_stock_image, ModelArtifact, OnlineModelRunner, OrtLoader, SurrogatePredictor,
    },
    producer::NatsPvServer,
    registry::WorkerRegistry,
    server::InputReactor,
    types::Image,
    workers::WorkerPool,
};
use tokio::sync::{oneshot, Semaphore};
use tracing::{debug, error, info, warn};

fn init_tracing(logging: &LoggingConfig) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::from_default_env()
        .add_directive(format!("surrogate_pv_server={}", logging.level).parse()?);
    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    if logging.format == "json" {
        builder.json().init();
    } else {
        builder.init();
    }
    Ok(())
}

/// Run a blocking job on the pool and wait for its result
async fn on_pool<T, F>(pool: &WorkerPool, job: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    let (tx, rx) = oneshot::channel();
    pool.submit(move || {
        let _ = tx.send(job());
    })?;
    rx.await.context("Worker dropped the job")
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = AppConfig::load()?;
    init_tracing(&config.logging)?;

    info!("Starting Surrogate PV Server");
    info!(
        "Prefix: {}, protocol: {}, precision: {}",
        config.server.prefix, config.server.protocol, config.server.precision
    );

    // Load model metadata
    let artifact = Arc::new(
        ModelArtifact::load(&config.model.artifact).context("Failed to load model artifact")?,
    );
    let metadata = artifact.metadata.clone();
    info!(
        "Model loaded: kind={:?}, {} inputs, {} outputs",
        metadata.kind,
        metadata.input_ordering.len(),
        metadata.output_ordering.len()
    );

    let stock_image = match &config.model.stock_image {
        Some(path) => Some(Arc::new(
            load_stock_image(path).context("Failed to load stock image")?,
        )),
        None => metadata
            .input_image_shape
            .map(|shape| Arc::new(Image::zeros(shape))),
    };
    let defaults = metadata
        .default_inputs(&config.model.default_inputs)
        .context("Invalid default inputs")?;

    // Every worker thread loads its own session on first use
    let loader = Arc::new(OrtLoader::with_threads(config.model.onnx_threads)?);
    let registry = {
        let artifact = artifact.clone();
        let stock_image = stock_image.clone();
        Arc::new(WorkerRegistry::new(move || {
            let predictor = SurrogatePredictor::load(&artifact, stock_image.clone(), &loader)?;
            Ok(OnlineModelRunner::single(Box::new(predictor)))
        }))
    };

    let num_workers = config.pipeline.workers.max(1);
    let pool = Arc::new(WorkerPool::new(num_workers)?);
    info!("Worker pool started with {} threads", pool.size());

    // Connect to NATS
    let client = async_nats::connect(&config.nats.url).await?;
    info!("Connected to NATS at {}", config.nats.url);

    let (pv_server, _publisher) = NatsPvServer::start(client.clone(), &config.nats.pv_subject);
    info!("Publishing PV updates to: {}.<pv>", config.nats.pv_subject);

    let metrics = Arc::new(ServingMetrics::new());

    // Seed state, run the starting inference and register every PV
    let reactor = {
        let settings = config.server.reactor_settings();
        let metadata = metadata.clone();
        let registry = registry.clone();
        let metrics = metrics.clone();
        on_pool(&pool, move || {
            InputReactor::start(
                settings,
                &metadata,
                defaults,
                stock_image,
                registry,
                &pv_server,
                metrics,
            )
        })
        .await?
        .context("Failed to start PV server")?
    };
    let reactor = Arc::new(reactor);
    info!("{} input PVs registered", reactor.input_pvs().len());

    // Sanity pass on random inputs before taking writes
    {
        let registry = registry.clone();
        let check = on_pool(&pool, move || {
            registry.with_runner(|runner| runner.random_evaluate(&mut rand::thread_rng()))
        })
        .await?;
        match check.and_then(|result| result) {
            Ok(output) => info!("Random evaluation produced {} outputs", output.len()),
            Err(e) => warn!(error = %e, "Random evaluation failed"),
        }
    }

    // Start metrics reporter
    let metrics_clone = metrics.clone();
    let interval = config.pipeline.metrics_interval_secs;
    tokio::spawn(async move {
        let reporter = MetricsReporter::new(metrics_clone, interval);
        reporter.start().await;
    });

    let consumer = Arc::new(PutConsumer::new(client.clone(), &config.nats.put_subject));
    let mut subscription = consumer.subscribe().await?;
    info!("Listening for writes on: {}.<pv>", consumer.subject());

    // Semaphore bounds the writes waiting on the pool
    let semaphore = Arc::new(Semaphore::new(num_workers * 2));
    let processed_count = Arc::new(AtomicU64::new(0));

    while let Some(message) = subscription.next().await {
        let permit = semaphore.clone().acquire_owned().await?;

        let reactor = reactor.clone();
        let pool = pool.clone();
        let client = client.clone();
        let consumer = consumer.clone();
        let metrics = metrics.clone();
        let processed_count = processed_count.clone();

        tokio::spawn(async move {
            let start_time = Instant::now();

            let reply = match (
                consumer.pv_name(message.subject.as_str()),
                parse_put(&message.payload),
            ) {
                (Some(pv), Ok(request)) => {
                    let pv = pv.to_string();
                    match on_pool(&pool, move || reactor.put(&pv, request.value)).await {
                        Ok(Ok(report)) => {
                            debug!(
                                pv = %report.pv,
                                value = report.value,
                                posted = report.posted,
                                processing_time_us = start_time.elapsed().as_micros() as u64,
                                "Write completed"
                            );
                            PutReply::success()
                        }
                        Ok(Err(e)) => PutReply::failure(e),
                        Err(e) => {
                            error!(error = %e, "Failed to schedule write");
                            PutReply::failure(e)
                        }
                    }
                }
                (None, _) => {
                    warn!(subject = %message.subject, "Write on unexpected subject");
                    PutReply::failure(format!("no PV in subject {}", message.subject))
                }
                (_, Err(e)) => {
                    warn!(error = %e, "Failed to deserialize write");
                    PutReply::failure(format!("invalid write payload: {}", e))
                }
            };

            if let Some(reply_subject) = message.reply {
                match serde_json::to_vec(&reply) {
                    Ok(payload) => {
                        if let Err(e) = client.publish(reply_subject, payload.into()).await {
                            error!(error = %e, "Failed to send write reply");
                        }
                    }
                    Err(e) => error!(error = %e, "Failed to encode write reply"),
                }
            }

            let count = processed_count.fetch_add(1, Ordering::Relaxed) + 1;

            // Log progress every 100 writes
            if count % 100 == 0 {
                let write_stats = metrics.write_stats();
                info!(
                    processed = count,
                    throughput = format!("{:.1} writes/s", metrics.throughput()),
                    avg_latency_us = write_stats.mean_us,
                    "Processing milestone"
                );
            }

            // Release permit when done
            drop(permit);
        });
    }

    info!("Server shutting down...");
    metrics.print_summary();

    Ok(())
}
