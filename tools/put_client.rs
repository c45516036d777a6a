//! Test PV Put Client
//!
//! Writes random input values to a running surrogate PV server over NATS and
//! reports the completion replies.

use rand::seq::SliceRandom;
use std::time::{Duration, Instant};
use surrogate_pv_server::consumer::{PutReply, PutRequest};
use surrogate_pv_server::models::ModelArtifact;
use surrogate_pv_server::types::ModelMetadata;
use tracing::{info, warn};

/// Random writes within each input's declared range
struct WriteGenerator {
    rng: rand::rngs::ThreadRng,
    prefix: String,
}

impl WriteGenerator {
    fn new(prefix: &str) -> Self {
        Self {
            rng: rand::thread_rng(),
            prefix: prefix.to_string(),
        }
    }

    /// Pick one input and a value for it
    fn next(&mut self, metadata: &ModelMetadata) -> anyhow::Result<(String, PutRequest)> {
        let values = metadata.random_input(&mut self.rng)?;
        let name = metadata
            .input_ordering
            .choose(&mut self.rng)
            .ok_or_else(|| anyhow::anyhow!("model has no inputs"))?;
        let value = values
            .get(name)
            .copied()
            .ok_or_else(|| anyhow::anyhow!("no value sampled for {}", name))?;
        Ok((format!("{}:{}", self.prefix, name), PutRequest { value }))
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("pv_put_client=info".parse()?),
        )
        .init();

    info!("Starting Test PV Put Client");

    // Parse arguments
    let args: Vec<String> = std::env::args().collect();
    let artifact = args.get(1).map(|s| s.as_str()).unwrap_or("models/model.json");
    let nats_url = args.get(2).map(|s| s.as_str()).unwrap_or("nats://localhost:4222");
    let subject = args.get(3).map(|s| s.as_str()).unwrap_or("pv.put");
    let prefix = args.get(4).map(|s| s.as_str()).unwrap_or("smvm");
    let count: u64 = args.get(5).and_then(|s| s.parse().ok()).unwrap_or(100);
    let delay_ms: u64 = args.get(6).and_then(|s| s.parse().ok()).unwrap_or(100);

    info!(
        artifact = %artifact,
        nats_url = %nats_url,
        subject = %subject,
        prefix = %prefix,
        count = count,
        delay_ms = delay_ms,
        "Configuration loaded"
    );

    let metadata = ModelArtifact::load(artifact)?.metadata;
    let mut generator = WriteGenerator::new(prefix);

    // Connect to NATS
    let client = match async_nats::connect(nats_url).await {
        Ok(c) => {
            info!("Connected to NATS");
            c
        }
        Err(e) => {
            warn!(error = %e, "Failed to connect to NATS. Running in dry-run mode.");
            return run_dry_mode(&metadata, &mut generator, count, delay_ms).await;
        }
    };

    info!("Starting to write {} values...", count);

    let mut succeeded = 0u64;
    let mut failed = 0u64;

    for i in 0..count {
        let (pv, request) = generator.next(&metadata)?;
        let payload = serde_json::to_vec(&request)?;

        let start = Instant::now();
        let response = client
            .request(format!("{}.{}", subject, pv), payload.into())
            .await?;
        let reply: PutReply = serde_json::from_slice(&response.payload)?;

        if reply.ok {
            succeeded += 1;
        } else {
            failed += 1;
            warn!(
                pv = %pv,
                value = request.value,
                error = reply.error.as_deref().unwrap_or("unknown"),
                "Write rejected"
            );
        }

        if (i + 1) % 10 == 0 {
            info!(
                "Wrote {}/{} values ({} ok, {} failed, last round trip {} ms)",
                i + 1,
                count,
                succeeded,
                failed,
                start.elapsed().as_millis()
            );
        }

        tokio::time::sleep(Duration::from_millis(delay_ms)).await;
    }

    info!(
        "Completed! Wrote {} values ({} ok, {} failed)",
        count, succeeded, failed
    );

    Ok(())
}

async fn run_dry_mode(
    metadata: &ModelMetadata,
    generator: &mut WriteGenerator,
    count: u64,
    delay_ms: u64,
) -> anyhow::Result<()> {
    info!("Running in dry-run mode (no NATS connection)");

    for i in 0..count {
        let (pv, request) = generator.next(metadata)?;

        if (i + 1) % 10 == 0 || i == 0 {
            info!("Sample write {}: {} = {}", i + 1, pv, serde_json::to_string(&request)?);
        }

        tokio::time::sleep(Duration::from_millis(delay_ms)).await;
    }

    Ok(())
}
