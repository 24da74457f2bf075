//! Test Request Client
//!
//! Sends random BIN prediction requests to the router over NATS and logs
//! the top recommendation of each reply.

use clap::Parser;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// BINs that commonly appear in routing traffic
const KNOWN_BINS: [u32; 8] = [
    510123, 462263, 401200, 520082, 411111, 545454, 479851, 536812,
];

/// Request structure matching the router's expected format
#[derive(Debug, Clone, Serialize)]
struct PredictionRequest {
    bins: Vec<u32>,
    is_3d: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_n: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct RankedProcessor {
    processor_name: String,
    predicted_success_percent: f64,
    rank: u32,
}

#[derive(Debug, Deserialize)]
struct PredictionResponse {
    bin: u32,
    fallback_used: bool,
    model_version: String,
    processors: Vec<RankedProcessor>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
enum PredictionReply {
    Ok { results: Vec<PredictionResponse> },
    Error { message: String },
}

#[derive(Parser)]
#[command(name = "request-client", about = "Send test prediction requests")]
struct Args {
    #[arg(long, default_value = "nats://localhost:4222")]
    nats_url: String,
    #[arg(long, default_value = "routing.predict")]
    subject: String,
    /// Number of requests to send
    #[arg(long, default_value_t = 100)]
    count: u64,
    /// Share of requests using a random, most likely unseen BIN
    #[arg(long, default_value_t = 0.2)]
    cold_rate: f64,
    #[arg(long, default_value_t = 100)]
    delay_ms: u64,
}

/// Random request generator
struct RequestGenerator {
    rng: rand::rngs::ThreadRng,
    cold_rate: f64,
}

impl RequestGenerator {
    fn new(cold_rate: f64) -> Self {
        Self {
            rng: rand::thread_rng(),
            cold_rate: cold_rate.clamp(0.0, 1.0),
        }
    }

    fn generate(&mut self) -> PredictionRequest {
        let count = self.rng.gen_range(1..=3);
        let bins = (0..count).map(|_| self.random_bin()).collect();

        PredictionRequest {
            bins,
            is_3d: u8::from(self.rng.gen_bool(0.7)),
            top_n: None,
        }
    }

    fn random_bin(&mut self) -> u32 {
        if self.rng.gen_bool(self.cold_rate) {
            self.rng.gen_range(400000..560000)
        } else {
            KNOWN_BINS[self.rng.gen_range(0..KNOWN_BINS.len())]
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("request_client=info".parse()?),
        )
        .init();

    let args = Args::parse();
    info!(
        nats_url = %args.nats_url,
        subject = %args.subject,
        count = args.count,
        cold_rate = args.cold_rate,
        delay_ms = args.delay_ms,
        "Starting test request client"
    );

    let client = match async_nats::connect(&args.nats_url).await {
        Ok(c) => {
            info!("Connected to NATS");
            c
        }
        Err(e) => {
            warn!(error = %e, "Failed to connect to NATS. Running in dry-run mode.");
            return run_dry_mode(&args).await;
        }
    };

    let mut generator = RequestGenerator::new(args.cold_rate);
    let (mut answered, mut fallbacks, mut failed) = (0u64, 0u64, 0u64);

    for i in 0..args.count {
        let request = generator.generate();
        let payload = serde_json::to_vec(&request)?;
        let start = Instant::now();

        match client.request(args.subject.clone(), payload.into()).await {
            Ok(message) => match serde_json::from_slice::<PredictionReply>(&message.payload) {
                Ok(PredictionReply::Ok { results }) => {
                    answered += 1;
                    for response in &results {
                        if response.fallback_used {
                            fallbacks += 1;
                        }
                        let top = response.processors.first();
                        info!(
                            bin = response.bin,
                            version = %response.model_version,
                            fallback_used = response.fallback_used,
                            top = top.map(|p| p.processor_name.as_str()).unwrap_or("-"),
                            percent = top.map(|p| p.predicted_success_percent).unwrap_or(0.0),
                            rank = top.map(|p| p.rank).unwrap_or(0),
                            latency_us = start.elapsed().as_micros() as u64,
                            "Reply"
                        );
                    }
                }
                Ok(PredictionReply::Error { message }) => {
                    failed += 1;
                    warn!(error = %message, "Router rejected request");
                }
                Err(e) => {
                    failed += 1;
                    warn!(error = %e, "Malformed reply");
                }
            },
            Err(e) => {
                failed += 1;
                warn!(error = %e, "Request failed");
            }
        }

        if (i + 1) % 10 == 0 {
            info!(
                "Sent {}/{} requests ({} answered, {} failed)",
                i + 1,
                args.count,
                answered,
                failed
            );
        }

        tokio::time::sleep(Duration::from_millis(args.delay_ms)).await;
    }

    info!(
        "Completed! {} answered, {} failed, {} BIN rankings fell back to external processors",
        answered, failed, fallbacks
    );

    Ok(())
}

async fn run_dry_mode(args: &Args) -> anyhow::Result<()> {
    info!("Running in dry-run mode (no NATS connection)");

    let mut generator = RequestGenerator::new(args.cold_rate);
    for i in 0..args.count {
        let request = generator.generate();
        if (i + 1) % 10 == 0 || i == 0 {
            info!("Sample request {}: {}", i + 1, serde_json::to_string(&request)?);
        }
        tokio::time::sleep(Duration::from_millis(args.delay_ms)).await;
    }

    Ok(())
}
