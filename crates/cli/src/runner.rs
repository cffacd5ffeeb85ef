use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::info;

use remora_capture::PcapSource;
use remora_catalog::load_catalog;
use remora_flow::FlowPolicy;
use remora_orchestrator::{Pipeline, PipelineConfig};

use crate::output::print_report;

pub async fn run_map(
    pcap: PathBuf,
    fingerprints: PathBuf,
    output_format: String,
    workers: Option<usize>,
    idle_timeout: Option<u64>,
    fin_finalizes: bool,
) -> Result<()> {
    let catalog = load_catalog(&fingerprints)
        .with_context(|| format!("loading fingerprints from {}", fingerprints.display()))?;
    anyhow::ensure!(
        !catalog.is_empty(),
        "no fingerprint definitions found in {}",
        fingerprints.display()
    );
    info!("Loaded {} fingerprint(s)", catalog.len());

    let source = PcapSource::open(&pcap)
        .with_context(|| format!("opening capture {}", pcap.display()))?;

    let defaults = PipelineConfig::default();
    let config = PipelineConfig {
        workers: workers.unwrap_or(defaults.workers),
        flow: FlowPolicy {
            idle_timeout: idle_timeout.map(Duration::from_secs),
            finalize_on_fin: fin_finalizes,
        },
        ..defaults
    };

    let started = Instant::now();
    let pipeline = Pipeline::new(Arc::new(catalog), config);
    let report = pipeline.run(source).await?;
    info!("Mapped capture in {:.2}s", started.elapsed().as_secs_f64());

    print_report(&report, &output_format)
}

pub fn run_fingerprints(fingerprints: PathBuf) -> Result<()> {
    let catalog = load_catalog(&fingerprints)
        .with_context(|| format!("loading fingerprints from {}", fingerprints.display()))?;

    println!("{:<24} {:<24} {:<12} {:<6} {}", "ID", "LABEL", "CATEGORY", "CONF", "TRANSPORT");
    for fp in catalog.iter() {
        let transport = fp
            .transport
            .map_or_else(|| "any".to_string(), |t| t.as_str().to_string());
        println!(
            "{:<24} {:<24} {:<12} {:<6} {}",
            fp.id, fp.label, fp.category, fp.confidence, transport
        );
    }
    println!("\n{} fingerprint(s) valid", catalog.len());
    Ok(())
}
