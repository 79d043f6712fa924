use std::path::{Path, PathBuf};

use anyhow::Context;
use benchfleet_summary_model::{
    append_run_summary, split_windows, BenchmarkResult, FlushedResult, RunSummary,
};

use crate::config::RunConfig;
use crate::context::RunContext;

pub const RUN_SUMMARY_FILE: &str = "run_summary.jsonl";

/// Write the cleaned window as this run's Benchmark Result and append the run summary line.
pub fn persist_result(
    config: &RunConfig,
    ctx: &RunContext,
    window: &str,
) -> anyhow::Result<FlushedResult> {
    let published = ctx
        .published()
        .context("No published images recorded for this run")?;

    let mut result = BenchmarkResult::new(
        ctx.run_id().to_string(),
        ctx.started_at().timestamp(),
        published.version.clone(),
        published.images.clone(),
    );
    for measurement in split_windows(window) {
        if measurement.summary.is_empty() {
            log::warn!(
                "No summary could be parsed for {} {} trial {}",
                measurement.variant,
                measurement.target,
                measurement.trial
            );
        }
        result.push_window(measurement);
    }
    result.set_transcript(window.to_string());

    let mut summary = RunSummary::new(
        &result,
        config.workload_variant.clone(),
        chrono::Utc::now().timestamp(),
        env!("CARGO_PKG_VERSION").to_string(),
    );
    add_summary_config(&mut summary, config);

    let flushed = result.flush(&config.results_dir, &config.output_stem())?;
    append_run_summary(&summary, &config.results_dir.join(RUN_SUMMARY_FILE))
        .context("Failed to append run summary")?;
    log::info!(
        "Wrote {} measurement window(s) to {} (fingerprint {})",
        flushed.window_count,
        flushed.result_path.display(),
        summary.fingerprint()
    );

    Ok(flushed)
}

fn add_summary_config(summary: &mut RunSummary, config: &RunConfig) {
    summary.add_config("node_instance_type", &config.node_instance_type);
    summary.add_config("node_count", config.node_count.to_string());
    summary.add_config("kubernetes_version", &config.kubernetes_version);
    summary.add_config("loadgen_instance_type", &config.loadgen_instance_type);
    summary.add_config("standard_base_image", &config.standard_base_image);
    summary.add_config("caged_base_image", &config.caged_base_image);
    summary.add_config("trials", config.load.trials.to_string());
    summary.add_config(
        "measure",
        format!(
            "{}s@{}",
            config.load.measure_steady.as_secs(),
            config.load.measure_connections
        ),
    );
    summary.add_config("oha_version", &config.load.oha_version);
}

/// Keep the full console transcript of a failed load test.
pub fn persist_transcript(config: &RunConfig, transcript: &str) -> anyhow::Result<PathBuf> {
    write_output(
        &config.results_dir,
        &format!("{}-transcript.log", config.output_stem()),
        transcript,
    )
}

pub(crate) fn write_output(dir: &Path, name: &str, content: &str) -> anyhow::Result<PathBuf> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create results directory {}", dir.display()))?;
    let path = dir.join(name);
    std::fs::write(&path, content)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(path)
}
