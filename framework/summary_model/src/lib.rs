mod result;
mod window;

pub use result::{load_benchmark_result, BenchmarkResult, FlushedResult, ImagePair};
pub use window::{
    split_windows, MeasurementWindow, WindowSummary, PHASE_MARKER, TARGET_BEGIN_MARKER,
    TARGET_END_MARKER,
};

use itertools::Itertools;
use serde::{Deserialize, Serialize};
use sha3::Digest;
use std::collections::HashMap;
use std::io::{BufRead, Read, Write};
use std::path::Path;

/// Summary of a completed run, one line per run in the run summary ledger.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunSummary {
    /// The unique run id
    ///
    /// Chosen by the runner. Every cloud resource created by the run carries it.
    pub run_id: String,
    /// The workload variant that was deployed
    pub workload_variant: String,
    /// The time the run started
    ///
    /// This is a Unix timestamp in seconds.
    pub started_at: i64,
    /// The time the result was flushed, as a Unix timestamp in seconds.
    pub finished_at: i64,
    /// Runtime version read back from the baseline image
    pub version: String,
    /// The two images that were measured
    pub images: ImagePair,
    /// Number of measurement windows that were captured
    pub window_count: usize,
    /// Benchmark configuration that should make two runs comparable
    ///
    /// Instance types, node count, base images and the load profile. Secrets and per-run names
    /// must not be added here.
    pub config: HashMap<String, String>,
    /// The version of benchfleet that produced this run
    pub benchfleet_version: String,
}

impl RunSummary {
    pub fn new(
        result: &BenchmarkResult,
        workload_variant: String,
        finished_at: i64,
        benchfleet_version: String,
    ) -> Self {
        Self {
            run_id: result.run_id.clone(),
            workload_variant,
            started_at: result.started_at,
            finished_at,
            version: result.version.clone(),
            images: result.images.clone(),
            window_count: result.windows().len(),
            config: HashMap::with_capacity(0),
            benchfleet_version,
        }
    }

    /// Add a configuration value
    pub fn add_config(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.config.insert(key.into(), value.into());
    }

    /// Compute a fingerprint for this run summary
    ///
    /// Two runs with the same fingerprint measured the same thing under the same configuration.
    /// It uses the
    ///     - Workload variant
    ///     - Runtime version
    ///     - Configuration values
    ///     - benchfleet version
    ///
    /// The fingerprint is computed using [sha3::Sha3_256].
    pub fn fingerprint(&self) -> String {
        let mut hasher = sha3::Sha3_256::new();
        Digest::update(&mut hasher, self.workload_variant.as_bytes());
        Digest::update(&mut hasher, self.version.as_bytes());
        self.config
            .iter()
            .sorted_by_key(|(k, _)| k.to_owned())
            .for_each(|(k, v)| {
                Digest::update(&mut hasher, k.as_bytes());
                Digest::update(&mut hasher, v.as_bytes());
            });
        Digest::update(&mut hasher, self.benchfleet_version.as_bytes());

        format!("{:x}", hasher.finalize())
    }
}

/// Append the run summary to a file
///
/// The summary will be serialized to JSON and output as a single line followed by a newline. The
/// recommended file extension is `.jsonl`.
pub fn append_run_summary(run_summary: &RunSummary, path: &Path) -> anyhow::Result<()> {
    let mut file = std::fs::OpenOptions::new()
        .append(true)
        .create(true)
        .open(path)?;
    store_run_summary(run_summary, &mut file)?;
    file.write_all(b"\n")?;
    Ok(())
}

/// Serialize the run summary to a writer
pub fn store_run_summary<W: Write>(run_summary: &RunSummary, writer: &mut W) -> anyhow::Result<()> {
    serde_json::to_writer(writer, run_summary)?;
    Ok(())
}

/// Load a run summary from a reader
pub fn load_run_summary<R: Read>(reader: R) -> anyhow::Result<RunSummary> {
    let reader = std::io::BufReader::new(reader);
    let run_summary: RunSummary = serde_json::from_reader(reader)?;
    Ok(run_summary)
}

/// Load run summaries from a file
///
/// The file should contain one JSON object per line. This is the format produced by
/// [append_run_summary].
pub fn load_summary_runs(path: &Path) -> anyhow::Result<Vec<RunSummary>> {
    let file = std::fs::File::open(path)?;
    let reader = std::io::BufReader::new(file);
    let mut runs = Vec::new();
    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let run: RunSummary = serde_json::from_str(&line)?;
        runs.push(run);
    }
    Ok(runs)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_summary() -> RunSummary {
        let result = BenchmarkResult::new(
            "abc123".to_string(),
            1_700_000_000,
            "3.13.1".to_string(),
            ImagePair {
                standard: "repo:3.13.1-standard".to_string(),
                caged: "repo:3.13.1-caged".to_string(),
            },
        );
        let mut summary =
            RunSummary::new(&result, "webapp".to_string(), 1_700_000_900, "0.1.0".to_string());
        summary.add_config("node_instance_type", "c6i.xlarge");
        summary.add_config("node_count", "2");
        summary
    }

    #[test]
    fn fingerprint_ignores_run_identity() {
        let first = sample_summary();
        let mut second = sample_summary();
        second.run_id = "other".to_string();
        second.started_at += 3600;

        assert_eq!(first.fingerprint(), second.fingerprint());
    }

    #[test]
    fn fingerprint_changes_with_config() {
        let first = sample_summary();
        let mut second = sample_summary();
        second.add_config("node_count", "3");

        assert_ne!(first.fingerprint(), second.fingerprint());
    }

    #[test]
    fn appended_summaries_load_back_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run_summary.jsonl");

        let first = sample_summary();
        let mut second = sample_summary();
        second.run_id = "def456".to_string();

        append_run_summary(&first, &path).unwrap();
        append_run_summary(&second, &path).unwrap();

        let loaded = load_summary_runs(&path).unwrap();
        pretty_assertions::assert_eq!(vec![first, second], loaded);
    }
}
