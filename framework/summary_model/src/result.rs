use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::window::MeasurementWindow;

/// The two image references a run compares.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ImagePair {
    pub standard: String,
    pub caged: String,
}

/// Everything a run measured.
///
/// Created empty when the load test is dispatched, appended to as windows are extracted and
/// written once by [BenchmarkResult::flush]. Flushing consumes the value so nothing can change it
/// afterwards.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BenchmarkResult {
    pub run_id: String,
    /// Unix timestamp in seconds.
    pub started_at: i64,
    pub version: String,
    pub images: ImagePair,
    windows: Vec<MeasurementWindow>,
    /// The cleaned transcript between the start and completion markers.
    transcript: String,
}

/// Where a flushed result ended up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlushedResult {
    pub result_path: PathBuf,
    pub transcript_path: PathBuf,
    pub window_count: usize,
}

impl BenchmarkResult {
    pub fn new(run_id: String, started_at: i64, version: String, images: ImagePair) -> Self {
        Self {
            run_id,
            started_at,
            version,
            images,
            windows: Vec::new(),
            transcript: String::new(),
        }
    }

    /// Append one measurement window, keeping windows in the order they were captured.
    pub fn push_window(&mut self, window: MeasurementWindow) {
        self.windows.push(window);
    }

    pub fn set_transcript(&mut self, transcript: String) {
        self.transcript = transcript;
    }

    pub fn windows(&self) -> &[MeasurementWindow] {
        &self.windows
    }

    pub fn transcript(&self) -> &str {
        &self.transcript
    }

    /// Look up the window for a variant and trial, the key results are compared on.
    pub fn window(&self, variant: &str, target: &str, trial: u32) -> Option<&MeasurementWindow> {
        self.windows
            .iter()
            .find(|w| w.variant == variant && w.target == target && w.trial == trial)
    }

    /// Write the result as pretty JSON plus the cleaned transcript as plain text.
    ///
    /// Files are created as `<dir>/<stem>.json` and `<dir>/<stem>.log` and must not exist yet.
    pub fn flush(self, dir: &Path, stem: &str) -> anyhow::Result<FlushedResult> {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create results directory {}", dir.display()))?;

        let result_path = dir.join(format!("{stem}.json"));
        let transcript_path = dir.join(format!("{stem}.log"));

        std::fs::write(&transcript_path, &self.transcript).with_context(|| {
            format!("Failed to write transcript to {}", transcript_path.display())
        })?;

        let file = std::fs::File::create_new(&result_path)
            .with_context(|| format!("Failed to create {}", result_path.display()))?;
        serde_json::to_writer_pretty(file, &self).context("Failed to serialize benchmark result")?;

        Ok(FlushedResult {
            result_path,
            transcript_path,
            window_count: self.windows.len(),
        })
    }
}

/// Read back a result written by [BenchmarkResult::flush].
pub fn load_benchmark_result(path: &Path) -> anyhow::Result<BenchmarkResult> {
    let file = std::fs::File::open(path)
        .with_context(|| format!("Failed to open benchmark result {}", path.display()))?;
    let result = serde_json::from_reader(std::io::BufReader::new(file))?;
    Ok(result)
}
