//! Watches the load generator's console output until the load test completes or fails.
//!
//! Classification is a pure function of the accumulated transcript and the instance state, in
//! priority order: instance gone, fatal output, boot failure, completion, still running. The
//! caller turns "still running" at the attempt ceiling into a timeout.

use std::fmt;
use std::sync::LazyLock;

use benchfleet_providers::prelude::CloudApi;
use regex::Regex;

use crate::boot_script::{
    BOOT_FAILED_MARKER, PRECHECK_FAILED_MARKER, TEST_COMPLETE_MARKER, TEST_START_MARKER,
};
use crate::config::Timings;
use crate::context::{RunContext, RunPhase};
use crate::progress::PollProgress;

/// Output that means the load test cannot succeed. Case sensitive, so that ordinary boot lines
/// such as systemd's `Failed to start` do not match.
pub const FATAL_PATTERNS: &[&str] = &[
    "fatal error",
    "Fatal error",
    "FATAL",
    "Kernel panic",
    "panic:",
    "panicked at",
    "Segmentation fault",
    "Out of memory",
    "oom-kill",
    "Killed",
    "failed to start",
];

/// Output that means the boot script itself did not run to the end.
pub const BOOT_FAILURE_PATTERNS: &[&str] = &[
    BOOT_FAILED_MARKER,
    PRECHECK_FAILED_MARKER,
    "Failed running /var/lib/cloud/instance/scripts",
];

/// Instance states that mean the load generator is gone or going.
const STOPPED_STATES: &[&str] = &["shutting-down", "terminated", "stopping", "stopped"];

/// Longest snapshot prefix used to find where a new console snapshot overlaps the transcript.
const OVERLAP_ANCHOR: usize = 256;

static CLOUD_INIT_PREFIX: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"^(?:\[\s*\d+\.\d+\]\s*)?cloud-init\[\d+\]:\s?").ok()
});
static INTERFACE_CHATTER: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"IPv6|ADDRCONF|NETDEV_CHANGE|link becomes ready|Link is (?:Up|Down)").ok()
});

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    InstanceStopped(String),
    FatalPattern(String),
    BootFailure(String),
    TimedOut { polls: u32 },
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::InstanceStopped(state) => {
                write!(f, "load generator instance is {state}")
            }
            FailureReason::FatalPattern(pattern) => {
                write!(f, "load generator output contains `{pattern}`")
            }
            FailureReason::BootFailure(pattern) => {
                write!(f, "load generator boot failed (`{pattern}`)")
            }
            FailureReason::TimedOut { polls } => {
                write!(f, "load test did not complete within {polls} polls")
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    Failed(FailureReason),
    /// The cleaned window between the start and completion markers.
    Completed(String),
    Running,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MonitorOutcome {
    Completed {
        window: String,
        transcript: String,
        polls: u32,
    },
    Failed {
        reason: FailureReason,
        transcript: String,
        polls: u32,
    },
}

impl MonitorOutcome {
    pub fn transcript(&self) -> &str {
        match self {
            MonitorOutcome::Completed { transcript, .. }
            | MonitorOutcome::Failed { transcript, .. } => transcript,
        }
    }

    pub fn polls(&self) -> u32 {
        match self {
            MonitorOutcome::Completed { polls, .. }
            | MonitorOutcome::Failed { polls, .. } => *polls,
        }
    }
}

/// `None` while the instance is usable, otherwise why it is not. A missing instance counts as
/// stopped.
pub fn stopped_reason(state: Option<&str>) -> Option<String> {
    match state {
        None => Some("gone".to_string()),
        Some(s) if STOPPED_STATES.contains(&s) => Some(s.to_string()),
        Some(_) => None,
    }
}

/// Byte range of the latest start marker line through the first completion marker line after it.
fn window_range(transcript: &str) -> Option<(usize, usize)> {
    let start = transcript.rfind(TEST_START_MARKER)?;
    let complete = start + transcript[start..].find(TEST_COMPLETE_MARKER)?;

    let line_start = transcript[..start].rfind('\n').map_or(0, |i| i + 1);
    let line_end = transcript[complete..]
        .find('\n')
        .map_or(transcript.len(), |i| complete + i);

    Some((line_start, line_end))
}

/// The raw text between the latest start marker and the first completion marker after it, both
/// marker lines included.
pub fn extract_window(transcript: &str) -> Option<&str> {
    window_range(transcript).map(|(from, to)| &transcript[from..to])
}

pub fn classify(transcript: &str, stopped: Option<&str>) -> Classification {
    if let Some(state) = stopped {
        return Classification::Failed(FailureReason::InstanceStopped(state.to_string()));
    }

    let range = window_range(transcript);
    // Only output before the completion marker can fail the run.
    let scope = match range {
        Some((_, end)) => &transcript[..end],
        None => transcript,
    };

    if let Some(pattern) = FATAL_PATTERNS.iter().find(|p| scope.contains(*p)) {
        return Classification::Failed(FailureReason::FatalPattern(pattern.to_string()));
    }
    if let Some(pattern) = BOOT_FAILURE_PATTERNS.iter().find(|p| scope.contains(*p)) {
        return Classification::Failed(FailureReason::BootFailure(pattern.to_string()));
    }

    match range {
        Some((from, to)) => Classification::Completed(clean_window(&transcript[from..to])),
        None => Classification::Running,
    }
}

/// Strip boot log noise: cloud-init line prefixes, interface state chatter and echoed shell
/// commands.
pub fn clean_window(window: &str) -> String {
    window
        .lines()
        .map(|line| match CLOUD_INIT_PREFIX.as_ref() {
            Some(re) => re.replace(line, "").into_owned(),
            None => line.to_string(),
        })
        .filter(|line| !line.starts_with("+ "))
        .filter(|line| {
            INTERFACE_CHATTER
                .as_ref()
                .map_or(true, |re| !re.is_match(line))
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Append the part of `snapshot` not already in `transcript`.
///
/// Console reads return the most recent tail of the output, so consecutive snapshots overlap.
/// Without any overlap the snapshot is appended whole.
pub fn merge_snapshot(transcript: &mut String, snapshot: &str) {
    if snapshot.is_empty() {
        return;
    }
    if transcript.is_empty() {
        transcript.push_str(snapshot);
        return;
    }

    // The first line of the snapshot, capped, must start a line of the transcript.
    let mut anchor_len = snapshot
        .find('\n')
        .map_or(snapshot.len(), |i| i + 1)
        .min(OVERLAP_ANCHOR);
    while !snapshot.is_char_boundary(anchor_len) {
        anchor_len -= 1;
    }
    let anchor = &snapshot[..anchor_len];

    let mut new_from = None;
    for (pos, _) in transcript.rmatch_indices(anchor) {
        if pos > 0 && !transcript[..pos].ends_with('\n') {
            continue;
        }
        let tail = &transcript[pos..];
        if snapshot.starts_with(tail) {
            new_from = Some(tail.len());
            break;
        }
        if tail.starts_with(snapshot) {
            return;
        }
    }

    match new_from {
        Some(from) => transcript.push_str(&snapshot[from..]),
        None => {
            if !transcript.ends_with('\n') {
                transcript.push('\n');
            }
            transcript.push_str(snapshot);
        }
    }
}

/// Polls the load generator's console until it completes, fails or runs out of attempts.
pub struct ProgressMonitor<'a> {
    cloud: &'a dyn CloudApi,
    timings: &'a Timings,
    show_progress: bool,
}

impl<'a> ProgressMonitor<'a> {
    pub fn new(cloud: &'a dyn CloudApi, timings: &'a Timings, show_progress: bool) -> Self {
        Self {
            cloud,
            timings,
            show_progress,
        }
    }

    /// Fails only when the run is interrupted. Every other ending is a [MonitorOutcome].
    pub async fn watch(
        &self,
        ctx: &mut RunContext,
        instance_id: &str,
    ) -> anyhow::Result<MonitorOutcome> {
        ctx.advance(RunPhase::Monitoring);
        let policy = self.timings.console_output;
        log::info!(
            "Watching {instance_id} console output every {:?}, for at most {:?}",
            policy.interval,
            policy.ceiling()
        );

        let progress = PollProgress::new("load test", policy, self.show_progress);
        let outcome = self.follow(ctx, instance_id, &progress).await;
        progress.finish();

        outcome
    }

    async fn follow(
        &self,
        ctx: &mut RunContext,
        instance_id: &str,
        progress: &PollProgress,
    ) -> anyhow::Result<MonitorOutcome> {
        let policy = self.timings.console_output;
        let mut transcript = String::new();

        for attempt in 1..=policy.max_attempts {
            let (stopped, snapshot) = ctx.interruptible(self.read(instance_id)).await?;
            if let Some(snapshot) = snapshot {
                merge_snapshot(&mut transcript, &snapshot);
            }
            progress.set_poll(attempt);

            match classify(&transcript, stopped.as_deref()) {
                Classification::Running => {
                    log::debug!(
                        "Load test running ({attempt}/{}), {} bytes of output",
                        policy.max_attempts,
                        transcript.len()
                    );
                }
                Classification::Completed(window) => {
                    log::info!("Load test completed after {attempt} polls");
                    return Ok(MonitorOutcome::Completed {
                        window,
                        transcript,
                        polls: attempt,
                    });
                }
                Classification::Failed(reason) => {
                    log::error!("Load test failed after {attempt} polls: {reason}");
                    return Ok(MonitorOutcome::Failed {
                        reason,
                        transcript,
                        polls: attempt,
                    });
                }
            }

            ctx.check_interrupted()?;
            if attempt < policy.max_attempts && !policy.interval.is_zero() {
                ctx.interruptible(async {
                    tokio::time::sleep(policy.interval).await;
                    anyhow::Ok(())
                })
                .await?;
            }
        }

        Ok(MonitorOutcome::Failed {
            reason: FailureReason::TimedOut {
                polls: policy.max_attempts,
            },
            transcript,
            polls: policy.max_attempts,
        })
    }

    /// The instance's stopped reason, if any, and the latest console snapshot. Read errors are
    /// logged and treated as no news.
    async fn read(&self, instance_id: &str) -> anyhow::Result<(Option<String>, Option<String>)> {
        let stopped = match self.cloud.instance_state(instance_id).await {
            Ok(state) => stopped_reason(state.as_deref()),
            Err(e) => {
                log::warn!("Could not read state of {instance_id}: {e}");
                None
            }
        };
        let snapshot = match self.cloud.console_output(instance_id).await {
            Ok(snapshot) => Some(snapshot),
            Err(e) => {
                log::warn!("Could not read console of {instance_id}: {e}");
                None
            }
        };

        Ok((stopped, snapshot))
    }
}
