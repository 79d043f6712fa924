//! The self-contained script the load generator runs at boot.
//!
//! cloud-init forwards everything it prints to the instance console, which is the only channel the
//! orchestrator reads. The markers below delimit the parts of that output the monitor cares about.

use std::io::Write as _;

use base64::Engine;
use benchfleet_summary_model::{PHASE_MARKER, TARGET_BEGIN_MARKER, TARGET_END_MARKER};
use flate2::write::GzEncoder;
use flate2::Compression;

use crate::config::LoadProfile;
use crate::types::Endpoint;

pub const TEST_START_MARKER: &str = "BENCHFLEET_TEST_START";
pub const TEST_COMPLETE_MARKER: &str = "BENCHFLEET_TEST_COMPLETE";
pub const BOOT_FAILED_MARKER: &str = "BENCHFLEET_BOOT_FAILED";
pub const PRECHECK_FAILED_MARKER: &str = "BENCHFLEET_PRECHECK_FAILED";

/// Instance metadata limit for user data, measured after base64 encoding.
pub const MAX_USER_DATA_BYTES: usize = 16 * 1024;

pub const TRANSCRIPT_PATH: &str = "/var/log/benchfleet-loadtest.log";

/// Bash single-quoted literal.
fn quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

/// Render the boot script for `targets`, run `profile.trials` times in order.
pub fn render(run_id: &str, targets: &[Endpoint], profile: &LoadProfile) -> String {
    let secs = |d: std::time::Duration| d.as_secs();

    let mut lines = vec![
        "#!/bin/bash".to_string(),
        "set -Eeuo pipefail".to_string(),
        format!("exec > >(tee -a {TRANSCRIPT_PATH}) 2>&1"),
        format!("trap 'echo \"{BOOT_FAILED_MARKER} line=$LINENO status=$?\"' ERR"),
        format!("echo \"benchfleet load generator for run {run_id}\""),
        "sysctl -q -w net.ipv4.ip_local_port_range=\"1024 65535\"".to_string(),
        "sysctl -q -w net.ipv4.tcp_tw_reuse=1".to_string(),
        "sysctl -q -w net.ipv4.tcp_fin_timeout=15".to_string(),
        "sysctl -q -w net.core.somaxconn=65535".to_string(),
        "sysctl -q -w net.ipv4.tcp_max_syn_backlog=65535".to_string(),
        "ulimit -n 1048576".to_string(),
        format!(
            "curl -fsSL --retry 5 -o /usr/local/bin/oha {}",
            quote(&profile.oha_url())
        ),
        "chmod +x /usr/local/bin/oha".to_string(),
        "precheck() {".to_string(),
        format!(
            "  for _ in $(seq 1 {}); do curl -fsS -o /dev/null --max-time 5 \"$1\" && return 0; sleep {}; done",
            profile.precheck_attempts,
            secs(profile.precheck_interval)
        ),
        format!("  echo \"{PRECHECK_FAILED_MARKER} $1\""),
        "  return 1".to_string(),
        "}".to_string(),
        format!("echo {TEST_START_MARKER}"),
    ];

    let warmup = profile
        .warmup_steps
        .iter()
        .map(u32::to_string)
        .collect::<Vec<_>>()
        .join(" ");

    for trial in 1..=profile.trials {
        for target in targets {
            let url = quote(&target.url);
            lines.extend([
                format!(
                    "echo \"{TARGET_BEGIN_MARKER} variant={} target={} trial={trial}\"",
                    target.variant, target.service
                ),
                format!("echo \"{PHASE_MARKER} precheck\""),
                format!("precheck {url}"),
                format!("echo \"{PHASE_MARKER} warmup-ramp\""),
                format!(
                    "for c in {warmup}; do oha --no-tui -z {}s -c \"$c\" {url} > /dev/null; done",
                    secs(profile.warmup_step)
                ),
                format!("echo \"{PHASE_MARKER} warmup-reconnect\""),
                format!(
                    "oha --no-tui --disable-keepalive -z {}s -c {} {url} > /dev/null",
                    secs(profile.reconnect),
                    profile.reconnect_connections
                ),
                format!("echo \"{PHASE_MARKER} measure-ramp\""),
                format!(
                    "oha --no-tui -z {}s -c {} {url} > /dev/null",
                    secs(profile.measure_ramp),
                    profile.measure_ramp_connections
                ),
                format!("echo \"{PHASE_MARKER} measure-steady\""),
                format!(
                    "oha --no-tui -z {}s -c {} {url}",
                    secs(profile.measure_steady),
                    profile.measure_connections
                ),
                format!("echo \"{PHASE_MARKER} cooldown\""),
                format!("sleep {}", secs(profile.cooldown)),
                format!("echo {TARGET_END_MARKER}"),
            ]);
        }
    }
    lines.push(format!("echo {TEST_COMPLETE_MARKER}"));

    let mut script = lines.join("\n");
    script.push('\n');
    script
}

/// Gzip the script for the instance metadata channel.
pub fn compress(script: &str) -> std::io::Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::best());
    encoder.write_all(script.as_bytes())?;
    encoder.finish()
}

/// Size of the user data as the metadata service stores it.
pub fn encoded_len(compressed: &[u8]) -> usize {
    base64::engine::general_purpose::STANDARD
        .encode(compressed)
        .len()
}
