use serde::{Deserialize, Serialize};

/// Opens the transcript section of one target in one trial.
///
/// Followed by `variant=<variant> target=<target> trial=<n>` on the same line.
pub const TARGET_BEGIN_MARKER: &str = "BENCHFLEET_TARGET_BEGIN";
/// Closes the section opened by [TARGET_BEGIN_MARKER].
pub const TARGET_END_MARKER: &str = "BENCHFLEET_TARGET_END";
/// Announces the next load-test phase, followed by the phase name.
pub const PHASE_MARKER: &str = "BENCHFLEET_PHASE";

/// The phase whose output the summary is parsed from.
const STEADY_PHASE: &str = "measure-steady";

/// One target measured in one trial.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MeasurementWindow {
    /// The image variant behind the target, `standard` or `caged`.
    pub variant: String,
    /// The service name the traffic was sent to.
    pub target: String,
    /// 1-based trial index.
    pub trial: u32,
    /// Every line captured for this target, all phases included.
    pub raw: String,
    pub summary: WindowSummary,
}

/// Figures reported by the traffic tool for the steady-state phase.
///
/// Anything the tool did not print stays `None`; the raw window is the source of truth.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct WindowSummary {
    pub requests_per_sec: Option<f64>,
    /// Percentage, 0 to 100.
    pub success_rate: Option<f64>,
    pub average_secs: Option<f64>,
    pub p50_secs: Option<f64>,
    pub p90_secs: Option<f64>,
    pub p99_secs: Option<f64>,
}

impl WindowSummary {
    /// Parse the steady-state section of a target window.
    ///
    /// If the window has no `measure-steady` phase marker the whole window is parsed, and the last
    /// value seen for each figure wins.
    pub fn parse(raw: &str) -> Self {
        let section = steady_section(raw);
        let mut summary = WindowSummary::default();

        for line in section.lines() {
            let line = line.trim();

            if let Some((key, value)) = line.split_once(':') {
                let value = value.trim();
                match key.trim() {
                    "Requests/sec" => summary.requests_per_sec = leading_number(value),
                    "Success rate" => summary.success_rate = leading_number(value),
                    "Average" => summary.average_secs = leading_number(value),
                    _ => {}
                }
                continue;
            }

            // Percentile lines look like `99.00% in 0.0301 secs`
            if let Some((percentile, latency)) = line.split_once("% in ") {
                let latency = leading_number(latency);
                match percentile.trim() {
                    "50.00" | "50" => summary.p50_secs = latency,
                    "90.00" | "90" => summary.p90_secs = latency,
                    "99.00" | "99" => summary.p99_secs = latency,
                    _ => {}
                }
            }
        }

        summary
    }

    pub fn is_empty(&self) -> bool {
        self == &WindowSummary::default()
    }
}

fn steady_section(raw: &str) -> &str {
    let start = raw.lines().fold((0usize, None), |(offset, found), line| {
        let next = offset + line.len() + 1;
        let is_steady = line
            .find(PHASE_MARKER)
            .map(|i| line[i + PHASE_MARKER.len()..].trim() == STEADY_PHASE)
            .unwrap_or(false);
        (next, if is_steady { Some(next) } else { found })
    });

    let Some(start) = start.1 else {
        return raw;
    };
    let rest = raw.get(start..).unwrap_or("");

    match rest.find(PHASE_MARKER) {
        Some(end) => &rest[..end],
        None => rest,
    }
}

fn leading_number(value: &str) -> Option<f64> {
    let number: String = value
        .chars()
        .take_while(|c| c.is_ascii_digit() || *c == '.' || *c == '-')
        .collect();
    number.parse().ok()
}

/// Split a cleaned transcript into one window per target and trial.
///
/// Lines outside a begin/end pair are ignored. A begin marker without a matching end marker
/// closes at the next begin marker or the end of the transcript, so a truncated final target is
/// still reported.
pub fn split_windows(transcript: &str) -> Vec<MeasurementWindow> {
    let mut windows = Vec::new();
    let mut current: Option<(WindowKey, Vec<&str>)> = None;

    for line in transcript.lines() {
        if let Some(i) = line.find(TARGET_BEGIN_MARKER) {
            if let Some((key, lines)) = current.take() {
                windows.push(key.into_window(&lines));
            }
            let key = WindowKey::parse(&line[i + TARGET_BEGIN_MARKER.len()..]);
            current = key.map(|key| (key, Vec::new()));
        } else if line.contains(TARGET_END_MARKER) {
            if let Some((key, lines)) = current.take() {
                windows.push(key.into_window(&lines));
            }
        } else if let Some((_, lines)) = current.as_mut() {
            lines.push(line);
        }
    }

    if let Some((key, lines)) = current.take() {
        windows.push(key.into_window(&lines));
    }

    windows
}

struct WindowKey {
    variant: String,
    target: String,
    trial: u32,
}

impl WindowKey {
    fn parse(fields: &str) -> Option<Self> {
        let mut variant = None;
        let mut target = None;
        let mut trial = None;

        for field in fields.split_whitespace() {
            match field.split_once('=') {
                Some(("variant", v)) => variant = Some(v.to_string()),
                Some(("target", v)) => target = Some(v.to_string()),
                Some(("trial", v)) => trial = v.parse().ok(),
                _ => {}
            }
        }

        Some(Self {
            variant: variant?,
            target: target?,
            trial: trial.unwrap_or(1),
        })
    }

    fn into_window(self, lines: &[&str]) -> MeasurementWindow {
        let raw = lines.join("\n");
        let summary = WindowSummary::parse(&raw);
        MeasurementWindow {
            variant: self.variant,
            target: self.target,
            trial: self.trial,
            raw,
            summary,
        }
    }
}
