use std::fmt::Write;

use benchfleet_core::prelude::PollPolicy;
use indicatif::{ProgressBar, ProgressState, ProgressStyle};

/// Shows how many polls of a long wait have been used against its ceiling.
pub struct PollProgress {
    bar: ProgressBar,
}

impl PollProgress {
    pub fn new(message: &str, policy: PollPolicy, enabled: bool) -> Self {
        if !enabled {
            return Self {
                bar: ProgressBar::hidden(),
            };
        }

        let ceiling = policy.ceiling();
        let bar = ProgressBar::new(u64::from(policy.max_attempts));
        let style = ProgressStyle::with_template(
            "{spinner:.green} {msg} [{wide_bar:.cyan/blue}] poll {pos}/{len} [{elapsed_precise} / {ceiling}]",
        )
        .map(|style| {
            style
                .with_key("ceiling", {
                    let hours = ceiling.as_secs() / 3600;
                    let minutes = (ceiling.as_secs() % 3600) / 60;
                    let seconds = ceiling.as_secs() % 60;
                    move |_state: &ProgressState, w: &mut dyn Write| {
                        let _ = write!(w, "{:02}:{:02}:{:02}", hours, minutes, seconds);
                    }
                })
                .progress_chars("#>-")
        })
        .unwrap_or_else(|e| {
            log::debug!("Falling back to the default progress style: {e}");
            ProgressStyle::default_bar()
        });
        bar.set_style(style);
        bar.set_message(message.to_string());

        Self { bar }
    }

    pub fn set_poll(&self, attempt: u32) {
        self.bar.set_position(u64::from(attempt));
    }

    pub fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

impl Drop for PollProgress {
    fn drop(&mut self) {
        if !self.bar.is_finished() {
            self.bar.finish_and_clear();
        }
    }
}
