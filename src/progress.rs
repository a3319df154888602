use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::time::Duration;

const SAMPLING_TEMPLATE: &str =
    "{prefix:.bold} [{elapsed_precise}] {bar:40.green/white} {pos:>9}/{len:9} ETA {eta} {msg}";

/// Terminal feedback for a run. Draws nothing when disabled.
pub struct ChainProgress {
    bar: Option<ProgressBar>,
}

impl ChainProgress {
    /// Generation counter for a chain of `chain_length` generations.
    pub fn new(chain_length: u64, enabled: bool) -> Self {
        let bar = enabled.then(|| {
            let pb = ProgressBar::with_draw_target(
                Some(chain_length),
                ProgressDrawTarget::stderr_with_hz(10),
            );
            pb.set_style(
                ProgressStyle::with_template(SAMPLING_TEMPLATE)
                    .unwrap_or_else(|_| ProgressStyle::default_bar())
                    .progress_chars("=> "),
            );
            pb.set_prefix("MCMC");
            pb
        });
        Self { bar }
    }

    /// Spinner for the input stage, before the chain exists.
    pub fn loading(what: &str, enabled: bool) -> Self {
        let bar = enabled.then(|| {
            let pb = ProgressBar::with_draw_target(None, ProgressDrawTarget::stderr_with_hz(10));
            pb.set_style(
                ProgressStyle::with_template("{prefix:.bold} {spinner} {msg} [{elapsed_precise}]")
                    .unwrap_or_else(|_| ProgressStyle::default_spinner()),
            );
            pb.set_prefix("IO");
            pb.set_message(what.to_string());
            pb.enable_steady_tick(Duration::from_millis(100));
            pb
        });
        Self { bar }
    }

    /// Moves the counter and shows the current state of the chain.
    pub fn update(&self, generation: u64, ln_likelihood: f64, number_of_events: usize) {
        if let Some(pb) = &self.bar {
            pb.set_position(generation);
            pb.set_message(format!("lnL {ln_likelihood:.3} events {number_of_events}"));
        }
    }

    pub fn set_message(&self, msg: impl Into<String>) {
        if let Some(pb) = &self.bar {
            pb.set_message(msg.into());
        }
    }

    pub fn finish(&self, msg: &str) {
        if let Some(pb) = &self.bar {
            pb.finish_with_message(msg.to_string());
        }
    }
}
