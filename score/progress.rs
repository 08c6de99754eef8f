//! Progress reporting for the bootstrap loop.

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::io::IsTerminal;

/// Observer for reporting bootstrap progress. Iterations complete on worker
/// threads, so implementations must be shareable across them.
pub trait BootstrapObserver: Sync {
    fn on_start(&self, total_iterations: usize) {
        let _ = total_iterations;
    }
    fn on_iteration_complete(&self) {}
    fn on_finish(&self) {}
}

#[derive(Default)]
pub struct NoopProgress;

impl BootstrapObserver for NoopProgress {}

/// Terminal progress bar, drawn only when stderr is attached to a terminal.
pub struct TerminalProgress {
    pb: ProgressBar,
}

impl TerminalProgress {
    pub fn new(message: &str) -> Self {
        let draw_target = if std::io::stderr().is_terminal() {
            ProgressDrawTarget::stderr_with_hz(20)
        } else {
            ProgressDrawTarget::hidden()
        };

        let pb = ProgressBar::with_draw_target(None, draw_target);
        if let Ok(style) = ProgressStyle::with_template(
            "> [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}",
        ) {
            pb.set_style(style.progress_chars("█▉▊▋▌▍▎▏  "));
        }
        pb.set_message(message.to_string());

        Self { pb }
    }
}

impl BootstrapObserver for TerminalProgress {
    fn on_start(&self, total_iterations: usize) {
        self.pb.set_length(total_iterations as u64);
        self.pb.set_position(0);
    }

    fn on_iteration_complete(&self) {
        self.pb.inc(1);
    }

    fn on_finish(&self) {
        self.pb.finish_and_clear();
    }
}
