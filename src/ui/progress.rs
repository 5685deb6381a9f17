use crate::orchestrator::{RunState, RunStatus};
use console::style;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Terminal UI for a Quill run, rendered via `indicatif` progress bars.
///
/// Two bars are stacked vertically:
/// - State bar — tracks progress through the run's pipeline states
/// - Node bar — spinner naming the node currently being worked
pub struct RunReporter {
    multi: MultiProgress,
    state_bar: ProgressBar,
    node_bar: ProgressBar,
    nodes_touched: AtomicU64,
}

/// RootAudit, three structure levels, prose. `Done` retires the bar.
const PIPELINE_STATES: u64 = 5;

impl RunReporter {
    pub fn new() -> Self {
        let multi = MultiProgress::new();

        let state_style = ProgressStyle::default_bar()
            .template("{prefix:.bold.dim} [{bar:30.cyan/blue}] {msg}")
            .expect("progress bar template is a valid static string")
            .progress_chars("█▓▒░");
        let state_bar = multi.add(ProgressBar::new(PIPELINE_STATES));
        state_bar.set_style(state_style);
        state_bar.set_prefix("Stage");

        let node_style = ProgressStyle::default_spinner()
            .template("{prefix:.bold.dim} {spinner} {msg}")
            .expect("progress bar template is a valid static string");
        let node_bar = multi.add(ProgressBar::new_spinner());
        node_bar.set_style(node_style);
        node_bar.set_prefix(" Node");
        node_bar.enable_steady_tick(Duration::from_millis(120));

        Self {
            multi,
            state_bar,
            node_bar,
            nodes_touched: AtomicU64::new(0),
        }
    }

    pub fn enter_state(&self, state: RunState) {
        let position = match state {
            RunState::RootAudit => 0,
            RunState::Structure(level) => match level {
                crate::orchestrator::StructureLevel::Outline => 1,
                crate::orchestrator::StructureLevel::Plot => 2,
                crate::orchestrator::StructureLevel::Chapter => 3,
            },
            RunState::Write => 4,
            RunState::Done => PIPELINE_STATES,
        };
        self.state_bar.set_position(position);
        self.state_bar.set_message(state.to_string());
    }

    pub fn node_update(&self, title: &str) {
        let touched = self.nodes_touched.fetch_add(1, Ordering::Relaxed) + 1;
        self.node_bar
            .set_message(format!("{} ({} done)", title, touched));
    }

    pub fn finish(&self, status: RunStatus) {
        self.node_bar.finish_and_clear();
        let styled = match status {
            RunStatus::Completed => style(status.to_string()).green().bold(),
            RunStatus::Stopped => style(status.to_string()).yellow().bold(),
            RunStatus::Error => style(status.to_string()).red().bold(),
        };
        self.state_bar.finish_with_message(styled.to_string());
    }

    /// Print a line above the bars without tearing them.
    pub fn println(&self, line: &str) {
        let _ = self.multi.println(line);
    }
}

impl Default for RunReporter {
    fn default() -> Self {
        Self::new()
    }
}
