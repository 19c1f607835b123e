//! Terminal output: a spinner per operation and colored outcomes.

use console::Style;
use indicatif::{ProgressBar, ProgressStyle};

use crate::engine::TaskStage;
use crate::error::AccountError;
use crate::orchestrator::Outcome;

/// Spinner shown while one operation runs, replaced by its outcome.
pub struct TaskProgress {
    pb: ProgressBar,
    green: Style,
    red: Style,
    yellow: Style,
    dim: Style,
}

impl TaskProgress {
    pub fn start(label: &str) -> Self {
        let pb = ProgressBar::new_spinner();
        let style = ProgressStyle::default_spinner()
            .template("{spinner:.cyan} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner());
        pb.set_style(style);
        pb.set_message(label.to_string());
        pb.enable_steady_tick(std::time::Duration::from_millis(100));

        Self {
            pb,
            green: Style::new().green().bold(),
            red: Style::new().red().bold(),
            yellow: Style::new().yellow(),
            dim: Style::new().dim(),
        }
    }

    pub fn complete(&self, label: &str, outcome: &Outcome) {
        self.pb.finish_and_clear();
        match (&outcome.stage, &outcome.failure) {
            (TaskStage::Finished, _) => {
                let target = outcome.resource_ref.as_deref().unwrap_or("-");
                println!(
                    "  {} {label} {}",
                    self.green.apply_to("✓"),
                    self.dim.apply_to(target)
                );
            }
            (TaskStage::Cancelled, _) => {
                println!("  {} {label} cancelled", self.yellow.apply_to("⊘"));
            }
            (_, Some(failure)) => {
                println!(
                    "  {} {label}: {} ({}) {}",
                    self.red.apply_to("✗"),
                    failure.code,
                    failure.status_code,
                    failure.message
                );
                if let Some(existing) = &failure.conflicting {
                    println!("      conflicts with {existing}");
                }
            }
            (stage, None) => {
                println!("  {} {label} ended {stage}", self.yellow.apply_to("?"));
            }
        }
    }

    /// The request was refused before a task was created.
    pub fn rejected(&self, label: &str, err: &AccountError) {
        self.pb.finish_and_clear();
        println!(
            "  {} {label} rejected: {} {err}",
            self.red.apply_to("✗"),
            err.code()
        );
    }

    pub fn print_document(&self, outcome: &Outcome) {
        let style = match outcome.stage {
            TaskStage::Finished => &self.green,
            TaskStage::Failed => &self.red,
            _ => &self.yellow,
        };
        println!(
            "{}",
            style.apply_to(format!("─── {} task ───", outcome.workflow))
        );
        println!(
            "{}",
            serde_json::to_string_pretty(&outcome.document).unwrap_or_default()
        );
    }
}
