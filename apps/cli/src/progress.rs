//! Progress reporting for acquisitions

use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use lcp_core::{status_code, AcquisitionObserver, Status};
use lcp_types::AcquisitionEvent;

const SCALE: f32 = 1000.0;

/// Renders acquisition progress as a terminal progress bar
pub struct AcquisitionProgress {
    bar: ProgressBar,
}

impl AcquisitionProgress {
    pub fn new(name: &str) -> Self {
        let bar = ProgressBar::new(SCALE as u64);
        bar.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {percent}% {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("█▓▒░  "),
        );
        bar.set_message(name.to_string());
        Self { bar }
    }
}

impl AcquisitionObserver for AcquisitionProgress {
    fn on_started(&self) {
        self.bar.set_position(0);
    }

    fn on_progressed(&self, progress: f32) {
        self.bar.set_position((progress * SCALE) as u64);
    }

    fn on_canceled(&self) {
        self.bar
            .abandon_with_message(format!("{} Cancelled", style("○").dim()));
    }

    fn on_ended(&self, result: &Status) {
        match result {
            Ok(()) => self.bar.finish_with_message(format!(
                "{} Publication verified",
                style("✓").green().bold()
            )),
            Err(e) => self
                .bar
                .abandon_with_message(format!("{} Failed: {}", style("✗").red().bold(), e)),
        }
    }
}

/// Prints every acquisition event as a JSON line
pub struct JsonEvents;

impl JsonEvents {
    fn emit(&self, event: AcquisitionEvent) {
        if let Ok(line) = serde_json::to_string(&event) {
            println!("{}", line);
        }
    }
}

impl AcquisitionObserver for JsonEvents {
    fn on_started(&self) {
        self.emit(AcquisitionEvent::Started);
    }

    fn on_progressed(&self, progress: f32) {
        self.emit(AcquisitionEvent::Progressed { progress });
    }

    fn on_canceled(&self) {
        self.emit(AcquisitionEvent::Canceled);
    }

    fn on_ended(&self, result: &Status) {
        self.emit(AcquisitionEvent::Ended {
            code: status_code(result),
            message: result.as_ref().err().map(|e| e.to_string()),
        });
    }
}
