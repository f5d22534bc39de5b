//! Analysis progress and result reporting.
//!
//! The pipeline emits an [`AnalysisEvent`] when a run starts, when each unit
//! (a file, or all files in combined scope) starts and finishes, and when the
//! run is aborted. Progress lines go to **stderr** so stdout stays parseable;
//! [`StdoutResults`] prints each finished result to stdout as soon as it is
//! available.

use std::io::Write;

use clausewatch_core::index::RunKind;

use crate::analyse::{FileResult, Outcome};

#[derive(Clone, Debug)]
pub enum AnalysisEvent<'a> {
    Started { kind: RunKind, units: usize },
    UnitStarted { position: usize, total: usize, label: &'a str },
    UnitFinished { total: usize, result: &'a FileResult },
    Aborted { reason: &'a str },
}

pub trait AnalysisReporter: Send + Sync {
    fn report(&self, event: AnalysisEvent<'_>);
}

/// Human-friendly progress on stderr: "analyse-files  2 / 3  tender.pdf".
pub struct StderrProgress;

impl AnalysisReporter for StderrProgress {
    fn report(&self, event: AnalysisEvent<'_>) {
        let line = match &event {
            AnalysisEvent::Started { kind, units } => {
                format!("{}  starting  {} unit(s)\n", kind.slug(), units)
            }
            AnalysisEvent::UnitStarted {
                position,
                total,
                label,
            } => format!("  {} / {}  {}  analysing...\n", position, total, label),
            AnalysisEvent::UnitFinished { total, result } => {
                let status = match result.outcome {
                    Outcome::Answered { .. } => "done",
                    Outcome::Failed { .. } => "failed",
                };
                format!("  {} / {}  {}  {}\n", result.position, total, result.label, status)
            }
            AnalysisEvent::Aborted { reason } => format!("  aborted: {}\n", reason),
        };
        let mut err = std::io::stderr().lock();
        let _ = err.write_all(line.as_bytes());
        let _ = err.flush();
    }
}

/// One JSON object per line on stderr.
pub struct JsonProgress;

impl AnalysisReporter for JsonProgress {
    fn report(&self, event: AnalysisEvent<'_>) {
        let obj = match &event {
            AnalysisEvent::Started { kind, units } => serde_json::json!({
                "event": "started",
                "kind": kind.slug(),
                "units": units
            }),
            AnalysisEvent::UnitStarted {
                position,
                total,
                label,
            } => serde_json::json!({
                "event": "unit_started",
                "position": position,
                "total": total,
                "label": label
            }),
            AnalysisEvent::UnitFinished { total, result } => serde_json::json!({
                "event": "unit_finished",
                "total": total,
                "result": result
            }),
            AnalysisEvent::Aborted { reason } => serde_json::json!({
                "event": "aborted",
                "reason": reason
            }),
        };
        if let Ok(line) = serde_json::to_string(&obj) {
            let mut err = std::io::stderr().lock();
            let _ = writeln!(err, "{}", line);
            let _ = err.flush();
        }
    }
}

pub struct NoProgress;

impl AnalysisReporter for NoProgress {
    fn report(&self, _event: AnalysisEvent<'_>) {}
}

/// Prints each finished result to stdout immediately.
pub struct StdoutResults;

impl AnalysisReporter for StdoutResults {
    fn report(&self, event: AnalysisEvent<'_>) {
        if let AnalysisEvent::UnitFinished { result, .. } = event {
            let mut out = std::io::stdout().lock();
            let _ = writeln!(out, "{}\n", render_result(result));
            let _ = out.flush();
        }
    }
}

/// Forwards every event to each inner reporter in order.
pub struct Fanout(pub Vec<Box<dyn AnalysisReporter>>);

impl AnalysisReporter for Fanout {
    fn report(&self, event: AnalysisEvent<'_>) {
        for reporter in &self.0 {
            reporter.report(event.clone());
        }
    }
}

/// Markdown block for one result: a numbered heading and the model's answer.
pub fn render_result(result: &FileResult) -> String {
    let body = match &result.outcome {
        Outcome::Answered { answer } => answer.clone(),
        Outcome::Failed { error } => format!("**Error:** {}", error),
    };
    format!("{}. Result for *{}*\n\n{}", result.position, result.label, body)
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq, clap::ValueEnum)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn reporter(&self) -> Box<dyn AnalysisReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}
