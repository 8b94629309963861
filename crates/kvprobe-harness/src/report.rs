//! Suite reports.
//!
//! A [`Report`] is the textual log of one suite plus its verdict counts. Lines
//! are echoed through `tracing` as they are added so a long run shows
//! progress, and the finished report is appended to the output file.

use kvprobe_core::{Outcome, Status, StatusCounts};
use serde::Serialize;
use std::io::{self, Write};

const RULE: &str = "---------------------------------------------------";

/// Lines produced while a scenario runs.
#[derive(Debug, Default)]
pub struct Log {
    lines: Vec<String>,
}

impl Log {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn line(&mut self, line: impl Into<String>) {
        let line = line.into();
        tracing::info!("{}", line);
        self.lines.push(line);
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }
}

/// One scenario's verdict as it appears in the JSON output.
#[derive(Debug, Clone, Serialize)]
pub struct ScenarioRecord {
    pub name: String,
    pub outcome: Outcome,
}

#[derive(Debug, Clone, Serialize)]
pub struct Report {
    title: String,
    lines: Vec<String>,
    scenarios: Vec<ScenarioRecord>,
    counts: StatusCounts,
    skipped: usize,
}

impl Report {
    pub fn new(title: impl Into<String>) -> Self {
        let mut report = Self {
            title: title.into(),
            lines: Vec::new(),
            scenarios: Vec::new(),
            counts: StatusCounts::default(),
            skipped: 0,
        };
        report.line(RULE);
        report.line(report.title.clone());
        report.line(RULE);
        report
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn line(&mut self, line: impl Into<String>) {
        let line = line.into();
        tracing::info!("{}", line);
        self.lines.push(line);
    }

    /// Open a scenario section.
    pub fn begin(&mut self, name: &str) {
        self.line(format!("[TEST: {name}]"));
    }

    /// Append a finished scenario's log and verdict.
    pub fn record(&mut self, name: &str, log: Log, outcome: Outcome) -> Status {
        // Already echoed when written to the log.
        self.lines.extend(log.lines);
        if !outcome.message.is_empty() {
            self.line(outcome.message.clone());
        }
        self.line(match outcome.status {
            Status::Passed => "PASSED",
            Status::Failed => "FAILED",
            Status::Undecided => "UNDECIDED",
        });
        self.line("");

        let status = outcome.status;
        self.counts.record(status);
        self.scenarios.push(ScenarioRecord {
            name: name.to_string(),
            outcome,
        });
        status
    }

    /// Note a scenario that was never started.
    pub fn skip(&mut self, name: &str, reason: &str) {
        self.skipped += 1;
        self.line(format!("[SKIPPED: {name}] {reason}"));
    }

    /// Verdicts of the scenarios that ran. Skipped ones are not counted.
    pub fn counts(&self) -> StatusCounts {
        self.counts
    }

    pub fn skipped(&self) -> usize {
        self.skipped
    }

    pub fn scenarios(&self) -> &[ScenarioRecord] {
        &self.scenarios
    }

    /// Verdict of the named scenario, if it ran.
    pub fn status_of(&self, name: &str) -> Option<Status> {
        self.scenarios
            .iter()
            .find(|r| r.name == name)
            .map(|r| r.outcome.status)
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    /// Closing line with the verdict totals.
    pub fn summary(&self) -> String {
        let mut summary = format!(
            "Completed {} tests: {} passed, {} failed, {} inconclusive",
            self.counts.total(),
            self.counts.passed,
            self.counts.failed,
            self.counts.undecided
        );
        if self.skipped > 0 {
            summary.push_str(&format!(", {} skipped", self.skipped));
        }
        summary
    }

    /// Close the report with its summary line.
    pub fn finish(mut self) -> Self {
        let summary = self.summary();
        self.line(summary);
        self.line("");
        self
    }

    /// Write every line, newline-terminated.
    pub fn write_to(&self, out: &mut impl Write) -> io::Result<()> {
        for line in &self.lines {
            writeln!(out, "{line}")?;
        }
        out.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_and_summarize() {
        let mut report = Report::new("SUITE ON 127.0.0.1:4000");
        report.begin("IsAlive");
        report.record("IsAlive", Log::new(), Outcome::passed(""));

        report.begin("GetPid");
        let mut log = Log::new();
        log.line("sent GET_PID");
        report.record("GetPid", log, Outcome::undecided("no reply"));

        report.skip("Wipeout", "suite deadline exceeded");
        let report = report.finish();

        assert_eq!(report.counts().passed, 1);
        assert_eq!(report.counts().undecided, 1);
        assert_eq!(report.status_of("GetPid"), Some(Status::Undecided));
        assert_eq!(report.status_of("Wipeout"), None);
        assert_eq!(
            report.summary(),
            "Completed 2 tests: 1 passed, 0 failed, 1 inconclusive, 1 skipped"
        );

        let mut out = Vec::new();
        report.write_to(&mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with(RULE));
        assert!(text.contains("[TEST: GetPid]\nsent GET_PID\nno reply\nUNDECIDED\n"));
        assert!(text.contains("[SKIPPED: Wipeout] suite deadline exceeded"));
    }

    #[test]
    fn serializes_verdicts() {
        let mut report = Report::new("T");
        report.record("A", Log::new(), Outcome::failed("boom"));
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["scenarios"][0]["outcome"]["status"], "Failed");
        assert_eq!(json["counts"]["failed"], 1);
    }
}
