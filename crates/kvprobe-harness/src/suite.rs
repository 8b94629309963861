//! Scenario plumbing shared by the suites.
//!
//! A [`Scenario`] runs against a suite-specific context and yields an
//! [`Outcome`]. The [`SuiteRunner`] records each outcome in the suite's
//! [`Report`], turns errors and panics into `Failed`, and enforces the
//! optional suite deadline.

use crate::HarnessError;
use crate::report::{Log, Report};
use futures_util::FutureExt;
use kvprobe_client::{ClientError, Reply};
use kvprobe_core::{ErrorCode, Outcome, Response, ResponseField, Status};
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::time::Duration;
use tokio::time::Instant;

const DEADLINE_EXCEEDED: &str = "suite deadline exceeded";

/// A named check run against a context of type `C`.
pub trait Scenario<C> {
    fn name(&self) -> String;

    fn run(
        &self,
        ctx: &mut C,
        log: &mut Log,
    ) -> impl Future<Output = Result<Outcome, HarnessError>> + Send;
}

/// Runs scenarios one after another and keeps the report.
pub struct SuiteRunner {
    report: Report,
    deadline: Option<Instant>,
    expired: bool,
}

impl SuiteRunner {
    /// Start a report. `budget` bounds the whole suite, counted from now.
    pub fn new(title: impl Into<String>, budget: Option<Duration>) -> Self {
        Self {
            report: Report::new(title),
            deadline: budget.map(|b| Instant::now() + b),
            expired: false,
        }
    }

    /// Free-form line outside any scenario.
    pub fn note(&mut self, line: impl Into<String>) {
        self.report.line(line);
    }

    /// Run one scenario unless the deadline already passed.
    pub async fn run<C, S: Scenario<C>>(&mut self, scenario: &S, ctx: &mut C) -> Status {
        let name = scenario.name();
        if self.expired {
            self.report.skip(&name, DEADLINE_EXCEEDED);
            return Status::Undecided;
        }

        self.report.begin(&name);
        let mut log = Log::new();
        let run = AssertUnwindSafe(scenario.run(ctx, &mut log)).catch_unwind();

        let result = match self.deadline {
            Some(deadline) => match tokio::time::timeout_at(deadline, run).await {
                Ok(result) => result,
                Err(_) => {
                    self.expired = true;
                    Ok(Ok(Outcome::undecided(DEADLINE_EXCEEDED)))
                }
            },
            None => run.await,
        };

        let outcome = match result {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(e)) => {
                tracing::warn!("{} aborted: {}", name, e);
                Outcome::failed(format!("scenario aborted: {e}"))
            }
            Err(panic) => {
                let cause = panic_message(panic.as_ref());
                tracing::error!("{} panicked: {}", name, cause);
                Outcome::failed(format!("scenario panicked: {cause}"))
            }
        };
        self.report.record(&name, log, outcome)
    }

    /// Run scenarios in order; returns how many did not pass.
    pub async fn run_all<C, S: Scenario<C>>(&mut self, scenarios: &[S], ctx: &mut C) -> usize {
        let mut not_passed = 0;
        for scenario in scenarios {
            if self.run(scenario, ctx).await != Status::Passed {
                not_passed += 1;
            }
        }
        not_passed
    }

    /// Mark scenarios as skipped without running them.
    pub fn skip_all<C, S: Scenario<C>>(&mut self, scenarios: &[S], reason: &str) {
        for scenario in scenarios {
            self.report.skip(&scenario.name(), reason);
        }
    }

    pub fn finish(self) -> Report {
        self.report.finish()
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Early exit from a scenario body: either a verdict or an error.
#[derive(Debug)]
pub(crate) enum Stop {
    Verdict(Outcome),
    Error(HarnessError),
}

impl From<HarnessError> for Stop {
    fn from(e: HarnessError) -> Self {
        Stop::Error(e)
    }
}

impl From<ClientError> for Stop {
    fn from(e: ClientError) -> Self {
        Stop::Error(e.into())
    }
}

pub(crate) type Step<T> = Result<T, Stop>;

pub(crate) fn conclude(step: Step<Outcome>) -> Result<Outcome, HarnessError> {
    match step {
        Ok(outcome) | Err(Stop::Verdict(outcome)) => Ok(outcome),
        Err(Stop::Error(e)) => Err(e),
    }
}

pub(crate) fn fail<T>(message: impl Into<String>) -> Step<T> {
    Err(Stop::Verdict(Outcome::failed(message)))
}

pub(crate) fn undecided<T>(message: impl Into<String>) -> Step<T> {
    Err(Stop::Verdict(Outcome::undecided(message)))
}

/// A timeout makes the step undecided.
pub(crate) fn received(reply: Reply, what: &str) -> Step<Response> {
    match reply {
        Reply::Received(response) => Ok(response),
        Reply::TimedOut => undecided(format!("{what}: no reply")),
    }
}

pub(crate) fn expect_code(reply: Reply, code: ErrorCode, what: &str) -> Step<Response> {
    let response = received(reply, what)?;
    if response.error_code != code {
        return fail(format!(
            "{what}: expected {code}, got {}",
            response.error_code
        ));
    }
    Ok(response)
}

pub(crate) fn expect_rejected(reply: Reply, what: &str) -> Step<Response> {
    let response = received(reply, what)?;
    if response.is_okay() {
        return fail(format!("{what}: expected an error code, got OKAY"));
    }
    Ok(response)
}

/// The response must carry exactly the given optional fields.
pub(crate) fn expect_fields(response: &Response, fields: &[ResponseField], what: &str) -> Step<()> {
    let missing = response.missing_fields(fields);
    if !missing.is_empty() {
        return fail(format!("{what}: missing {}", join(&missing)));
    }
    let unexpected = response.unexpected_fields(fields);
    if !unexpected.is_empty() {
        return fail(format!("{what}: unexpected {}", join(&unexpected)));
    }
    Ok(())
}

fn join(fields: &[ResponseField]) -> String {
    fields
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}
