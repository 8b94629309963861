//! Turns a target list into suite runs.

use crate::config::Config;
use crate::report::Report;
use crate::{HarnessError, multi_node, shutdown, single_node, throughput};
use kvprobe_core::Target;
use std::io::Write;
use std::net::SocketAddr;

/// Which suites to run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum Mode {
    /// Single-node and throughput suites on every target.
    #[default]
    Single,
    /// Every target is a node of one cluster.
    Multi,
    /// Both of the above.
    All,
}

/// Runs the selected suites over a list of targets.
pub struct Driver {
    config: Config,
    mode: Mode,
    shutdown: bool,
}

impl Driver {
    pub fn new(config: Config, mode: Mode) -> Self {
        Self {
            config,
            mode,
            shutdown: false,
        }
    }

    /// Shut every target down once its suites are done.
    pub fn with_shutdown(mut self, shutdown: bool) -> Self {
        self.shutdown = shutdown;
        self
    }

    /// Run the selected suites against the targets listed in `targets`,
    /// appending each report to `out` as soon as it is done.
    pub async fn run(
        &self,
        targets: &str,
        out: &mut impl Write,
    ) -> Result<Vec<Report>, HarnessError> {
        let mut resolved = Vec::new();
        for parsed in Target::parse_list(targets) {
            match parsed {
                Ok(target) => match resolve(&target).await {
                    Ok(addr) => resolved.push((target, addr)),
                    Err(e) => {
                        tracing::warn!("{}", e);
                        untestable(out, &target.to_string())?;
                    }
                },
                Err(e) => {
                    tracing::warn!("{}", e);
                    untestable(out, e.line())?;
                }
            }
        }
        tracing::info!("{} targets resolved", resolved.len());

        let mut reports = Vec::new();
        if matches!(self.mode, Mode::Single | Mode::All) {
            for (target, addr) in &resolved {
                match single_node::run(*addr, &self.config).await {
                    Ok(report) => emit(report, out, &mut reports)?,
                    Err(e) => untestable_because(out, target, &e)?,
                }
                match throughput::run(*addr, &self.config).await {
                    Ok(report) => emit(report, out, &mut reports)?,
                    Err(e) => untestable_because(out, target, &e)?,
                }
            }
        }

        if matches!(self.mode, Mode::Multi | Mode::All) && !resolved.is_empty() {
            let nodes: Vec<SocketAddr> = resolved.iter().map(|(_, addr)| *addr).collect();
            match multi_node::run(&nodes, &self.config).await {
                Ok(report) => emit(report, out, &mut reports)?,
                Err(e) => {
                    tracing::warn!("cluster not tested: {}", e);
                    writeln!(out, "Could not test cluster: {e}").map_err(HarnessError::Output)?;
                }
            }
        }

        if self.shutdown {
            for (target, addr) in &resolved {
                match shutdown::run(*addr, &self.config).await {
                    Ok(report) => emit(report, out, &mut reports)?,
                    Err(e) => untestable_because(out, target, &e)?,
                }
            }
        }

        Ok(reports)
    }
}

async fn resolve(target: &Target) -> Result<SocketAddr, HarnessError> {
    let unresolved = |reason: String| HarnessError::Resolve {
        target: target.to_string(),
        reason,
    };
    let mut addrs = tokio::net::lookup_host((target.host(), target.port()))
        .await
        .map_err(|e| unresolved(e.to_string()))?;
    addrs
        .next()
        .ok_or_else(|| unresolved("no addresses".to_string()))
}

fn emit(report: Report, out: &mut impl Write, reports: &mut Vec<Report>) -> Result<(), HarnessError> {
    tracing::info!("{}: {}", report.title(), report.summary());
    report.write_to(out).map_err(HarnessError::Output)?;
    reports.push(report);
    Ok(())
}

fn untestable(out: &mut impl Write, line: &str) -> Result<(), HarnessError> {
    writeln!(out, "Could not test: {line}").map_err(HarnessError::Output)
}

fn untestable_because(
    out: &mut impl Write,
    target: &Target,
    cause: &HarnessError,
) -> Result<(), HarnessError> {
    tracing::warn!("{} not tested: {}", target, cause);
    untestable(out, &target.to_string())
}
