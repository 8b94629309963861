//! Throughput suite.
//!
//! Each concurrency level spawns that many clients, each with its own
//! endpoint, issuing PUT-then-GET pairs on disjoint keys. Request counts are
//! collected in a shared [`Tally`]. The optional stress level runs only if
//! every regular level passed.

use crate::config::Config;
use crate::node::wipe;
use crate::report::{Log, Report};
use crate::suite::{Scenario, Step, SuiteRunner, conclude, fail};
use crate::HarnessError;
use kvprobe_client::{ClientConfig, ClientError, ProtocolClient, Reply};
use kvprobe_core::{Outcome, Tally, TallySnapshot};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::Instant;

const VALUE: &[u8] = b"throughput";

/// Server address, client settings and a control client for wipes.
pub struct ThroughputContext {
    server: SocketAddr,
    client_config: ClientConfig,
    control: ProtocolClient,
    pairs_per_client: u32,
    success_fraction: f64,
}

impl ThroughputContext {
    pub async fn connect(server: SocketAddr, config: &Config) -> Result<Self, HarnessError> {
        let client_config = config.client_config();
        Ok(Self {
            server,
            control: ProtocolClient::connect(server, &client_config).await?,
            client_config,
            pairs_per_client: config.throughput.pairs_per_client,
            success_fraction: config.throughput.success_fraction,
        })
    }
}

/// One concurrency level.
#[derive(Debug, Clone, Copy)]
pub struct ConcurrencyLevel {
    pub clients: usize,
}

impl Scenario<ThroughputContext> for ConcurrencyLevel {
    fn name(&self) -> String {
        format!("Throughput with {} clients", self.clients)
    }

    async fn run(
        &self,
        ctx: &mut ThroughputContext,
        log: &mut Log,
    ) -> Result<Outcome, HarnessError> {
        conclude(measure(ctx, self.clients, log).await)
    }
}

/// Run every concurrency level against `server`, then the stress level.
pub async fn run(server: SocketAddr, config: &Config) -> Result<Report, HarnessError> {
    let mut runner = SuiteRunner::new(
        format!("THROUGHPUT TESTS ON {server}"),
        config.suite_deadline(),
    );
    let mut ctx = ThroughputContext::connect(server, config).await?;

    let levels: Vec<_> = config
        .throughput
        .levels
        .iter()
        .map(|&clients| ConcurrencyLevel { clients })
        .collect();
    let missed = runner.run_all(&levels, &mut ctx).await;

    if let Some(clients) = config.throughput.stress_level {
        let stress = [ConcurrencyLevel { clients }];
        if missed == 0 {
            runner.run_all(&stress, &mut ctx).await;
        } else {
            runner.skip_all::<ThroughputContext, _>(&stress, "a lower level did not pass");
        }
    }

    Ok(runner.finish())
}

async fn measure(ctx: &mut ThroughputContext, clients: usize, log: &mut Log) -> Step<Outcome> {
    wipe(&mut ctx.control).await?;

    let tally = Arc::new(Tally::new());
    let pairs = ctx.pairs_per_client;
    let started = Instant::now();

    // Dropping the set aborts the clients, so a cancelled level stops sending.
    let mut workers = JoinSet::new();
    for index in 0..clients {
        let tally = Arc::clone(&tally);
        let config = ctx.client_config.clone();
        let server = ctx.server;
        let first_key = (index as u32).wrapping_mul(pairs);
        workers.spawn(async move {
            let result = put_get_pairs(server, &config, first_key, pairs, &tally).await;
            (index, result)
        });
    }

    let mut broken = Vec::new();
    while let Some(joined) = workers.join_next().await {
        match joined {
            Ok((_, Ok(()))) => {}
            Ok((index, Err(e))) => broken.push(format!("client {index}: {e}")),
            Err(e) => broken.push(format!("client task: {e}")),
        }
    }
    broken.sort();

    let metrics = LevelMetrics {
        tally: tally.snapshot(),
        elapsed: started.elapsed(),
    };
    metrics.write_to(log);

    if !broken.is_empty() {
        return fail(format!(
            "{} of {clients} clients did not finish: {}",
            broken.len(),
            broken.join("; ")
        ));
    }

    let attempted = 2 * u64::from(pairs) * clients as u64;
    let required = ctx.success_fraction * attempted as f64;
    let summary = format!("{} of {attempted} requests succeeded", metrics.tally.successes);
    if metrics.tally.successes as f64 > required {
        Ok(Outcome::passed(summary))
    } else {
        fail(format!("{summary}, needed more than {required:.0}"))
    }
}

async fn put_get_pairs(
    server: SocketAddr,
    config: &ClientConfig,
    first_key: u32,
    pairs: u32,
    tally: &Tally,
) -> Result<(), ClientError> {
    let mut client = ProtocolClient::connect(server, config).await?;
    for i in 0..pairs {
        let key = first_key.wrapping_add(i).to_be_bytes();
        count(tally, &client.put(&key, VALUE).await?);
        count(tally, &client.get(&key).await?);
    }
    Ok(())
}

fn count(tally: &Tally, reply: &Reply) {
    match reply {
        Reply::Received(r) if r.is_okay() => tally.add(1, 0, 0),
        Reply::Received(_) => tally.add(0, 1, 0),
        Reply::TimedOut => tally.add(0, 0, 1),
    }
}

/// What one level measured.
#[derive(Debug, Clone, Copy)]
pub struct LevelMetrics {
    pub tally: TallySnapshot,
    pub elapsed: Duration,
}

impl LevelMetrics {
    /// Wall time per reply received, in milliseconds.
    pub fn average_latency_ms(&self) -> Option<f64> {
        let responses = self.tally.responses();
        (responses > 0).then(|| self.elapsed.as_secs_f64() * 1000.0 / responses as f64)
    }

    /// Replies per second, good or bad.
    pub fn throughput(&self) -> f64 {
        per_second(self.tally.responses(), self.elapsed)
    }

    /// OKAY replies per second.
    pub fn goodput(&self) -> f64 {
        per_second(self.tally.successes, self.elapsed)
    }

    fn write_to(&self, log: &mut Log) {
        log.line(format!(
            "Completed in {:.3} ms",
            self.elapsed.as_secs_f64() * 1000.0
        ));
        log.line(format!("Requests sent      : {}", self.tally.attempts()));
        log.line(format!("Responses received : {}", self.tally.responses()));
        log.line(format!("Successful requests: {}", self.tally.successes));
        log.line(format!("Failed requests    : {}", self.tally.failures));
        log.line(format!("Timed out requests : {}", self.tally.timeouts));
        match self.average_latency_ms() {
            Some(ms) => log.line(format!("Average time per request: {ms:.3} ms")),
            None => log.line("Average time per request: n/a"),
        }
        log.line(format!("Throughput: {:.2} requests/s", self.throughput()));
        log.line(format!("Goodput   : {:.2} requests/s", self.goodput()));
    }
}

fn per_second(count: u64, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if secs > 0.0 { count as f64 / secs } else { 0.0 }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metrics_from_tally() {
        let metrics = LevelMetrics {
            tally: TallySnapshot {
                successes: 150,
                failures: 50,
                timeouts: 10,
            },
            elapsed: Duration::from_secs(2),
        };
        assert_eq!(metrics.average_latency_ms(), Some(10.0));
        assert_eq!(metrics.throughput(), 100.0);
        assert_eq!(metrics.goodput(), 75.0);
    }

    #[test]
    fn silent_level_has_no_latency() {
        let metrics = LevelMetrics {
            tally: TallySnapshot {
                timeouts: 20,
                ..TallySnapshot::default()
            },
            elapsed: Duration::ZERO,
        };
        assert_eq!(metrics.average_latency_ms(), None);
        assert_eq!(metrics.throughput(), 0.0);
    }
}
