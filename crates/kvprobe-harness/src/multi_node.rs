//! Multi-node consistency suite.
//!
//! Every node is expected to serve one shared keyspace. A key lifecycle
//! writes a fresh key on one node, reads it back from every node, removes it
//! through a different node and checks that every node then reports it gone.
//! Lifecycles run concurrently on a bounded pool and are judged together:
//! any failure fails the scenario, and too many undecided lifecycles make it
//! undecided.

use crate::config::{Config, MultiNodeConfig};
use crate::report::{Log, Report};
use crate::suite::{Scenario, Step, SuiteRunner, conclude, expect_code, fail, undecided};
use crate::HarnessError;
use dashmap::DashMap;
use futures_util::future::join_all;
use kvprobe_client::{ClientConfig, ProtocolClient, Reply};
use kvprobe_core::{ErrorCode, Outcome, SequenceGenerator, Status, StatusCounts};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

const KEY_LEN: usize = 8;
const VALUE_LEN: usize = 16;

/// Nodes under test, with one control client per node.
pub struct Cluster {
    nodes: Arc<[SocketAddr]>,
    client_config: ClientConfig,
    control: Vec<ProtocolClient>,
    config: MultiNodeConfig,
}

impl Cluster {
    /// Open a control client per node. An empty list is an error.
    pub async fn connect(nodes: &[SocketAddr], config: &Config) -> Result<Self, HarnessError> {
        if nodes.is_empty() {
            return Err(HarnessError::NoNodes);
        }
        let client_config = config.client_config();
        let mut control = Vec::with_capacity(nodes.len());
        for &node in nodes {
            control.push(ProtocolClient::connect(node, &client_config).await?);
        }
        Ok(Self {
            nodes: nodes.into(),
            client_config,
            control,
            config: config.multi_node.clone(),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MultiNodeScenario {
    Heartbeat,
    KeyLifecycles,
}

impl MultiNodeScenario {
    pub const ALL: [Self; 2] = [Self::Heartbeat, Self::KeyLifecycles];
}

impl Scenario<Cluster> for MultiNodeScenario {
    fn name(&self) -> String {
        format!("{self:?}")
    }

    async fn run(&self, ctx: &mut Cluster, log: &mut Log) -> Result<Outcome, HarnessError> {
        conclude(match self {
            Self::Heartbeat => heartbeat(ctx).await,
            Self::KeyLifecycles => key_lifecycles(ctx, log).await,
        })
    }
}

/// Run the multi-node suite over `nodes`.
pub async fn run(nodes: &[SocketAddr], config: &Config) -> Result<Report, HarnessError> {
    let mut runner = SuiteRunner::new(
        format!("MULTI-NODE TESTS ON {} NODES", nodes.len()),
        config.suite_deadline(),
    );
    let mut cluster = Cluster::connect(nodes, config).await?;
    for (i, node) in nodes.iter().enumerate() {
        runner.note(format!("node {i}: {node}"));
    }

    runner.run_all(&MultiNodeScenario::ALL, &mut cluster).await;
    Ok(runner.finish())
}

async fn heartbeat(ctx: &mut Cluster) -> Step<Outcome> {
    let replies = join_all(ctx.control.iter_mut().map(|c| c.is_alive())).await;

    let mut silent = Vec::new();
    for (node, reply) in ctx.nodes.iter().zip(replies) {
        match reply? {
            Reply::Received(r) if r.is_okay() => {}
            Reply::Received(r) => {
                return fail(format!("{node} answered IS_ALIVE with {}", r.error_code));
            }
            Reply::TimedOut => silent.push(node.to_string()),
        }
    }
    if !silent.is_empty() {
        return undecided(format!("no heartbeat from {}", silent.join(", ")));
    }
    Ok(Outcome::passed(format!("all {} nodes alive", ctx.nodes.len())))
}

/// State shared by the lifecycle tasks.
struct Shared {
    nodes: Arc<[SocketAddr]>,
    client_config: ClientConfig,
    keys: SequenceGenerator,
    /// What the cluster should hold right now.
    reference: DashMap<Vec<u8>, Vec<u8>>,
}

async fn key_lifecycles(ctx: &mut Cluster, log: &mut Log) -> Step<Outcome> {
    let wiped = join_all(ctx.control.iter_mut().map(|c| c.wipeout())).await;
    for reply in wiped {
        if !reply?.is_okay() {
            return undecided("Could not perform pre-test wipeout. Server states unknown.");
        }
    }

    let nodes = ctx.nodes.len();
    let rounds = ctx.config.keys_per_node;
    let workers = ctx.config.workers;
    log.line(format!(
        "Running {} key lifecycles on {nodes} nodes with {workers} workers",
        rounds * nodes
    ));

    let shared = Arc::new(Shared {
        nodes: Arc::clone(&ctx.nodes),
        client_config: ctx.client_config.clone(),
        keys: SequenceGenerator::new(),
        reference: DashMap::new(),
    });
    let pool = Arc::new(Semaphore::new(workers));

    // Dropping the set aborts every lifecycle still in flight.
    let mut tasks = JoinSet::new();
    for round in 0..rounds {
        for writer in 0..nodes {
            let index = round * nodes + writer;
            let shared = Arc::clone(&shared);
            let pool = Arc::clone(&pool);
            tasks.spawn(async move {
                let Ok(_permit) = pool.acquire_owned().await else {
                    return (index, Ok(Outcome::undecided("worker pool closed")));
                };
                (index, conclude(key_lifecycle(&shared, writer, round).await))
            });
        }
    }

    let mut outcomes = Vec::with_capacity(rounds * nodes);
    while let Some(joined) = tasks.join_next().await {
        outcomes.push(match joined {
            Ok((index, Ok(outcome))) => (Some(index), outcome),
            Ok((index, Err(e))) => (
                Some(index),
                Outcome::failed(format!("lifecycle aborted: {e}")),
            ),
            Err(e) => (
                None,
                Outcome::failed(format!("lifecycle task did not complete: {e}")),
            ),
        });
    }
    outcomes.sort_by_key(|(index, _)| *index);

    let mut counts = StatusCounts::default();
    for (index, outcome) in outcomes {
        if outcome.status != Status::Passed {
            match index {
                Some(index) => log.line(format!("lifecycle {index}: {outcome}")),
                None => log.line(outcome.to_string()),
            }
        }
        counts.record(outcome.status);
    }

    let total = counts.total();
    log.line(format!("Lifecycles passed   : {}/{total}", counts.passed));
    log.line(format!("Lifecycles failed   : {}/{total}", counts.failed));
    log.line(format!("Lifecycles undecided: {}/{total}", counts.undecided));
    if !shared.reference.is_empty() {
        log.line(format!(
            "{} keys were left behind by unfinished lifecycles",
            shared.reference.len()
        ));
    }

    Ok(verdict(counts, ctx.config.undecided_tolerance))
}

async fn key_lifecycle(shared: &Shared, writer: usize, round: usize) -> Step<Outcome> {
    let key = shared.keys.next(KEY_LEN);
    let value = shared.keys.next(VALUE_LEN);

    let mut clients = Vec::with_capacity(shared.nodes.len());
    for &node in shared.nodes.iter() {
        clients.push(ProtocolClient::connect(node, &shared.client_config).await?);
    }

    expect_code(
        clients[writer].put(&key, &value).await?,
        ErrorCode::Okay,
        &format!("PUT on node {writer}"),
    )?;
    if shared.reference.insert(key.clone(), value).is_some() {
        return fail("generated key was already in use");
    }

    for (i, client) in clients.iter_mut().enumerate() {
        let response = expect_code(
            client.get(&key).await?,
            ErrorCode::Okay,
            &format!("GET on node {i} after PUT"),
        )?;
        let expected = shared.reference.get(&key).map(|v| v.value().clone());
        if response.value != expected {
            return fail(format!(
                "node {i} returned a different value than was put on node {writer}"
            ));
        }
    }

    let remover = remover_for(writer, round, clients.len());
    expect_code(
        clients[remover].remove(&key).await?,
        ErrorCode::Okay,
        &format!("REMOVE on node {remover}"),
    )?;
    if shared.reference.remove(&key).is_none() {
        return fail("key disappeared from the reference keyspace");
    }

    for (i, client) in clients.iter_mut().enumerate() {
        expect_code(
            client.get(&key).await?,
            ErrorCode::NoKey,
            &format!("GET on node {i} after REMOVE on node {remover}"),
        )?;
    }
    Ok(Outcome::passed(""))
}

/// Node that removes the key written on `writer`; never the writer itself
/// unless there is only one node.
fn remover_for(writer: usize, round: usize, nodes: usize) -> usize {
    if nodes <= 1 {
        return writer;
    }
    (writer + 1 + round % (nodes - 1)) % nodes
}

/// Combine lifecycle verdicts: one failure fails the run, and more than
/// `tolerance` undecided makes it undecided.
pub fn verdict(counts: StatusCounts, tolerance: f64) -> Outcome {
    let total = counts.total();
    if counts.failed > 0 {
        return Outcome::failed(format!(
            "{} of {total} lifecycles failed",
            counts.failed
        ));
    }
    if counts.undecided as f64 > tolerance * total as f64 {
        return Outcome::undecided(format!(
            "{} of {total} lifecycles undecided, more than {:.0}%",
            counts.undecided,
            tolerance * 100.0
        ));
    }
    Outcome::passed(format!(
        "{} of {total} lifecycles passed, {} undecided",
        counts.passed, counts.undecided
    ))
}
