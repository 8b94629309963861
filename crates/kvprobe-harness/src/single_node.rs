//! Conformance suite against one server.
//!
//! Runs in four stages:
//!
//! 1. liveness: heartbeat, pid, membership count and an unknown command.
//!    If more of these miss than the configured limit the suite stops, since
//!    nothing further can be judged against a server that is not answering;
//! 2. functional checks of PUT, GET, REMOVE and WIPEOUT semantics, size
//!    limits, and silence on corrupted datagrams;
//! 3. capacity: the store must take the configured number of 8 KiB entries
//!    and then report NO_SPACE while staying alive;
//! 4. stress, only when capacity passed: repeated fill-and-wipe cycles and a
//!    GET storm.
//!
//! Every scenario clears what it needs with WIPEOUT first, so the order only
//! matters for the stage gates.

use crate::config::{Config, SingleNodeConfig};
use crate::node::{confirm_alive, index_key, wipe};
use crate::report::{Log, Report};
use crate::suite::{
    Scenario, Step, SuiteRunner, conclude, expect_code, expect_fields, expect_rejected, fail,
    received, undecided,
};
use crate::HarnessError;
use kvprobe_client::{ClientConfig, ClientError, ProtocolClient, Reply};
use kvprobe_core::frame::{self, MESSAGE_ID_LEN};
use kvprobe_core::{
    Command, ErrorCode, MAX_KEY_LEN, MAX_VALUE_LEN, Outcome, Request, ResponseField,
};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::time::Instant;

/// Size of each entry stored by the capacity scenarios.
pub const CAPACITY_VALUE_LEN: usize = 8184;

const GARBAGE: &[u8] = b"this is not a protobuf envelope";

const OVERLOAD_RETRIES: u32 = 5;
const MAX_OVERLOAD_WAIT: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SingleNodeScenario {
    IsAlive,
    GetPid,
    GetMembershipCount,
    UnknownCommand,
    PutGetRemove,
    OverwriteWithVersion,
    AbsentKey,
    ExtraArguments,
    BoundarySizes,
    OversizedKeyValue,
    Wipeout,
    GarbageDatagram,
    BadChecksum,
    Capacity,
    OutOfSpace,
    CapacityStress,
    GetStorm,
}

impl SingleNodeScenario {
    /// Checks that gate the rest of the suite.
    pub const LIVENESS: [Self; 4] = [
        Self::IsAlive,
        Self::GetPid,
        Self::GetMembershipCount,
        Self::UnknownCommand,
    ];

    pub const FUNCTIONAL: [Self; 9] = [
        Self::PutGetRemove,
        Self::OverwriteWithVersion,
        Self::AbsentKey,
        Self::ExtraArguments,
        Self::BoundarySizes,
        Self::OversizedKeyValue,
        Self::Wipeout,
        Self::GarbageDatagram,
        Self::BadChecksum,
    ];

    pub const CAPACITY: [Self; 2] = [Self::Capacity, Self::OutOfSpace];

    /// Only run once both capacity checks pass.
    pub const STRESS: [Self; 2] = [Self::CapacityStress, Self::GetStorm];
}

/// Client and settings shared by the single-node scenarios.
pub struct SingleNodeContext {
    client: ProtocolClient,
    client_config: ClientConfig,
    config: SingleNodeConfig,
}

impl SingleNodeContext {
    pub async fn connect(server: SocketAddr, config: &Config) -> Result<Self, HarnessError> {
        let client_config = config.client_config();
        Ok(Self {
            client: ProtocolClient::connect(server, &client_config).await?,
            client_config,
            config: config.single_node.clone(),
        })
    }

    /// A separate endpoint for probes that must not disturb the main one.
    async fn probe_client(&self) -> Result<ProtocolClient, HarnessError> {
        Ok(ProtocolClient::connect(self.client.server(), &self.client_config).await?)
    }
}

impl Scenario<SingleNodeContext> for SingleNodeScenario {
    fn name(&self) -> String {
        format!("{self:?}")
    }

    async fn run(
        &self,
        ctx: &mut SingleNodeContext,
        log: &mut Log,
    ) -> Result<Outcome, HarnessError> {
        conclude(match self {
            Self::IsAlive => is_alive(ctx).await,
            Self::GetPid => get_pid(ctx, log).await,
            Self::GetMembershipCount => get_membership_count(ctx).await,
            Self::UnknownCommand => unknown_command(ctx).await,
            Self::PutGetRemove => put_get_remove(ctx).await,
            Self::OverwriteWithVersion => overwrite_with_version(ctx).await,
            Self::AbsentKey => absent_key(ctx).await,
            Self::ExtraArguments => extra_arguments(ctx, log).await,
            Self::BoundarySizes => boundary_sizes(ctx).await,
            Self::OversizedKeyValue => oversized_key_value(ctx).await,
            Self::Wipeout => wipeout(ctx).await,
            Self::GarbageDatagram => garbage_datagram(ctx).await,
            Self::BadChecksum => bad_checksum(ctx).await,
            Self::Capacity => capacity(ctx, log).await,
            Self::OutOfSpace => out_of_space(ctx, log).await,
            Self::CapacityStress => capacity_stress(ctx, log).await,
            Self::GetStorm => get_storm(ctx, log).await,
        })
    }
}

/// Run the whole suite against `server`.
pub async fn run(server: SocketAddr, config: &Config) -> Result<Report, HarnessError> {
    let mut runner = SuiteRunner::new(
        format!("SINGLE-NODE TESTS ON {server}"),
        config.suite_deadline(),
    );
    let mut ctx = SingleNodeContext::connect(server, config).await?;

    let missed = runner
        .run_all(&SingleNodeScenario::LIVENESS, &mut ctx)
        .await;
    if missed > ctx.config.abort_after_failures {
        runner.note(format!(
            "{missed} liveness checks did not pass. Aborting."
        ));
        return Ok(runner.finish());
    }

    match ctx.client.wipeout().await {
        Ok(Reply::Received(response)) if response.is_okay() => {}
        Ok(Reply::Received(response)) => runner.note(format!(
            "Initial WIPEOUT returned {}; continuing",
            response.error_code
        )),
        Ok(Reply::TimedOut) => runner.note("Initial WIPEOUT got no reply; continuing"),
        Err(e) => runner.note(format!("Initial WIPEOUT failed: {e}; continuing")),
    }

    runner
        .run_all(&SingleNodeScenario::FUNCTIONAL, &mut ctx)
        .await;

    let missed = runner
        .run_all(&SingleNodeScenario::CAPACITY, &mut ctx)
        .await;
    if missed == 0 {
        runner.run_all(&SingleNodeScenario::STRESS, &mut ctx).await;
    } else {
        runner.skip_all::<SingleNodeContext, _>(
            &SingleNodeScenario::STRESS,
            "capacity checks did not pass",
        );
    }

    Ok(runner.finish())
}

async fn is_alive(ctx: &mut SingleNodeContext) -> Step<Outcome> {
    let response = expect_code(ctx.client.is_alive().await?, ErrorCode::Okay, "IS_ALIVE")?;
    expect_fields(&response, &[], "IS_ALIVE")?;
    Ok(Outcome::passed(""))
}

async fn get_pid(ctx: &mut SingleNodeContext, log: &mut Log) -> Step<Outcome> {
    let response = expect_code(ctx.client.get_pid().await?, ErrorCode::Okay, "GET_PID")?;
    expect_fields(&response, &[ResponseField::Pid], "GET_PID")?;
    log.line(format!("Server pid: {}", response.pid.unwrap_or_default()));
    Ok(Outcome::passed(""))
}

async fn get_membership_count(ctx: &mut SingleNodeContext) -> Step<Outcome> {
    let what = "GET_MEMBERSHIP_COUNT";
    let response = expect_code(
        ctx.client.get_membership_count().await?,
        ErrorCode::Okay,
        what,
    )?;
    expect_fields(&response, &[ResponseField::MembershipCount], what)?;

    let expected = ctx.config.expected_membership_count;
    if response.membership_count != Some(expected) {
        return fail(format!(
            "{what}: expected {expected}, got {}",
            response.membership_count.unwrap_or_default()
        ));
    }
    Ok(Outcome::passed(""))
}

async fn unknown_command(ctx: &mut SingleNodeContext) -> Step<Outcome> {
    let what = "unknown command";
    let reply = ctx.client.send(&Request::new(Command::Invalid)).await?;
    let response = expect_code(reply, ErrorCode::BadCommand, what)?;
    expect_fields(&response, &[], what)?;
    Ok(Outcome::passed(""))
}

async fn put_get_remove(ctx: &mut SingleNodeContext) -> Step<Outcome> {
    let key: &[u8] = b"pride";
    let value: &[u8] = b"prejudice";
    let client = &mut ctx.client;

    let response = expect_code(client.put(key, value).await?, ErrorCode::Okay, "PUT")?;
    expect_fields(&response, &[], "PUT")?;

    let response = expect_code(client.get(key).await?, ErrorCode::Okay, "GET")?;
    expect_fields(
        &response,
        &[ResponseField::Value, ResponseField::Version],
        "GET",
    )?;
    if response.value.as_deref() != Some(value) {
        return fail("GET: value differs from the one stored");
    }
    if response.version != Some(0) {
        return fail(format!(
            "GET: expected version 0 for an unversioned PUT, got {}",
            response.version.unwrap_or_default()
        ));
    }

    let response = expect_code(client.remove(key).await?, ErrorCode::Okay, "REMOVE")?;
    expect_fields(&response, &[], "REMOVE")?;

    expect_code(client.get(key).await?, ErrorCode::NoKey, "GET after REMOVE")?;
    Ok(Outcome::passed(""))
}

async fn overwrite_with_version(ctx: &mut SingleNodeContext) -> Step<Outcome> {
    let key: &[u8] = b"romeo";
    let client = &mut ctx.client;

    expect_code(client.put(key, b"juliet").await?, ErrorCode::Okay, "first PUT")?;
    let response = expect_code(client.get(key).await?, ErrorCode::Okay, "first GET")?;
    let observed = response.version.unwrap_or_default();
    if observed != 0 {
        return fail(format!(
            "first GET: expected version 0 for an unversioned PUT, got {observed}"
        ));
    }

    let next = observed + 1;
    expect_code(
        client.put_versioned(key, b"rosaline", next).await?,
        ErrorCode::Okay,
        "versioned PUT",
    )?;
    let response = expect_code(client.get(key).await?, ErrorCode::Okay, "second GET")?;
    if response.value.as_deref() != Some(b"rosaline".as_slice()) {
        return fail("second GET: overwritten value was not replaced");
    }
    if response.version != Some(next) {
        return fail(format!(
            "second GET: expected version {next}, got {}",
            response.version.unwrap_or_default()
        ));
    }
    Ok(Outcome::passed(""))
}

async fn absent_key(ctx: &mut SingleNodeContext) -> Step<Outcome> {
    let key: &[u8] = b"never-stored";
    let client = &mut ctx.client;
    expect_code(client.get(key).await?, ErrorCode::NoKey, "GET of absent key")?;
    expect_code(client.remove(key).await?, ErrorCode::NoKey, "REMOVE of absent key")?;
    Ok(Outcome::passed(""))
}

async fn extra_arguments(ctx: &mut SingleNodeContext, log: &mut Log) -> Step<Outcome> {
    let key: &[u8] = b"war";
    let client = &mut ctx.client;
    expect_code(client.put(key, b"peace").await?, ErrorCode::Okay, "PUT")?;

    let reply = client
        .send(&Request::get(key).with_value(b"peace".as_slice()))
        .await?;
    let response = expect_rejected(reply, "GET carrying a value")?;
    log.line(format!("GET carrying a value: {}", response.error_code));

    let reply = client.send(&Request::get(key).with_version(1)).await?;
    let response = expect_rejected(reply, "GET carrying a version")?;
    log.line(format!("GET carrying a version: {}", response.error_code));

    Ok(Outcome::passed(""))
}

async fn boundary_sizes(ctx: &mut SingleNodeContext) -> Step<Outcome> {
    let key = vec![b'k'; MAX_KEY_LEN];
    let value = vec![b'v'; MAX_VALUE_LEN];
    let client = &mut ctx.client;

    expect_code(
        client.put(&key, &value).await?,
        ErrorCode::Okay,
        "PUT of largest key and value",
    )?;
    let response = expect_code(
        client.get(&key).await?,
        ErrorCode::Okay,
        "GET of largest key and value",
    )?;
    if response.value.as_deref() != Some(value.as_slice()) {
        return fail("GET of largest key and value: value came back altered");
    }
    Ok(Outcome::passed(""))
}

async fn oversized_key_value(ctx: &mut SingleNodeContext) -> Step<Outcome> {
    let client = &mut ctx.client;

    let key = vec![b'k'; MAX_KEY_LEN + 1];
    expect_code(
        client.put(&key, b"value").await?,
        ErrorCode::BadKey,
        &format!("PUT with {}-byte key", key.len()),
    )?;

    for len in [MAX_VALUE_LEN + 1, ctx.config.oversized_value_len] {
        let value = vec![b'v'; len];
        expect_code(
            client.put(b"oversized", &value).await?,
            ErrorCode::BadValue,
            &format!("PUT with {len}-byte value"),
        )?;
    }
    Ok(Outcome::passed(""))
}

async fn wipeout(ctx: &mut SingleNodeContext) -> Step<Outcome> {
    let client = &mut ctx.client;
    for i in 1..=3 {
        expect_code(
            client.put(&index_key(i), b"doomed").await?,
            ErrorCode::Okay,
            &format!("PUT {i}"),
        )?;
    }
    let response = expect_code(client.wipeout().await?, ErrorCode::Okay, "WIPEOUT")?;
    expect_fields(&response, &[], "WIPEOUT")?;
    for i in 1..=3 {
        expect_code(
            client.get(&index_key(i)).await?,
            ErrorCode::NoKey,
            &format!("GET {i} after WIPEOUT"),
        )?;
    }
    Ok(Outcome::passed(""))
}

async fn garbage_datagram(ctx: &mut SingleNodeContext) -> Step<Outcome> {
    let mut probe = ctx.probe_client().await?;
    expect_silence(&mut probe, GARBAGE, &ctx.config, "garbage datagram").await?;
    expect_alive(&mut probe, &ctx.config, "garbage datagram").await?;
    Ok(Outcome::passed(""))
}

async fn bad_checksum(ctx: &mut SingleNodeContext) -> Step<Outcome> {
    let mut probe = ctx.probe_client().await?;
    let payload = probe
        .codec()
        .encode_request(&Request::new(Command::IsAlive));
    let id = [0x5a; MESSAGE_ID_LEN];
    let wrong = frame::checksum(&id, &payload).wrapping_add(1);
    let datagram = frame::encode_with_checksum(&id, &payload, wrong);

    expect_silence(&mut probe, &datagram, &ctx.config, "corrupted checksum").await?;
    expect_alive(&mut probe, &ctx.config, "corrupted checksum").await?;
    Ok(Outcome::passed(""))
}

/// The server must not answer `datagram`, however often it is sent.
async fn expect_silence(
    probe: &mut ProtocolClient,
    datagram: &[u8],
    config: &SingleNodeConfig,
    what: &str,
) -> Step<()> {
    let wait = Duration::from_millis(config.silence_wait_ms);
    for _ in 0..config.silence_attempts {
        if let Some(answer) = probe.send_raw(datagram, wait).await? {
            return fail(format!(
                "server answered a {what} with {} bytes",
                answer.len()
            ));
        }
    }
    Ok(())
}

/// Silence alone proves nothing; the server must still answer heartbeats.
async fn expect_alive(
    probe: &mut ProtocolClient,
    config: &SingleNodeConfig,
    what: &str,
) -> Step<()> {
    if !confirm_alive(probe, config.liveness_retries).await? {
        return fail(format!("server stopped answering after a {what}"));
    }
    Ok(())
}

fn capacity_value() -> Vec<u8> {
    let filler = b"kvprobe capacity entry ";
    filler
        .iter()
        .copied()
        .cycle()
        .take(CAPACITY_VALUE_LEN)
        .collect()
}

/// PUT that retries while the server reports TEMP_OVERLOAD, waiting as long
/// as the reply asks.
async fn put_patiently(
    client: &mut ProtocolClient,
    key: &[u8],
    value: &[u8],
) -> Result<Reply, ClientError> {
    let mut retries = 0;
    loop {
        let reply = client.put(key, value).await?;
        match &reply {
            Reply::Received(r)
                if r.error_code == ErrorCode::TempOverload && retries < OVERLOAD_RETRIES =>
            {
                retries += 1;
                let wait = r.overload_wait_time.map_or(0, |ms| u64::try_from(ms).unwrap_or(0));
                tokio::time::sleep(Duration::from_millis(wait).min(MAX_OVERLOAD_WAIT)).await;
            }
            _ => return Ok(reply),
        }
    }
}

async fn fill(client: &mut ProtocolClient, count: u32, value: &[u8]) -> Step<()> {
    for i in 1..=count {
        let reply = put_patiently(client, &index_key(i), value).await?;
        expect_code(reply, ErrorCode::Okay, &format!("PUT of entry {i} of {count}"))?;
    }
    Ok(())
}

async fn capacity(ctx: &mut SingleNodeContext, log: &mut Log) -> Step<Outcome> {
    wipe(&mut ctx.client).await?;
    let count = ctx.config.capacity_entries;
    fill(&mut ctx.client, count, &capacity_value()).await?;
    log.line(format!(
        "Stored {count} entries of {CAPACITY_VALUE_LEN} bytes ({} KiB)",
        u64::from(count) * CAPACITY_VALUE_LEN as u64 / 1024
    ));
    Ok(Outcome::passed(""))
}

async fn out_of_space(ctx: &mut SingleNodeContext, log: &mut Log) -> Step<Outcome> {
    wipe(&mut ctx.client).await?;
    let value = capacity_value();
    let limit = ctx.config.overflow_attempts;

    let mut stored = 0;
    for i in 1..=limit {
        if !put_patiently(&mut ctx.client, &index_key(i), &value)
            .await?
            .is_okay()
        {
            break;
        }
        stored = i;
    }
    log.line(format!(
        "Server stored {stored} entries ({} KiB) before refusing",
        u64::from(stored) * CAPACITY_VALUE_LEN as u64 / 1024
    ));

    if !confirm_alive(&mut ctx.client, ctx.config.liveness_retries).await? {
        return fail("server stopped answering after running out of space");
    }
    if stored < ctx.config.capacity_entries {
        return undecided(format!(
            "server refused after {stored} entries, fewer than the {} it must hold",
            ctx.config.capacity_entries
        ));
    }
    if stored == limit {
        return undecided(format!(
            "server accepted all {limit} entries without running out of space"
        ));
    }

    let response = received(
        put_patiently(&mut ctx.client, b"one-too-many", &value).await?,
        "PUT past capacity",
    )?;
    if response.error_code != ErrorCode::NoSpace {
        return undecided(format!(
            "PUT past capacity: expected NO_SPACE, got {}",
            response.error_code
        ));
    }
    Ok(Outcome::passed(""))
}

async fn capacity_stress(ctx: &mut SingleNodeContext, log: &mut Log) -> Step<Outcome> {
    tokio::time::sleep(Duration::from_millis(ctx.config.cooldown_ms)).await;
    let value = capacity_value();
    let rounds = ctx.config.stress_iterations;
    let mut next_key: u32 = 1;

    for round in 1..=rounds {
        wipe(&mut ctx.client).await?;

        let mut stored = 0;
        while stored < ctx.config.stress_fill_limit {
            let reply = put_patiently(&mut ctx.client, &index_key(next_key), &value).await?;
            next_key = next_key.wrapping_add(1);
            match reply {
                Reply::Received(r) if r.is_okay() => stored += 1,
                Reply::TimedOut => break,
                Reply::Received(r) if r.error_code == ErrorCode::NoSpace => break,
                // Still answering, so the liveness check below decides.
                Reply::Received(r) => {
                    log.line(format!(
                        "round {round}: PUT returned {} after {stored} entries",
                        r.error_code
                    ));
                    break;
                }
            }
        }
        tracing::debug!(round, stored, "fill cycle done");

        if !confirm_alive(&mut ctx.client, ctx.config.liveness_retries).await? {
            return fail(format!("server stopped answering in round {round}"));
        }
    }
    log.line(format!("Completed {rounds} fill-and-wipe rounds"));

    wipe(&mut ctx.client).await?;
    fill(&mut ctx.client, ctx.config.capacity_entries, &value).await?;
    Ok(Outcome::passed(""))
}

async fn get_storm(ctx: &mut SingleNodeContext, log: &mut Log) -> Step<Outcome> {
    wipe(&mut ctx.client).await?;
    tokio::time::sleep(Duration::from_millis(ctx.config.cooldown_ms)).await;

    let entries = ctx.config.capacity_entries;
    fill(&mut ctx.client, entries, &capacity_value()).await?;

    let total = ctx.config.get_storm;
    let (mut okay, mut errors, mut lost) = (0u32, 0u32, 0u32);
    let started = Instant::now();
    for i in 0..total {
        match ctx.client.get(&index_key(i % entries + 1)).await? {
            Reply::Received(r) if r.is_okay() => okay += 1,
            Reply::Received(_) => errors += 1,
            Reply::TimedOut => lost += 1,
        }
    }
    log.line(format!(
        "Issued {total} GETs in {:.3} ms: {okay} OKAY, {errors} errors, {lost} timeouts",
        started.elapsed().as_secs_f64() * 1000.0
    ));

    if !confirm_alive(&mut ctx.client, ctx.config.liveness_retries).await? {
        return fail("server stopped answering after the GET storm");
    }
    Ok(Outcome::passed(""))
}
