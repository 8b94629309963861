//! Opt-in SHUTDOWN probe.
//!
//! Sends SHUTDOWN and then expects the server to stop answering
//! heartbeats. This kills the target, so it only runs when asked for.

use crate::config::Config;
use crate::node::confirm_alive;
use crate::report::{Log, Report};
use crate::suite::{Scenario, SuiteRunner};
use crate::HarnessError;
use kvprobe_client::ProtocolClient;
use kvprobe_core::Outcome;
use std::net::SocketAddr;

/// Sends SHUTDOWN, then checks that heartbeats go unanswered.
pub struct ShutdownProbe {
    pub heartbeats: u32,
}

impl Scenario<ProtocolClient> for ShutdownProbe {
    fn name(&self) -> String {
        "Shutdown".into()
    }

    async fn run(&self, client: &mut ProtocolClient, log: &mut Log) -> Result<Outcome, HarnessError> {
        // A server that exits right away has no chance to answer.
        if let Some(response) = client.shutdown().await?.response() {
            log.line(format!("SHUTDOWN answered with {}", response.error_code));
        }
        if confirm_alive(client, self.heartbeats).await? {
            return Ok(Outcome::failed("server still answers heartbeats after SHUTDOWN"));
        }
        Ok(Outcome::passed(""))
    }
}

/// Shut `server` down and report whether it went quiet.
pub async fn run(server: SocketAddr, config: &Config) -> Result<Report, HarnessError> {
    let mut runner = SuiteRunner::new(format!("SHUTDOWN OF {server}"), config.suite_deadline());
    let mut client = ProtocolClient::connect(server, &config.client_config()).await?;
    let probe = ShutdownProbe {
        heartbeats: config.single_node.liveness_retries,
    };
    runner.run(&probe, &mut client).await;
    Ok(runner.finish())
}
