//! Helpers shared by every suite that talks to a server.

use crate::suite::{Step, received, undecided};
use kvprobe_client::{ClientError, ProtocolClient};

/// Heartbeat up to `attempts` times; true on the first OKAY.
pub async fn confirm_alive(client: &mut ProtocolClient, attempts: u32) -> Result<bool, ClientError> {
    for attempt in 1..=attempts.max(1) {
        if client.is_alive().await?.is_okay() {
            return Ok(true);
        }
        tracing::debug!("heartbeat {} of {} to {} unanswered", attempt, attempts, client.server());
    }
    Ok(false)
}

/// Key derived from an index, four bytes big-endian.
pub fn index_key(index: u32) -> [u8; 4] {
    index.to_be_bytes()
}

/// Clear the server before a scenario. Anything but OKAY leaves the
/// server state unknown, so the scenario cannot be judged.
pub(crate) async fn wipe(client: &mut ProtocolClient) -> Step<()> {
    let response = received(client.wipeout().await?, "pre-test WIPEOUT")?;
    if !response.is_okay() {
        return undecided(format!(
            "pre-test WIPEOUT returned {}; server state unknown",
            response.error_code
        ));
    }
    Ok(())
}
