//! Protocol client for datagram key-value servers.
//!
//! A [`ProtocolClient`] owns one UDP endpoint. Each call to
//! [`ProtocolClient::send`] stamps the request with a fresh random message
//! ID, wraps it in a checksummed envelope and waits up to the configured
//! timeout for a reply carrying the same ID. Replies with a foreign ID or a
//! bad checksum are dropped and waiting continues.
//!
//! There are no hidden retries. A lost request or reply is reported as
//! [`Reply::TimedOut`] and the caller decides whether asking again is safe.

mod error;

pub use error::ClientError;

use kvprobe_core::frame::{self, MAX_DATAGRAM_SIZE, MESSAGE_ID_LEN};
use kvprobe_core::{Command, KeyValueCodec, Request, Response, WireCodes};
use rand::Rng;
use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::time::Instant;

/// Default time to wait for a matching reply.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(1000);

/// Client settings.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// How long one request waits for its reply.
    pub timeout: Duration,
    /// Wire numbering of commands and error codes.
    pub codes: WireCodes,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            codes: WireCodes::default(),
        }
    }
}

/// Result of one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// A reply with the request's ID and a valid checksum arrived in time.
    Received(Response),
    /// Nothing acceptable arrived before the deadline.
    TimedOut,
}

impl Reply {
    /// The response, if one arrived.
    pub fn response(&self) -> Option<&Response> {
        match self {
            Reply::Received(response) => Some(response),
            Reply::TimedOut => None,
        }
    }

    /// Whether nothing acceptable arrived in time.
    pub fn is_timed_out(&self) -> bool {
        matches!(self, Reply::TimedOut)
    }

    /// Whether a reply arrived and reported OKAY.
    pub fn is_okay(&self) -> bool {
        self.response().is_some_and(Response::is_okay)
    }
}

/// One transport endpoint talking to one server.
///
/// Methods take `&mut self`: a client serves a single caller at a time.
/// Concurrent actors each open their own client.
pub struct ProtocolClient {
    socket: UdpSocket,
    server: SocketAddr,
    codec: KeyValueCodec,
    timeout: Duration,
    buf: Vec<u8>,
}

impl ProtocolClient {
    /// Bind a fresh ephemeral port for talking to `server`.
    pub async fn connect(server: SocketAddr, config: &ClientConfig) -> Result<Self, ClientError> {
        let local: SocketAddr = if server.is_ipv4() {
            (Ipv4Addr::UNSPECIFIED, 0).into()
        } else {
            (Ipv6Addr::UNSPECIFIED, 0).into()
        };
        let socket = UdpSocket::bind(local).await.map_err(ClientError::Bind)?;
        tracing::debug!(
            "client {:?} bound for server {}",
            socket.local_addr().ok(),
            server
        );

        Ok(Self {
            socket,
            server,
            codec: KeyValueCodec::new(config.codes.clone()),
            timeout: config.timeout,
            buf: vec![0u8; MAX_DATAGRAM_SIZE],
        })
    }

    /// Address every request goes to.
    pub fn server(&self) -> SocketAddr {
        self.server
    }

    /// Payload codec built from the configured wire codes.
    pub fn codec(&self) -> &KeyValueCodec {
        &self.codec
    }

    /// Send one request and wait for its reply.
    pub async fn send(&mut self, request: &Request) -> Result<Reply, ClientError> {
        let id = new_message_id();
        let payload = self.codec.encode_request(request);
        self.transmit(&frame::encode(&id, &payload)).await?;

        let deadline = Instant::now() + self.timeout;
        loop {
            let Some(len) = self.receive_until(deadline).await? else {
                tracing::debug!("{:?} to {} timed out", request.command, self.server);
                return Ok(Reply::TimedOut);
            };

            let Some(frame) = frame::decode(&self.buf[..len]) else {
                tracing::debug!("dropping {} byte datagram that is not an envelope", len);
                continue;
            };
            if !frame.checksum_ok {
                tracing::warn!("dropping reply with bad checksum from {}", self.server);
                continue;
            }
            if frame.id != id {
                tracing::debug!("dropping stale reply with foreign message id");
                continue;
            }

            match self.codec.decode_response(&frame.payload) {
                Ok(response) => return Ok(Reply::Received(response)),
                Err(e) => {
                    tracing::warn!("dropping matched reply with undecodable payload: {}", e);
                }
            }
        }
    }

    /// Send arbitrary bytes and report whatever datagram comes back within
    /// `wait`, if any. No correlation or validation is applied.
    pub async fn send_raw(
        &mut self,
        datagram: &[u8],
        wait: Duration,
    ) -> Result<Option<Vec<u8>>, ClientError> {
        self.transmit(datagram).await?;
        let deadline = Instant::now() + wait;
        Ok(self
            .receive_until(deadline)
            .await?
            .map(|len| self.buf[..len].to_vec()))
    }

    /// IS_ALIVE heartbeat.
    pub async fn is_alive(&mut self) -> Result<Reply, ClientError> {
        self.send(&Request::new(Command::IsAlive)).await
    }

    /// Ask for the server process id.
    pub async fn get_pid(&mut self) -> Result<Reply, ClientError> {
        self.send(&Request::new(Command::GetPid)).await
    }

    /// Ask how many nodes the server believes are in its cluster.
    pub async fn get_membership_count(&mut self) -> Result<Reply, ClientError> {
        self.send(&Request::new(Command::GetMembershipCount)).await
    }

    /// Store `value` under `key` without a version.
    pub async fn put(&mut self, key: &[u8], value: &[u8]) -> Result<Reply, ClientError> {
        self.send(&Request::put(key, value)).await
    }

    /// Store `value` under `key` tagged with `version`.
    pub async fn put_versioned(
        &mut self,
        key: &[u8],
        value: &[u8],
        version: i32,
    ) -> Result<Reply, ClientError> {
        self.send(&Request::put(key, value).with_version(version))
            .await
    }

    /// Fetch the value and version stored under `key`.
    pub async fn get(&mut self, key: &[u8]) -> Result<Reply, ClientError> {
        self.send(&Request::get(key)).await
    }

    pub async fn remove(&mut self, key: &[u8]) -> Result<Reply, ClientError> {
        self.send(&Request::remove(key)).await
    }

    /// Drop every entry on the server.
    pub async fn wipeout(&mut self) -> Result<Reply, ClientError> {
        self.send(&Request::new(Command::Wipeout)).await
    }

    /// Ask the server to exit. A conforming server does not reply.
    pub async fn shutdown(&mut self) -> Result<Reply, ClientError> {
        self.send(&Request::new(Command::Shutdown)).await
    }

    async fn transmit(&self, datagram: &[u8]) -> Result<(), ClientError> {
        if datagram.len() > MAX_DATAGRAM_SIZE {
            return Err(ClientError::DatagramTooLarge {
                size: datagram.len(),
                max: MAX_DATAGRAM_SIZE,
            });
        }
        self.socket
            .send_to(datagram, self.server)
            .await
            .map_err(|source| ClientError::Send {
                server: self.server,
                source,
            })?;
        Ok(())
    }

    /// Wait for the next datagram; `None` once the deadline passes.
    async fn receive_until(&mut self, deadline: Instant) -> Result<Option<usize>, ClientError> {
        loop {
            match tokio::time::timeout_at(deadline, self.socket.recv_from(&mut self.buf)).await {
                Err(_elapsed) => return Ok(None),
                Ok(Ok((len, _from))) => return Ok(Some(len)),
                // ICMP unreachable surfacing on the socket; the server is
                // simply not answering.
                Ok(Err(e)) if is_transient(&e) => {
                    tracing::debug!("ignoring transient receive error: {}", e);
                }
                Ok(Err(e)) => return Err(ClientError::Receive(e)),
            }
        }
    }
}

fn is_transient(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionRefused | io::ErrorKind::ConnectionReset
    )
}

fn new_message_id() -> [u8; MESSAGE_ID_LEN] {
    let mut id = [0u8; MESSAGE_ID_LEN];
    rand::rng().fill(&mut id);
    id
}
