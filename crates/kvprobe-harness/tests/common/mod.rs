//! In-process UDP key-value servers for exercising the suites.

#![allow(dead_code)]

use kvprobe_core::frame::{self, MAX_DATAGRAM_SIZE};
use kvprobe_core::{
    Command, ErrorCode, KeyValueCodec, MAX_KEY_LEN, MAX_VALUE_LEN, Request, Response,
};
use kvprobe_harness::Config;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::net::UdpSocket;

type Store = Arc<Mutex<HashMap<Vec<u8>, (Vec<u8>, i32)>>>;

#[derive(Debug, Clone)]
pub struct FakeOptions {
    pub nodes: usize,
    /// All nodes serve one keyspace; otherwise each node has its own.
    pub shared_store: bool,
    /// Entries a store holds before answering NO_SPACE.
    pub capacity: usize,
    /// Drop every n-th reply of each node.
    pub drop_every: Option<u64>,
    /// Nodes that never answer.
    pub dead: Vec<usize>,
    /// Answer every PUT numbered a multiple of n with TEMP_OVERLOAD.
    pub overload_every: Option<u64>,
    /// Answer only WIPEOUT and stay silent on everything else.
    pub wipeout_only: bool,
    /// Reply to garbage and to frames with a wrong checksum.
    pub answer_corrupt: bool,
    /// Accept keys and values of any length.
    pub ignore_limits: bool,
    /// Attach a pid to every reply.
    pub extra_fields: bool,
    /// Store every entry with version 0.
    pub ignore_versions: bool,
    /// Datagrams received by all nodes, answered or not.
    pub received: Arc<AtomicU64>,
}

impl Default for FakeOptions {
    fn default() -> Self {
        Self {
            nodes: 1,
            shared_store: true,
            capacity: 1024,
            drop_every: None,
            dead: Vec::new(),
            overload_every: None,
            wipeout_only: false,
            answer_corrupt: false,
            ignore_limits: false,
            extra_fields: false,
            ignore_versions: false,
            received: Arc::default(),
        }
    }
}

/// Start the nodes and return their addresses.
pub async fn spawn(options: FakeOptions) -> Vec<SocketAddr> {
    let shared: Store = Arc::default();
    let mut addrs = Vec::with_capacity(options.nodes);

    for index in 0..options.nodes {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        addrs.push(socket.local_addr().unwrap());

        let node = FakeNode {
            store: if options.shared_store {
                Arc::clone(&shared)
            } else {
                Arc::default()
            },
            codec: KeyValueCodec::default(),
            capacity: options.capacity,
            members: options.nodes as i32,
            alive: Arc::new(AtomicBool::new(!options.dead.contains(&index))),
            served: Arc::new(AtomicU64::new(0)),
            drop_every: options.drop_every,
            puts: Arc::new(AtomicU64::new(0)),
            options: options.clone(),
        };
        tokio::spawn(node.serve(socket));
    }
    addrs
}

pub async fn spawn_one(capacity: usize) -> SocketAddr {
    spawn(FakeOptions {
        capacity,
        ..FakeOptions::default()
    })
    .await[0]
}

/// An address nobody answers on.
pub async fn dead_address() -> SocketAddr {
    UdpSocket::bind("127.0.0.1:0")
        .await
        .unwrap()
        .local_addr()
        .unwrap()
}

/// Small numbers so full suites finish in a few seconds.
pub fn quick_config() -> Config {
    let mut config = Config::default();
    config.client.timeout_ms = 300;

    let single = &mut config.single_node;
    single.capacity_entries = 16;
    single.overflow_attempts = 64;
    single.stress_iterations = 2;
    single.stress_fill_limit = 64;
    single.get_storm = 32;
    single.cooldown_ms = 0;
    single.liveness_retries = 3;
    single.silence_attempts = 2;
    single.silence_wait_ms = 100;

    config.throughput.levels = vec![1, 4];
    config.throughput.stress_level = Some(8);
    config.throughput.pairs_per_client = 10;

    config.multi_node.keys_per_node = 4;
    config.multi_node.workers = 4;
    config
}

struct FakeNode {
    store: Store,
    codec: KeyValueCodec,
    capacity: usize,
    members: i32,
    alive: Arc<AtomicBool>,
    served: Arc<AtomicU64>,
    drop_every: Option<u64>,
    puts: Arc<AtomicU64>,
    options: FakeOptions,
}

impl FakeNode {
    async fn serve(self, socket: UdpSocket) {
        let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
        loop {
            let Ok((len, from)) = socket.recv_from(&mut buf).await else {
                continue;
            };
            self.options.received.fetch_add(1, Ordering::SeqCst);
            if !self.alive.load(Ordering::SeqCst) {
                continue;
            }
            let Some((id, request)) = self.read(&buf[..len]) else {
                if self.options.answer_corrupt {
                    let _ = socket.send_to(b"unreadable", from).await;
                }
                continue;
            };
            if self.options.wipeout_only && request.command != Command::Wipeout {
                continue;
            }

            let Some(mut response) = self.handle(request) else {
                continue;
            };
            if self.options.extra_fields {
                response.pid = Some(std::process::id() as i32);
            }
            let served = self.served.fetch_add(1, Ordering::SeqCst) + 1;
            if self.drop_every.is_some_and(|n| served % n == 0) {
                continue;
            }
            let payload = self.codec.encode_response(&response);
            let _ = socket
                .send_to(&frame::encode(&id, &payload), from)
                .await;
        }
    }

    fn read(&self, datagram: &[u8]) -> Option<(Vec<u8>, Request)> {
        let envelope = frame::decode(datagram)?;
        if !envelope.checksum_ok {
            return None;
        }
        let request = self.codec.decode_request(&envelope.payload).ok()?;
        Some((envelope.id, request))
    }

    fn handle(&self, request: Request) -> Option<Response> {
        let mut store = self.store.lock().unwrap();
        let response = match request.command {
            Command::IsAlive => Response::new(ErrorCode::Okay),
            Command::GetPid => Response {
                pid: Some(std::process::id() as i32),
                ..Response::new(ErrorCode::Okay)
            },
            Command::GetMembershipCount => Response {
                membership_count: Some(self.members),
                ..Response::new(ErrorCode::Okay)
            },
            Command::Shutdown => {
                self.alive.store(false, Ordering::SeqCst);
                return None;
            }
            Command::Wipeout => {
                store.clear();
                Response::new(ErrorCode::Okay)
            }
            Command::Put => {
                let puts = self.puts.fetch_add(1, Ordering::SeqCst) + 1;
                if self.options.overload_every.is_some_and(|n| puts % n == 0) {
                    return Some(Response {
                        overload_wait_time: Some(10),
                        ..Response::new(ErrorCode::TempOverload)
                    });
                }
                let Some(key) = self.valid_key(&request) else {
                    return Some(Response::new(ErrorCode::BadKey));
                };
                let Some(value) = request
                    .value
                    .filter(|v| self.options.ignore_limits || v.len() <= MAX_VALUE_LEN)
                else {
                    return Some(Response::new(ErrorCode::BadValue));
                };
                if store.len() >= self.capacity && !store.contains_key(&key) {
                    return Some(Response::new(ErrorCode::NoSpace));
                }
                let version = if self.options.ignore_versions {
                    0
                } else {
                    request.version.unwrap_or(0)
                };
                store.insert(key, (value, version));
                Response::new(ErrorCode::Okay)
            }
            Command::Get => {
                let Some(key) = self.valid_key(&request) else {
                    return Some(Response::new(ErrorCode::BadKey));
                };
                if request.value.is_some() || request.version.is_some() {
                    return Some(Response::new(ErrorCode::BadValue));
                }
                match store.get(&key) {
                    Some((value, version)) => Response {
                        value: Some(value.clone()),
                        version: Some(*version),
                        ..Response::new(ErrorCode::Okay)
                    },
                    None => Response::new(ErrorCode::NoKey),
                }
            }
            Command::Remove => {
                let Some(key) = self.valid_key(&request) else {
                    return Some(Response::new(ErrorCode::BadKey));
                };
                match store.remove(&key) {
                    Some(_) => Response::new(ErrorCode::Okay),
                    None => Response::new(ErrorCode::NoKey),
                }
            }
            Command::Invalid => Response::new(ErrorCode::BadCommand),
        };
        Some(response)
    }

    fn valid_key(&self, request: &Request) -> Option<Vec<u8>> {
        request
            .key
            .clone()
            .filter(|k| !k.is_empty() && (self.options.ignore_limits || k.len() <= MAX_KEY_LEN))
    }
}
