//! ProtocolClient against scripted responders on localhost.

use kvprobe_client::{ClientConfig, ClientError, ProtocolClient, Reply};
use kvprobe_core::frame::{self, MAX_DATAGRAM_SIZE};
use kvprobe_core::{Command, ErrorCode, KeyValueCodec, Response};
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tokio::net::UdpSocket;

fn config(timeout_ms: u64) -> ClientConfig {
    ClientConfig {
        timeout: Duration::from_millis(timeout_ms),
        ..ClientConfig::default()
    }
}

/// What a responder does with each request it receives.
#[derive(Clone, Copy)]
enum Script {
    /// Reply OKAY with the request's id.
    Echo,
    /// First a reply with a foreign id, then the real one.
    StaleThenReal,
    /// Reply with the right id but a corrupted checksum.
    BadChecksum,
    /// Never reply.
    Silent,
}

async fn responder(script: Script) -> SocketAddr {
    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let addr = socket.local_addr().unwrap();
    let codec = KeyValueCodec::default();

    tokio::spawn(async move {
        let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
        loop {
            let Ok((len, from)) = socket.recv_from(&mut buf).await else {
                return;
            };
            let Some(request) = frame::decode(&buf[..len]) else {
                continue;
            };
            let Ok(decoded) = codec.decode_request(&request.payload) else {
                continue;
            };
            let command = decoded.command;
            let mut ok = Response::new(ErrorCode::Okay);
            if command == Command::GetPid {
                ok.pid = Some(4242);
            }
            let payload = codec.encode_response(&ok);

            match script {
                Script::Echo => {
                    socket
                        .send_to(&frame::encode(&request.id, &payload), from)
                        .await
                        .unwrap();
                }
                Script::StaleThenReal => {
                    let stale = codec.encode_response(&Response::new(ErrorCode::NoKey));
                    socket
                        .send_to(&frame::encode(b"someone-else-id!", &stale), from)
                        .await
                        .unwrap();
                    socket
                        .send_to(&frame::encode(&request.id, &payload), from)
                        .await
                        .unwrap();
                }
                Script::BadChecksum => {
                    let sum = frame::checksum(&request.id, &payload) ^ 0xff;
                    socket
                        .send_to(
                            &frame::encode_with_checksum(&request.id, &payload, sum),
                            from,
                        )
                        .await
                        .unwrap();
                }
                Script::Silent => {}
            }
        }
    });

    addr
}

#[tokio::test]
async fn matching_reply_is_received() {
    let server = responder(Script::Echo).await;
    let mut client = ProtocolClient::connect(server, &config(500)).await.unwrap();

    let reply = client.is_alive().await.unwrap();
    assert!(reply.is_okay());

    let reply = client.get_pid().await.unwrap();
    assert_eq!(reply.response().unwrap().pid, Some(4242));
}

#[tokio::test]
async fn stale_reply_is_skipped() {
    let server = responder(Script::StaleThenReal).await;
    let mut client = ProtocolClient::connect(server, &config(500)).await.unwrap();

    let reply = client.is_alive().await.unwrap();
    assert_eq!(reply, Reply::Received(Response::new(ErrorCode::Okay)));
}

#[tokio::test]
async fn corrupted_reply_is_dropped() {
    let server = responder(Script::BadChecksum).await;
    let mut client = ProtocolClient::connect(server, &config(200)).await.unwrap();

    assert_eq!(client.is_alive().await.unwrap(), Reply::TimedOut);
}

#[tokio::test]
async fn silence_times_out_after_the_window() {
    let server = responder(Script::Silent).await;
    let mut client = ProtocolClient::connect(server, &config(150)).await.unwrap();

    let started = Instant::now();
    let reply = client.put(b"key", b"value").await.unwrap();
    assert!(reply.is_timed_out());
    assert!(started.elapsed() >= Duration::from_millis(150));
}

#[tokio::test]
async fn unreachable_server_is_a_timeout_not_an_error() {
    // Bind and drop to get a port nobody listens on.
    let addr = UdpSocket::bind("127.0.0.1:0")
        .await
        .unwrap()
        .local_addr()
        .unwrap();
    let mut client = ProtocolClient::connect(addr, &config(150)).await.unwrap();

    assert!(client.is_alive().await.unwrap().is_timed_out());
}

#[tokio::test]
async fn oversized_request_is_refused_locally() {
    let server = responder(Script::Echo).await;
    let mut client = ProtocolClient::connect(server, &config(150)).await.unwrap();

    let value = vec![0u8; MAX_DATAGRAM_SIZE];
    let err = client.put(b"key", &value).await.unwrap_err();
    assert!(matches!(err, ClientError::DatagramTooLarge { .. }));
}

#[tokio::test]
async fn raw_send_reports_silence() {
    let server = responder(Script::Silent).await;
    let mut client = ProtocolClient::connect(server, &config(150)).await.unwrap();

    let answer = client
        .send_raw(b"some garbage message", Duration::from_millis(100))
        .await
        .unwrap();
    assert_eq!(answer, None);
}
