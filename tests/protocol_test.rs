// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! Protocol integration tests: a real listener on an ephemeral port, driven
//! by plain TCP clients.
//!
//! Run with: `cargo test`

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use zwocam::camera::CameraProfile;
use zwocam::config::ServerConfig;
use zwocam::listener;

/// Bind on an OS-assigned port, spawn the listener's serve loop, and return
/// the address clients should connect to.
async fn spawn_server(seed: Option<u64>) -> SocketAddr {
    let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0);
    let raw = listener::bind(addr, 8).expect("bind ephemeral port");
    let local_addr = raw.local_addr().expect("local_addr");

    let config = ServerConfig {
        host: addr.ip(),
        port: local_addr.port(),
        backlog: 8,
        seed,
        camera: CameraProfile::default(),
    };

    tokio::spawn(async move {
        let _ = listener::serve(raw, config).await;
    });

    local_addr
}

async fn connect(addr: SocketAddr) -> TcpStream {
    TcpStream::connect(addr).await.expect("connect")
}

/// Write one command line and read back the text reply (up to the next LF).
async fn send_line(stream: &mut TcpStream, cmd: &str) -> String {
    stream.write_all(cmd.as_bytes()).await.expect("write cmd");
    stream.write_all(b"\n").await.expect("write terminator");

    let mut text = Vec::new();
    let mut byte = [0u8; 1];
    loop {
        stream.read_exact(&mut byte).await.expect("read reply byte");
        if byte[0] == b'\n' {
            break;
        }
        text.push(byte[0]);
    }
    String::from_utf8(text).expect("utf8 reply")
}

async fn read_payload(stream: &mut TcpStream, len: usize) -> Vec<u8> {
    let mut payload = vec![0u8; len];
    if len > 0 {
        stream.read_exact(&mut payload).await.expect("read payload");
    }
    payload
}

/// Send a command whose reply has a known, fixed payload length.
async fn send(stream: &mut TcpStream, cmd: &str, payload_len: usize) -> (String, Vec<u8>) {
    let text = send_line(stream, cmd).await;
    let payload = read_payload(stream, payload_len).await;
    (text, payload)
}

/// Send a `data`-style command where the payload length is only known after
/// reading the text reply (it echoes the frame length as its first token).
async fn send_data(stream: &mut TcpStream, cmd: &str) -> (String, Vec<u8>) {
    let text = send_line(stream, cmd).await;
    let len: usize = text.parse().expect("data reply should be a byte count");
    let payload = read_payload(stream, len).await;
    (text, payload)
}

#[tokio::test]
async fn s1_version_and_handshake() {
    let addr = spawn_server(Some(1)).await;
    let mut client = connect(addr).await;

    let (text, _) = send(&mut client, "version", 0).await;
    let parts: Vec<&str> = text.split_whitespace().collect();
    assert_eq!(parts.len(), 3);
    assert_eq!(parts[0], "1.0.4");
    parts[1].parse::<u64>().expect("cookie should be numeric");
    parts[2].parse::<u64>().expect("startup time should be numeric");
}

#[tokio::test]
async fn s2_still_capture() {
    let addr = spawn_server(Some(2)).await;
    let mut client = connect(addr).await;

    let (open_reply, _) = send(&mut client, "open", 0).await;
    let open_tokens: Vec<&str> = open_reply.split_whitespace().collect();
    assert_eq!(open_tokens.len(), 6);
    assert!(open_tokens[0].parse::<u32>().unwrap() > 0);
    assert!(open_tokens[1].parse::<u32>().unwrap() > 0);

    let (setup_reply, _) = send(&mut client, "setup 0 0 256 256 1 16", 0).await;
    assert_eq!(setup_reply, "0 0 256 256 1 16");

    let (exptime_reply, _) = send(&mut client, "exptime 0.05", 0).await;
    assert_eq!(exptime_reply, "0.050000");

    let (expose_reply, _) = send(&mut client, "expose", 0).await;
    assert_eq!(expose_reply, "OK");

    tokio::time::sleep(Duration::from_millis(100)).await;

    let (status_reply, _) = send(&mut client, "status", 0).await;
    assert_eq!(status_reply, "idle");

    let (data_reply, payload) = send(&mut client, "data", 131072).await;
    assert_eq!(data_reply, "131072");
    assert_eq!(payload.len(), 131072);

    let mut min = u16::MAX;
    let mut max = 0u16;
    for chunk in payload.chunks_exact(2) {
        let v = u16::from_le_bytes([chunk[0], chunk[1]]);
        min = min.min(v);
        max = max.max(v);
    }
    assert!(min < max);
}

#[tokio::test]
async fn s3_streaming_session() {
    let addr = spawn_server(Some(3)).await;
    let mut client = connect(addr).await;

    send(&mut client, "open", 0).await;
    send(&mut client, "setup 0 0 128 128 1 8", 0).await;
    send(&mut client, "exptime 0.01", 0).await;
    let (start_reply, _) = send(&mut client, "start", 0).await;
    assert_eq!(start_reply, "OK");

    tokio::time::sleep(Duration::from_millis(50)).await;

    let (next_reply, payload) = send(&mut client, "next 0.1", 16384).await;
    let tokens: Vec<&str> = next_reply.split_whitespace().collect();
    assert_eq!(tokens.len(), 3);
    let first_seq: u64 = tokens[0].parse().expect("sequence should be numeric");
    assert!(first_seq >= 1);
    assert_eq!(payload.len(), 16384);

    let (next_reply2, _) = send(&mut client, "next 0.1", 16384).await;
    let tokens2: Vec<&str> = next_reply2.split_whitespace().collect();
    let second_seq: u64 = tokens2[0].parse().expect("sequence should be numeric");
    assert!(second_seq > first_seq);

    let (stop_reply, _) = send(&mut client, "stop", 0).await;
    assert_eq!(stop_reply, "OK");

    let (status_reply, _) = send(&mut client, "status", 0).await;
    assert_eq!(status_reply, "idle");
}

#[tokio::test]
async fn s4_error_precedence() {
    let addr = spawn_server(Some(4)).await;
    let mut client = connect(addr).await;

    let (reply, _) = send(&mut client, "exptime 0.1", 0).await;
    assert_eq!(reply, "-Eerr=21");

    send(&mut client, "open", 0).await;
    let (expose_reply, _) = send(&mut client, "expose", 0).await;
    assert_eq!(expose_reply, "OK");

    let (expose_again, _) = send(&mut client, "expose", 0).await;
    assert_eq!(expose_again, "-Eerr=22");
}

#[tokio::test]
async fn s5_setup_alignment() {
    let addr = spawn_server(Some(5)).await;
    let mut client = connect(addr).await;

    send(&mut client, "open", 0).await;
    let (reply, _) = send(&mut client, "setup 0 0 100 101 1 16", 0).await;
    assert_eq!(reply, "0 0 96 100 1 16");
}

#[tokio::test]
async fn s6_concurrent_connections_do_not_share_roi() {
    let addr = spawn_server(Some(6)).await;
    let mut c1 = connect(addr).await;
    let mut c2 = connect(addr).await;

    send(&mut c1, "open", 0).await;
    send(&mut c1, "setup image 2", 0).await;
    send(&mut c2, "open", 0).await;
    send(&mut c2, "setup 0 0 64 64 1 8", 0).await;

    send(&mut c1, "expose", 0).await;
    tokio::time::sleep(Duration::from_millis(20)).await;
    let (c1_data_reply, c1_payload) = send_data(&mut c1, "data").await;
    let c1_len: usize = c1_data_reply.parse().expect("c1 length numeric");
    assert_eq!(c1_payload.len(), c1_len);
    // Binned image-mode capture on the default sensor is 16-bit.
    assert_eq!(c1_len % 2, 0);

    send(&mut c2, "expose", 0).await;
    tokio::time::sleep(Duration::from_millis(20)).await;
    let (c2_data_reply, c2_payload) = send_data(&mut c2, "data").await;
    assert_eq!(c2_data_reply, "4096");
    assert_eq!(c2_payload.len(), 4096);

    assert_ne!(c1_len, c2_payload.len());
}
