//! CONNECT tunneling through a live proxy, using raw sockets.

use std::sync::atomic::Ordering;
use std::time::Duration;

use forward_proxy::security::BlockKind;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

mod common;
use common::{closed_port, read_head_with_rest, start_counting_listener, start_echo_server, TestProxy};

async fn read_exact_within(stream: &mut TcpStream, buf: &mut [u8]) {
    tokio::time::timeout(Duration::from_secs(5), stream.read_exact(buf))
        .await
        .expect("timed out reading from tunnel")
        .expect("tunnel closed early");
}

#[tokio::test]
async fn test_tunnel_relays_bytes_both_ways() {
    let echo = start_echo_server().await;
    let proxy = TestProxy::start().await;

    let mut client = TcpStream::connect(proxy.addr).await.unwrap();
    client
        .write_all(format!("CONNECT {0} HTTP/1.1\r\nHost: {0}\r\n\r\n", echo).as_bytes())
        .await
        .unwrap();

    let (head, rest) = read_head_with_rest(&mut client).await.expect("no CONNECT reply");
    assert!(head.starts_with("HTTP/1.1 200 Connection established\r\n"), "got: {}", head);
    assert!(rest.is_empty());

    for message in [&b"ping"[..], &b"\x00\x01binary\xff"[..]] {
        client.write_all(message).await.unwrap();
        let mut echoed = vec![0u8; message.len()];
        read_exact_within(&mut client, &mut echoed).await;
        assert_eq!(echoed, message);
    }
}

#[tokio::test]
async fn test_pipelined_bytes_reach_target_first() {
    let echo = start_echo_server().await;
    let proxy = TestProxy::start().await;

    let mut client = TcpStream::connect(proxy.addr).await.unwrap();
    // the first tunneled bytes travel in the same write as the CONNECT head
    client
        .write_all(format!("CONNECT {0} HTTP/1.1\r\nHost: {0}\r\n\r\nearly-bytes", echo).as_bytes())
        .await
        .unwrap();

    let (head, mut received) = read_head_with_rest(&mut client).await.expect("no CONNECT reply");
    assert!(head.starts_with("HTTP/1.1 200 Connection established\r\n"), "got: {}", head);

    client.write_all(b"|late").await.unwrap();
    let expected = b"early-bytes|late";
    if received.len() < expected.len() {
        let mut tail = vec![0u8; expected.len() - received.len()];
        read_exact_within(&mut client, &mut tail).await;
        received.extend_from_slice(&tail);
    }
    assert_eq!(&received[..], &expected[..]);
}

#[tokio::test]
async fn test_blocked_connect_is_forbidden() {
    let (target, accepted) = start_counting_listener().await;
    let proxy = TestProxy::start().await;
    proxy.access.block(BlockKind::Host, "127.0.0.1");

    let mut client = TcpStream::connect(proxy.addr).await.unwrap();
    client
        .write_all(format!("CONNECT {0} HTTP/1.1\r\nHost: {0}\r\n\r\n", target).as_bytes())
        .await
        .unwrap();

    let (head, _) = read_head_with_rest(&mut client).await.expect("no CONNECT reply");
    assert!(head.starts_with("HTTP/1.1 403 Connection forbidden\r\n"), "got: {}", head);

    // the connection is closed after the refusal
    let mut buf = [0u8; 64];
    let n = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match client.read(&mut buf).await {
                Ok(0) | Err(_) => return 0,
                Ok(_) => continue,
            }
        }
    })
    .await
    .expect("connection left open");
    assert_eq!(n, 0);
    assert_eq!(accepted.load(Ordering::SeqCst), 0, "blocked CONNECT reached the target");

    // once unblocked, the same target is dialed
    proxy.access.unblock(BlockKind::Host, "127.0.0.1");
    let mut other = TcpStream::connect(proxy.addr).await.unwrap();
    other
        .write_all(format!("CONNECT {0} HTTP/1.1\r\nHost: {0}\r\n\r\n", target).as_bytes())
        .await
        .unwrap();
    let (head, _) = read_head_with_rest(&mut other).await.unwrap();
    assert!(head.starts_with("HTTP/1.1 200 Connection established\r\n"));
    assert_eq!(accepted.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_http10_connect_echoes_version() {
    let echo = start_echo_server().await;
    let proxy = TestProxy::start().await;

    let mut client = TcpStream::connect(proxy.addr).await.unwrap();
    client
        .write_all(format!("CONNECT {} HTTP/1.0\r\n\r\n", echo).as_bytes())
        .await
        .unwrap();

    let (head, _) = read_head_with_rest(&mut client).await.expect("no CONNECT reply");
    assert!(head.starts_with("HTTP/1.0 200 Connection established\r\n"), "got: {}", head);
}

#[tokio::test]
async fn test_unreachable_target_fails_without_tunnel() {
    let closed = closed_port().await;
    let proxy = TestProxy::start().await;

    let mut client = TcpStream::connect(proxy.addr).await.unwrap();
    client
        .write_all(format!("CONNECT {0} HTTP/1.1\r\nHost: {0}\r\n\r\n", closed).as_bytes())
        .await
        .unwrap();

    let (head, _) = read_head_with_rest(&mut client).await.expect("no reply");
    assert!(head.starts_with("HTTP/1.1 502"), "got: {}", head);
}
