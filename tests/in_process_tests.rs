//! In-process integration tests for the DNS rewrite proxy.
//!
//! These tests bind the real server on loopback and talk to it over UDP,
//! with a fake upstream resolver standing in for the network.

use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::timeout;

use dns_rewrite_proxy::config::{Config, RecordConfig};
use dns_rewrite_proxy::dns::proxy::ProxyStats;
use dns_rewrite_proxy::dns::DnsServer;

const REPLY_TIMEOUT: Duration = Duration::from_secs(2);

struct TestServer {
    addr: SocketAddr,
    shutdown: oneshot::Sender<()>,
    handle: JoinHandle<ProxyStats>,
}

impl TestServer {
    async fn stop(self) -> ProxyStats {
        let _ = self.shutdown.send(());
        self.handle.await.unwrap()
    }
}

fn test_config(upstream: &str, records: &[(&str, &str)]) -> Config {
    let mut config = Config::default();
    config.dns.listen = "127.0.0.1:0".to_string();
    config.dns.upstream = Some(upstream.to_string());
    config.stats_interval_seconds = 0;
    config.logging.log_queries = false;
    config.records = records
        .iter()
        .map(|(domain, ip)| RecordConfig {
            domain: domain.to_string(),
            ip: ip.to_string(),
        })
        .collect();
    config
}

/// Bind a server on an ephemeral loopback port and run it in the background
async fn start_test_dns_server(config: Config) -> TestServer {
    let server = DnsServer::bind(&config).await.unwrap();
    let addr = server.local_addr().unwrap();
    let (shutdown, rx) = oneshot::channel::<()>();

    let handle = tokio::spawn(server.run_until(async move {
        let _ = rx.await;
    }));

    TestServer {
        addr,
        shutdown,
        handle,
    }
}

async fn client_socket() -> UdpSocket {
    UdpSocket::bind("127.0.0.1:0").await.unwrap()
}

async fn recv_reply(socket: &UdpSocket) -> Option<Vec<u8>> {
    let mut buf = [0u8; 4096];
    match timeout(REPLY_TIMEOUT, socket.recv_from(&mut buf)).await {
        Ok(Ok((len, _))) => Some(buf[..len].to_vec()),
        _ => None,
    }
}

/// Build a simple A query for testing
fn build_dns_query(domain: &str, query_id: u16) -> Vec<u8> {
    let mut query = Vec::new();

    // Transaction ID
    query.extend_from_slice(&query_id.to_be_bytes());
    // Flags: standard query, recursion desired
    query.extend_from_slice(&[0x01, 0x00]);
    // Questions: 1
    query.extend_from_slice(&[0x00, 0x01]);
    // Answer RRs, Authority RRs, Additional RRs: 0
    query.extend_from_slice(&[0x00, 0x00, 0x00, 0x00, 0x00, 0x00]);

    for label in domain.split('.') {
        query.push(label.len() as u8);
        query.extend_from_slice(label.as_bytes());
    }
    query.push(0x00);

    // Type A, class IN
    query.extend_from_slice(&[0x00, 0x01, 0x00, 0x01]);
    query
}

fn id_of(packet: &[u8]) -> u16 {
    u16::from_be_bytes([packet[0], packet[1]])
}

// ============== Local Answers ==============

#[tokio::test]
async fn test_dns_local_answer() {
    let server = start_test_dns_server(test_config(
        "none",
        &[("tc.fritz.box", "192.168.178.2")],
    ))
    .await;
    let socket = client_socket().await;

    let query = build_dns_query("tc.fritz.box", 0x1234);
    socket.send_to(&query, server.addr).await.unwrap();

    let reply = recv_reply(&socket).await.expect("no reply");
    assert_eq!(id_of(&reply), 0x1234);
    assert_eq!(&reply[2..4], &[0x81, 0x80]);
    // QDCOUNT 1, ANCOUNT 1
    assert_eq!(&reply[4..8], &[0x00, 0x01, 0x00, 0x01]);
    // Question copied verbatim
    assert_eq!(&reply[12..query.len()], &query[12..]);
    // Answer: pointer, A, IN, TTL 60, RDLENGTH 4, address
    assert_eq!(
        &reply[query.len()..],
        &[0xC0, 0x0C, 0, 1, 0, 1, 0, 0, 0, 60, 0, 4, 192, 168, 178, 2]
    );

    let stats = server.stop().await;
    assert_eq!(stats.queries, 1);
    assert_eq!(stats.forwarded, 0);
    assert_eq!(stats.last_query, "tc.fritz.box");
}

#[tokio::test]
async fn test_dns_wildcard_answer() {
    let server = start_test_dns_server(test_config("none", &[("*.lan", "10.0.0.7")])).await;
    let socket = client_socket().await;

    socket
        .send_to(&build_dns_query("printer.office.lan", 7), server.addr)
        .await
        .unwrap();

    let reply = recv_reply(&socket).await.expect("no reply");
    assert_eq!(id_of(&reply), 7);
    assert_eq!(reply[3] & 0x0F, 0);
    assert_eq!(&reply[reply.len() - 4..], &[10, 0, 0, 7]);

    server.stop().await;
}

#[tokio::test]
async fn test_dns_nxdomain_without_upstream() {
    let server = start_test_dns_server(test_config(
        "none",
        &[("tc.fritz.box", "192.168.178.2")],
    ))
    .await;
    let socket = client_socket().await;

    let query = build_dns_query("other.box", 0xBEEF);
    socket.send_to(&query, server.addr).await.unwrap();

    let reply = recv_reply(&socket).await.expect("no reply");
    assert_eq!(id_of(&reply), 0xBEEF);
    assert_eq!(&reply[2..4], &[0x81, 0x83]);
    // No answer section
    assert_eq!(reply.len(), query.len());

    let stats = server.stop().await;
    assert!(!stats.has_upstream);
    assert_eq!(stats.queries, 1);
}

#[tokio::test]
async fn test_dns_malformed_query_ignored() {
    let server = start_test_dns_server(test_config("none", &[("a.test", "1.2.3.4")])).await;
    let socket = client_socket().await;

    // Just a transaction ID, nothing else
    socket.send_to(&[0x12, 0x34], server.addr).await.unwrap();
    socket
        .send_to(&build_dns_query("a.test", 0x5678), server.addr)
        .await
        .unwrap();

    // The first reply must belong to the well-formed query
    let reply = recv_reply(&socket).await.expect("no reply");
    assert_eq!(id_of(&reply), 0x5678);

    let stats = server.stop().await;
    assert_eq!(stats.queries, 1);
}

// ============== Forwarding ==============

#[tokio::test]
async fn test_dns_query_forwarding() {
    let upstream = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let upstream_addr = upstream.local_addr().unwrap();

    let server = start_test_dns_server(test_config(
        &upstream_addr.to_string(),
        &[("tc.fritz.box", "192.168.178.2")],
    ))
    .await;
    let socket = client_socket().await;

    let query = build_dns_query("example.com", 0x1234);
    socket.send_to(&query, server.addr).await.unwrap();

    // Upstream sees the same query under a fresh transaction ID
    let mut buf = [0u8; 512];
    let (len, proxy_addr) = timeout(REPLY_TIMEOUT, upstream.recv_from(&mut buf))
        .await
        .expect("query not forwarded")
        .unwrap();
    let forwarded = buf[..len].to_vec();
    assert_ne!(id_of(&forwarded), 0x1234);
    assert_eq!(&forwarded[2..], &query[2..]);

    // Answer it the way a resolver would
    let mut answer = forwarded.clone();
    answer[2] |= 0x80;
    answer[3] = 0x80;
    answer[7] = 1;
    answer.extend_from_slice(&[0xC0, 0x0C, 0, 1, 0, 1, 0, 0, 1, 0, 0, 4, 93, 184, 216, 34]);
    upstream.send_to(&answer, proxy_addr).await.unwrap();

    // Client gets the upstream answer back under its own ID
    let reply = recv_reply(&socket).await.expect("response not relayed");
    assert_eq!(id_of(&reply), 0x1234);
    assert_eq!(&reply[2..], &answer[2..]);

    let stats = server.stop().await;
    assert!(stats.has_upstream);
    assert_eq!(stats.queries, 1);
    assert_eq!(stats.forwarded, 1);
    assert_eq!(stats.pending, 0);
}

#[tokio::test]
async fn test_dns_local_record_not_forwarded() {
    let upstream = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let upstream_addr = upstream.local_addr().unwrap();

    let server = start_test_dns_server(test_config(
        &upstream_addr.to_string(),
        &[("tc.fritz.box", "192.168.178.2")],
    ))
    .await;
    let socket = client_socket().await;

    socket
        .send_to(&build_dns_query("TC.Fritz.Box", 42), server.addr)
        .await
        .unwrap();

    let reply = recv_reply(&socket).await.expect("no reply");
    assert_eq!(id_of(&reply), 42);
    assert_eq!(&reply[reply.len() - 4..], &[192, 168, 178, 2]);

    // Nothing reached the upstream
    let mut buf = [0u8; 512];
    assert!(timeout(Duration::from_millis(200), upstream.recv_from(&mut buf))
        .await
        .is_err());

    let stats = server.stop().await;
    assert_eq!(stats.forwarded, 0);
}

#[tokio::test]
async fn test_dns_multiple_clients_forwarded() {
    let upstream = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let upstream_addr = upstream.local_addr().unwrap();

    let server = start_test_dns_server(test_config(&upstream_addr.to_string(), &[])).await;
    let first = client_socket().await;
    let second = client_socket().await;

    // Both clients use the same ID; the upstream must see two distinct ones
    first
        .send_to(&build_dns_query("one.example", 0x0101), server.addr)
        .await
        .unwrap();
    second
        .send_to(&build_dns_query("two.example", 0x0101), server.addr)
        .await
        .unwrap();

    let mut received = Vec::new();
    for _ in 0..2 {
        let mut buf = [0u8; 512];
        let (len, proxy_addr) = timeout(REPLY_TIMEOUT, upstream.recv_from(&mut buf))
            .await
            .expect("query not forwarded")
            .unwrap();
        received.push((buf[..len].to_vec(), proxy_addr));
    }
    assert_ne!(id_of(&received[0].0), id_of(&received[1].0));

    // Reply in reverse order
    for (packet, proxy_addr) in received.iter().rev() {
        let mut answer = packet.clone();
        answer[2] |= 0x80;
        upstream.send_to(&answer, *proxy_addr).await.unwrap();
    }

    let reply_one = recv_reply(&first).await.expect("first client got no reply");
    let reply_two = recv_reply(&second).await.expect("second client got no reply");
    assert_eq!(id_of(&reply_one), 0x0101);
    assert_eq!(id_of(&reply_two), 0x0101);
    assert_eq!(&reply_one[12..], &build_dns_query("one.example", 0)[12..]);
    assert_eq!(&reply_two[12..], &build_dns_query("two.example", 0)[12..]);

    let stats = server.stop().await;
    assert_eq!(stats.forwarded, 2);
}

// ============== Startup ==============

#[tokio::test]
async fn test_dns_bind_rejects_bad_record() {
    let config = test_config("none", &[("tc.fritz.box", "not-an-ip")]);
    assert!(DnsServer::bind(&config).await.is_err());
}

#[tokio::test]
async fn test_dns_bind_rejects_bad_listen() {
    let mut config = test_config("none", &[]);
    config.dns.listen = "[::1]:53".to_string();
    assert!(DnsServer::bind(&config).await.is_err());
}
