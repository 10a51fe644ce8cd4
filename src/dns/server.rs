//! UDP server: sockets, the single dispatcher loop, and periodic maintenance.

use crate::config::Config;
use crate::dns::forwarding::{ForwardingTable, MonotonicClock};
use crate::dns::proxy::{PacketSink, ProxyStats, RewriteProxy, Upstream};
use crate::dns::rules::RuleSet;
use crate::dns::upstream::resolve_upstream;
use crate::error::Result;
use std::future::Future;
use std::io;
use std::net::{SocketAddr, SocketAddrV4};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::time::{interval, Interval, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Largest query accepted from clients (plain DNS over UDP)
const MAX_QUERY_SIZE: usize = 512;
/// Upstream answers may be larger than 512 bytes; relay them whole
const MAX_RESPONSE_SIZE: usize = 4096;

/// Non-blocking, fire-and-forget sender over a shared UDP socket
#[derive(Clone)]
pub struct UdpSink {
    socket: Arc<UdpSocket>,
}

impl UdpSink {
    pub fn new(socket: Arc<UdpSocket>) -> Self {
        UdpSink { socket }
    }
}

impl PacketSink for UdpSink {
    fn send_to(&self, dest: SocketAddrV4, packet: &[u8]) -> io::Result<()> {
        self.socket
            .try_send_to(packet, SocketAddr::V4(dest))
            .map(|_| ())
    }
}

/// A bound rewrite proxy, ready to run
pub struct DnsServer {
    proxy: RewriteProxy<UdpSink>,
    client_socket: Arc<UdpSocket>,
    upstream_socket: Option<Arc<UdpSocket>>,
    clock: MonotonicClock,
    sweep_every: Duration,
    stats_every: Option<Duration>,
}

impl DnsServer {
    /// Build the rule set, pick the upstream and bind both sockets
    pub async fn bind(config: &Config) -> Result<DnsServer> {
        let listen = config.dns.listen_addr()?;

        let rules = RuleSet::from_records(&config.records, config.matching.case_insensitive)?;
        for record in &config.records {
            info!(domain = %record.domain, ip = %record.ip, "Added DNS record");
        }

        let upstream_addr = resolve_upstream(
            config.dns.upstream.as_deref(),
            Path::new(&config.dns.resolv_conf),
        )?;

        let client_socket = Arc::new(UdpSocket::bind(SocketAddr::V4(listen)).await?);

        let (upstream, upstream_socket) = match upstream_addr {
            Some(addr) => {
                let socket = Arc::new(UdpSocket::bind("0.0.0.0:0").await?);
                let upstream = Upstream {
                    addr,
                    sink: UdpSink::new(Arc::clone(&socket)),
                    verify_source: config.dns.verify_upstream_source,
                };
                (Some(upstream), Some(socket))
            }
            None => (None, None),
        };

        let table = ForwardingTable::new(&config.forwarding);
        let proxy = RewriteProxy::new(
            rules,
            table,
            UdpSink::new(Arc::clone(&client_socket)),
            upstream,
            config.logging.log_queries,
        );

        match upstream_addr {
            Some(addr) => info!(
                listen = %client_socket.local_addr()?,
                upstream = %addr,
                records = proxy.record_count(),
                "DNS proxy started with forwarding"
            ),
            None => info!(
                listen = %client_socket.local_addr()?,
                records = proxy.record_count(),
                "DNS server started (local records only)"
            ),
        }

        Ok(DnsServer {
            proxy,
            client_socket,
            upstream_socket,
            clock: MonotonicClock::new(),
            sweep_every: Duration::from_millis(config.forwarding.sweep_interval_ms.max(1)),
            stats_every: (config.stats_interval_seconds > 0)
                .then(|| Duration::from_secs(config.stats_interval_seconds)),
        })
    }

    /// Address the client-facing socket is bound to
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.client_socket.local_addr()
    }

    pub fn stats(&self) -> ProxyStats {
        self.proxy.stats()
    }

    /// Serve until `shutdown` completes.
    ///
    /// Queries, upstream responses and timers are all handled on this one
    /// task, so the proxy state is never touched concurrently.
    pub async fn run_until<F>(mut self, shutdown: F) -> ProxyStats
    where
        F: Future<Output = ()>,
    {
        let mut client_buf = [0u8; MAX_QUERY_SIZE];
        let mut upstream_buf = [0u8; MAX_RESPONSE_SIZE];

        let mut sweep = interval(self.sweep_every);
        sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut stats = self.stats_every.map(|every| {
            let mut ticker = interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            ticker
        });
        // The first tick of an interval fires immediately
        if let Some(ticker) = stats.as_mut() {
            ticker.reset();
        }

        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => break,

                received = self.client_socket.recv_from(&mut client_buf) => {
                    match received {
                        Ok((len, SocketAddr::V4(src))) => {
                            let now = self.clock.now_ms();
                            self.proxy.handle_query(src, &mut client_buf[..len], now);
                        }
                        Ok((_, src)) => debug!(client = %src, "DNS ignoring IPv6 client"),
                        Err(e) => warn!(error = %e, "DNS receive failed"),
                    }
                }

                received = recv_optional(self.upstream_socket.as_deref(), &mut upstream_buf) => {
                    match received {
                        Ok((len, SocketAddr::V4(src))) => {
                            self.proxy.handle_response(src, &mut upstream_buf[..len]);
                        }
                        Ok((_, src)) => debug!(from = %src, "DNS ignoring IPv6 upstream packet"),
                        Err(e) => warn!(error = %e, "DNS upstream receive failed"),
                    }
                }

                _ = sweep.tick() => {
                    self.proxy.sweep(self.clock.now_ms());
                }

                _ = tick_optional(stats.as_mut()) => {
                    log_stats(&self.proxy.stats());
                }
            }
        }

        let final_stats = self.proxy.stats();
        info!(
            queries = final_stats.queries,
            forwarded = final_stats.forwarded,
            "DNS server stopped"
        );
        final_stats
    }
}

async fn recv_optional(
    socket: Option<&UdpSocket>,
    buf: &mut [u8],
) -> io::Result<(usize, SocketAddr)> {
    match socket {
        Some(socket) => socket.recv_from(buf).await,
        None => std::future::pending().await,
    }
}

async fn tick_optional(interval: Option<&mut Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

fn log_stats(stats: &ProxyStats) {
    info!(
        queries = stats.queries,
        forwarded = stats.forwarded,
        records = stats.records,
        pending = stats.pending,
        upstream = stats.has_upstream,
        last_query = %stats.last_query,
        "DNS proxy stats"
    );
}

/// Run the DNS rewrite proxy until Ctrl-C
pub async fn run_dns_server(config: &Config) -> Result<()> {
    let server = DnsServer::bind(config).await?;
    server
        .run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "Failed to listen for Ctrl-C");
                std::future::pending::<()>().await;
            }
        })
        .await;
    Ok(())
}
