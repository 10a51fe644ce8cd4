//! Request orchestration: local answers, NXDOMAIN, and upstream forwarding.

use crate::dns::forwarding::ForwardingTable;
use crate::dns::rules::RuleSet;
use crate::dns::wire::{
    addr_to_ipv4, encode_answer, encode_nxdomain, set_transaction_id, transaction_id, DnsQuery,
};
use crate::error::DnsError;
use rand::rngs::StdRng;
use rand::Rng;
use std::io;
use std::net::SocketAddrV4;
use tracing::{debug, trace, warn};

/// Outbound packet path. Sends are fire-and-forget: an `Ok` means the packet
/// was handed to the network, nothing more.
pub trait PacketSink {
    fn send_to(&self, dest: SocketAddrV4, packet: &[u8]) -> io::Result<()>;
}

/// Upstream resolver and the path used to reach it
pub struct Upstream<S> {
    pub addr: SocketAddrV4,
    pub sink: S,
    /// Discard upstream-socket packets not sent by `addr`
    pub verify_source: bool,
}

/// What happened to an inbound query
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryOutcome {
    /// Shorter than a DNS header; nothing counted or sent
    Dropped,
    Answered { addr: u32 },
    Forwarded { upstream_id: u16 },
    NxDomain,
    /// No free ID or the upstream send failed; the query is lost
    ForwardFailed,
}

/// What happened to an inbound upstream response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseOutcome {
    Dropped,
    Relayed { client: SocketAddrV4, original_id: u16 },
    /// Expired, duplicate or forged ID
    UnknownId(u16),
    /// Came from somewhere other than the upstream
    Spoofed,
}

/// Read-only snapshot of the proxy counters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProxyStats {
    pub queries: u64,
    pub forwarded: u64,
    pub records: usize,
    pub pending: usize,
    pub has_upstream: bool,
    pub last_query: String,
}

/// The rewrite proxy core.
///
/// Driven by a single dispatcher: every handler takes `&mut self`, and each
/// packet buffer is borrowed only for the duration of one call.
pub struct RewriteProxy<S, R = StdRng> {
    rules: RuleSet,
    table: ForwardingTable<R>,
    clients: S,
    upstream: Option<Upstream<S>>,
    log_queries: bool,
    queries: u64,
    forwarded: u64,
    last_query: String,
}

impl<S: PacketSink, R: Rng> RewriteProxy<S, R> {
    pub fn new(
        rules: RuleSet,
        table: ForwardingTable<R>,
        clients: S,
        upstream: Option<Upstream<S>>,
        log_queries: bool,
    ) -> Self {
        RewriteProxy {
            rules,
            table,
            clients,
            upstream,
            log_queries,
            queries: 0,
            forwarded: 0,
            last_query: String::new(),
        }
    }

    /// Handle a query from a client. The transaction ID bytes of `packet` are
    /// rewritten in place when the query is forwarded.
    pub fn handle_query(
        &mut self,
        client: SocketAddrV4,
        packet: &mut [u8],
        now_ms: u32,
    ) -> QueryOutcome {
        let query = match DnsQuery::parse(packet) {
            Ok(q) => q,
            Err(e) => {
                if self.log_queries {
                    debug!(client = %client, bytes = packet.len(), error = %e, "DNS query dropped");
                }
                return QueryOutcome::Dropped;
            }
        };

        self.queries += 1;
        self.last_query.clear();
        self.last_query.push_str(query.name());

        if self.log_queries {
            debug!(id = query.id(), client = %client, name = %query.name(), "DNS query");
        }

        if let Some(addr) = self.rules.lookup(query.name()) {
            if let Some(response) = self.encode(encode_answer(packet, addr)) {
                self.reply(client, &response);
                if self.log_queries {
                    debug!(
                        name = %query.name(),
                        answer = %addr_to_ipv4(addr),
                        "DNS local answer"
                    );
                }
            }
            return QueryOutcome::Answered { addr };
        }

        if self.upstream.is_some() {
            return self.forward(client, query.id(), packet, now_ms);
        }

        if let Some(response) = self.encode(encode_nxdomain(packet)) {
            self.reply(client, &response);
            if self.log_queries {
                debug!(name = %query.name(), "DNS NXDOMAIN (no upstream)");
            }
        }
        QueryOutcome::NxDomain
    }

    fn forward(
        &mut self,
        client: SocketAddrV4,
        original_id: u16,
        packet: &mut [u8],
        now_ms: u32,
    ) -> QueryOutcome {
        let Some(upstream) = self.upstream.as_ref() else {
            return QueryOutcome::ForwardFailed;
        };

        let upstream_id = match self.table.allocate(client, original_id, now_ms) {
            Ok(id) => id,
            Err(e) => {
                warn!(client = %client, id = original_id, error = %e, "DNS forward dropped");
                return QueryOutcome::ForwardFailed;
            }
        };

        set_transaction_id(packet, upstream_id);

        if let Err(e) = upstream.sink.send_to(upstream.addr, packet) {
            self.table.cancel(upstream_id);
            let err = DnsError::SendFailed(e);
            warn!(upstream = %upstream.addr, error = %err, "DNS failed to forward query");
            return QueryOutcome::ForwardFailed;
        }

        self.forwarded += 1;
        if self.log_queries {
            debug!(
                client = %client,
                upstream = %upstream.addr,
                "DNS forwarded query (ID: {:04x} -> {:04x})",
                original_id,
                upstream_id
            );
        }
        QueryOutcome::Forwarded { upstream_id }
    }

    /// Handle a packet arriving on the upstream-facing socket. On a match the
    /// transaction ID is restored in place and the packet relayed to the client.
    pub fn handle_response(&mut self, source: SocketAddrV4, packet: &mut [u8]) -> ResponseOutcome {
        let Some(upstream) = self.upstream.as_ref() else {
            return ResponseOutcome::Dropped;
        };

        let upstream_id = match transaction_id(packet) {
            Ok(id) => id,
            Err(_) => return ResponseOutcome::Dropped,
        };

        if upstream.verify_source && source != upstream.addr {
            if self.log_queries {
                warn!(
                    from = %source,
                    expected = %upstream.addr,
                    "DNS response from unexpected source (spoofing detected)"
                );
            }
            return ResponseOutcome::Spoofed;
        }

        let Some(pending) = self.table.resolve(upstream_id) else {
            trace!(id = upstream_id, "DNS response with unknown ID discarded");
            return ResponseOutcome::UnknownId(upstream_id);
        };

        set_transaction_id(packet, pending.original_id);
        self.reply(pending.client, packet);

        if self.log_queries {
            debug!(
                client = %pending.client,
                "DNS relayed response (ID: {:04x} -> {:04x})",
                upstream_id,
                pending.original_id
            );
        }
        ResponseOutcome::Relayed {
            client: pending.client,
            original_id: pending.original_id,
        }
    }

    /// Evict stale forwards; called by the scheduler
    pub fn sweep(&mut self, now_ms: u32) -> usize {
        let evicted = self.table.sweep(now_ms);
        if evicted > 0 && self.log_queries {
            debug!(evicted = evicted, pending = self.table.len(), "DNS expired pending forwards");
        }
        evicted
    }

    pub fn query_count(&self) -> u64 {
        self.queries
    }

    pub fn forwarded_count(&self) -> u64 {
        self.forwarded
    }

    pub fn record_count(&self) -> usize {
        self.rules.len()
    }

    pub fn last_query(&self) -> &str {
        &self.last_query
    }

    pub fn has_upstream(&self) -> bool {
        self.upstream.is_some()
    }

    pub fn stats(&self) -> ProxyStats {
        ProxyStats {
            queries: self.queries,
            forwarded: self.forwarded,
            records: self.rules.len(),
            pending: self.table.len(),
            has_upstream: self.has_upstream(),
            last_query: self.last_query.clone(),
        }
    }

    fn reply(&self, client: SocketAddrV4, packet: &[u8]) {
        if let Err(e) = self.clients.send_to(client, packet) {
            warn!(client = %client, error = %e, "DNS failed to send response");
        }
    }

    fn encode(&self, result: Result<Vec<u8>, DnsError>) -> Option<Vec<u8>> {
        match result {
            Ok(response) => Some(response),
            Err(e) => {
                warn!(error = %e, "DNS failed to build response");
                None
            }
        }
    }
}
