//! Transaction-ID remapping for queries forwarded upstream.

use crate::config::ForwardingConfig;
use crate::error::DnsError;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashMap;
use std::net::SocketAddrV4;
use std::time::Instant;

/// Default staleness window for pending forwards
pub const DEFAULT_TIMEOUT_MS: u32 = 5000;

/// One query waiting for its upstream answer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingForward {
    pub client: SocketAddrV4,
    pub original_id: u16,
    pub created_ms: u32,
}

/// Millisecond monotonic clock truncated to 32 bits.
///
/// Wraps after ~49.7 days; ages are always computed with `wrapping_sub`.
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    start: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        MonotonicClock {
            start: Instant::now(),
        }
    }

    pub fn now_ms(&self) -> u32 {
        self.start.elapsed().as_millis() as u32
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

/// Pending forwards keyed by the transaction ID used upstream.
///
/// Keys are drawn at random and never overwrite a live entry: a draw that
/// collides (or equals the client's own ID) is retried, and after
/// `max_attempts` draws the allocation fails.
pub struct ForwardingTable<R = StdRng> {
    entries: HashMap<u16, PendingForward>,
    rng: R,
    timeout_ms: u32,
    max_attempts: u32,
}

impl ForwardingTable<StdRng> {
    pub fn new(config: &ForwardingConfig) -> Self {
        Self::with_rng(config, StdRng::from_entropy())
    }
}

impl<R: Rng> ForwardingTable<R> {
    pub fn with_rng(config: &ForwardingConfig, rng: R) -> Self {
        ForwardingTable {
            entries: HashMap::new(),
            rng,
            timeout_ms: config.timeout_ms,
            max_attempts: config.max_id_attempts.max(1),
        }
    }

    /// Reserve a fresh upstream ID for a client query
    pub fn allocate(
        &mut self,
        client: SocketAddrV4,
        original_id: u16,
        now_ms: u32,
    ) -> Result<u16, DnsError> {
        for _ in 0..self.max_attempts {
            let new_id: u16 = self.rng.gen();
            if new_id == original_id || self.entries.contains_key(&new_id) {
                continue;
            }

            self.entries.insert(
                new_id,
                PendingForward {
                    client,
                    original_id,
                    created_ms: now_ms,
                },
            );
            return Ok(new_id);
        }

        Err(DnsError::IdsExhausted {
            attempts: self.max_attempts,
        })
    }

    /// Take the entry for an upstream ID. A second call for the same ID
    /// returns `None`.
    pub fn resolve(&mut self, new_id: u16) -> Option<PendingForward> {
        self.entries.remove(&new_id)
    }

    /// Drop a tentative entry whose forward never left the proxy
    pub fn cancel(&mut self, new_id: u16) {
        self.entries.remove(&new_id);
    }

    /// Evict entries older than the staleness window, returning how many
    pub fn sweep(&mut self, now_ms: u32) -> usize {
        let before = self.entries.len();
        let timeout_ms = self.timeout_ms;
        self.entries
            .retain(|_, entry| now_ms.wrapping_sub(entry.created_ms) <= timeout_ms);
        before - self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
