//! DNS rewrite proxy: wire codec, rules, ID remapping and the UDP server.

pub mod forwarding;
pub mod proxy;
pub mod rules;
pub mod server;
pub mod upstream;
pub mod wire;

pub use server::{run_dns_server, DnsServer};
