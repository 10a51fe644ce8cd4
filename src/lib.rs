//! dns-rewrite-proxy - a small DNS proxy that answers configured names
//! locally and forwards everything else upstream.
//!
//! The library exposes the proxy core for testing and embedding.

pub mod config;
pub mod dns;
pub mod error;
pub mod logging;
