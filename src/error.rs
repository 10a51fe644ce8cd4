//! Structured error types for the rewrite proxy.

use std::fmt;
use std::io;

/// Main error type for proxy startup and configuration
#[derive(Debug)]
pub enum ProxyError {
    /// IO error (socket binding, file operations)
    Io(io::Error),
    /// Configuration error
    Config(String),
    /// DNS core error
    Dns(DnsError),
}

impl fmt::Display for ProxyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProxyError::Io(e) => write!(f, "IO error: {}", e),
            ProxyError::Config(msg) => write!(f, "Configuration error: {}", msg),
            ProxyError::Dns(e) => write!(f, "DNS error: {}", e),
        }
    }
}

impl std::error::Error for ProxyError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ProxyError::Io(e) => Some(e),
            ProxyError::Dns(e) => Some(e),
            ProxyError::Config(_) => None,
        }
    }
}

impl From<io::Error> for ProxyError {
    fn from(err: io::Error) -> Self {
        ProxyError::Io(err)
    }
}

impl From<DnsError> for ProxyError {
    fn from(err: DnsError) -> Self {
        ProxyError::Dns(err)
    }
}

/// Errors raised by the packet codec, rule loading and forwarding table.
///
/// None of these are fatal: on the request path each one costs a single
/// query (dropped or lost), never the process.
#[derive(Debug)]
pub enum DnsError {
    /// Packet too short to carry a DNS header
    Malformed(&'static str),
    /// Record address is not a dotted-decimal IPv4 address
    InvalidAddress(String),
    /// No free transaction ID found for a forward
    IdsExhausted { attempts: u32 },
    /// Send collaborator refused the packet
    SendFailed(io::Error),
    /// Upstream resolver could not be discovered
    Discovery(String),
}

impl fmt::Display for DnsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DnsError::Malformed(msg) => write!(f, "Malformed DNS packet: {}", msg),
            DnsError::InvalidAddress(addr) => {
                write!(f, "Invalid IPv4 address: {:?}", addr)
            }
            DnsError::IdsExhausted { attempts } => {
                write!(f, "No free transaction ID after {} attempts", attempts)
            }
            DnsError::SendFailed(e) => write!(f, "DNS send failed: {}", e),
            DnsError::Discovery(msg) => write!(f, "Upstream discovery failed: {}", msg),
        }
    }
}

impl std::error::Error for DnsError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            DnsError::SendFailed(e) => Some(e),
            _ => None,
        }
    }
}

/// Convenience type alias for Results using ProxyError
pub type Result<T> = std::result::Result<T, ProxyError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;

    #[test]
    fn test_proxy_error_io_display() {
        let io_err = io::Error::new(io::ErrorKind::AddrInUse, "address in use");
        let err = ProxyError::Io(io_err);
        assert!(err.to_string().contains("IO error"));
    }

    #[test]
    fn test_proxy_error_config_display() {
        let err = ProxyError::Config("listen address must be IPv4".to_string());
        assert_eq!(
            err.to_string(),
            "Configuration error: listen address must be IPv4"
        );
    }

    #[test]
    fn test_proxy_error_from_dns() {
        let err: ProxyError = DnsError::InvalidAddress("1.2.3".to_string()).into();
        assert!(matches!(err, ProxyError::Dns(DnsError::InvalidAddress(_))));
        assert!(err.to_string().contains("1.2.3"));
    }

    #[test]
    fn test_proxy_error_source() {
        let err = ProxyError::Dns(DnsError::Malformed("short"));
        assert!(err.source().is_some());

        let err = ProxyError::Config("bad".to_string());
        assert!(err.source().is_none());
    }

    #[test]
    fn test_dns_error_ids_exhausted() {
        let err = DnsError::IdsExhausted { attempts: 16 };
        assert_eq!(err.to_string(), "No free transaction ID after 16 attempts");
    }

    #[test]
    fn test_dns_error_send_failed_has_source() {
        let err = DnsError::SendFailed(io::Error::new(io::ErrorKind::WouldBlock, "busy"));
        assert!(err.to_string().contains("send failed"));
        assert!(err.source().is_some());
    }

    #[test]
    fn test_dns_error_malformed() {
        let err = DnsError::Malformed("Packet too short for DNS header");
        assert!(err.to_string().contains("too short"));
        assert!(err.source().is_none());
    }
}
