//! Minimal DNS wire format codec (RFC 1035).
//!
//! Only what the rewrite proxy needs: the header transaction ID, the first
//! question name, and two synthesized replies (a single A record answer and
//! NXDOMAIN). Everything else in a packet is copied or relayed untouched.

use crate::error::DnsError;
use std::net::Ipv4Addr;

/// Size of the fixed DNS header
pub const HEADER_SIZE: usize = 12;
/// TTL of synthesized answers, in seconds
pub const ANSWER_TTL: u32 = 60;

// RFC 1035: Maximum label length is 63 characters
const MAX_LABEL_LEN: usize = 63;

// QR=1, AA=1, RD copied as set; RCODE in the low nibble
const FLAGS_ANSWER: [u8; 2] = [0x81, 0x80];
const FLAGS_NXDOMAIN: [u8; 2] = [0x81, 0x83];

const TYPE_A: u16 = 1;
const CLASS_IN: u16 = 1;
// Compression pointer to the question name at offset 12
const NAME_POINTER: [u8; 2] = [0xC0, 0x0C];
const QTYPE_QCLASS_LEN: usize = 4;

/// DNS response codes produced by this codec
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseCode {
    NoError = 0,
    NxDomain = 3,
}

/// Decoded view of an inbound query: transaction ID and question name.
///
/// The name is decoded leniently. An oversized label or one running past the
/// end of the buffer stops decoding and keeps whatever labels were read, so
/// a mangled question still yields a (possibly truncated) name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DnsQuery {
    id: u16,
    name: String,
}

impl DnsQuery {
    /// Decode the header ID and question name from a raw packet
    pub fn parse(buf: &[u8]) -> Result<DnsQuery, DnsError> {
        let id = transaction_id(buf)?;
        let name = parse_name(&buf[HEADER_SIZE..]);
        Ok(DnsQuery { id, name })
    }

    /// Get transaction ID
    pub fn id(&self) -> u16 {
        self.id
    }

    /// Get query name, labels joined with '.', no trailing dot
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Read the transaction ID of any DNS packet (query or response)
pub fn transaction_id(buf: &[u8]) -> Result<u16, DnsError> {
    if buf.len() < HEADER_SIZE {
        return Err(DnsError::Malformed("Packet too short for DNS header"));
    }
    Ok(u16::from_be_bytes([buf[0], buf[1]]))
}

/// Overwrite the transaction ID of a packet in place.
///
/// The caller must already have checked the header length.
pub fn set_transaction_id(buf: &mut [u8], id: u16) {
    buf[..2].copy_from_slice(&id.to_be_bytes());
}

/// Decode a sequence of length-prefixed labels
fn parse_name(data: &[u8]) -> String {
    let mut name = String::new();
    let mut pos = 0;

    while pos < data.len() && data[pos] != 0 {
        let len = data[pos] as usize;
        pos += 1;
        if len > MAX_LABEL_LEN || pos + len > data.len() {
            break;
        }

        if !name.is_empty() {
            name.push('.');
        }
        name.push_str(&String::from_utf8_lossy(&data[pos..pos + len]));
        pos += len;
    }

    name
}

/// Offset just past the question section: name bytes up to and including the
/// zero terminator, then QTYPE and QCLASS. Clamped to the buffer length.
fn question_end(request: &[u8]) -> usize {
    let name_end = request[HEADER_SIZE..]
        .iter()
        .position(|&b| b == 0)
        .map(|p| HEADER_SIZE + p + 1)
        .unwrap_or(request.len());
    (name_end + QTYPE_QCLASS_LEN).min(request.len())
}

/// Header + question shared by both synthesized replies
fn begin_reply(request: &[u8], flags: [u8; 2], ancount: u16) -> Result<Vec<u8>, DnsError> {
    if request.len() < HEADER_SIZE {
        return Err(DnsError::Malformed("Packet too short for DNS header"));
    }

    let mut response = Vec::with_capacity(512);
    response.extend_from_slice(&request[0..2]); // ID
    response.extend_from_slice(&flags);
    response.extend_from_slice(&request[4..6]); // QDCOUNT
    response.extend_from_slice(&ancount.to_be_bytes());
    response.extend_from_slice(&[0x00, 0x00]); // NSCOUNT
    response.extend_from_slice(&[0x00, 0x00]); // ARCOUNT
    response.extend_from_slice(&request[HEADER_SIZE..question_end(request)]);
    Ok(response)
}

/// Build an authoritative answer carrying one A record for `addr`.
///
/// `addr` uses the [`parse_ip`] layout and is written little-endian, which
/// puts the octets on the wire in their textual order.
pub fn encode_answer(request: &[u8], addr: u32) -> Result<Vec<u8>, DnsError> {
    let mut response = begin_reply(request, FLAGS_ANSWER, 1)?;

    response.extend_from_slice(&NAME_POINTER);
    response.extend_from_slice(&TYPE_A.to_be_bytes());
    response.extend_from_slice(&CLASS_IN.to_be_bytes());
    response.extend_from_slice(&ANSWER_TTL.to_be_bytes());
    response.extend_from_slice(&4u16.to_be_bytes()); // RDLENGTH
    response.extend_from_slice(&addr.to_le_bytes());

    Ok(response)
}

/// Build an authoritative NXDOMAIN reply with no records
pub fn encode_nxdomain(request: &[u8]) -> Result<Vec<u8>, DnsError> {
    begin_reply(request, FLAGS_NXDOMAIN, 0)
}

/// Parse dotted-decimal IPv4 text into the record address layout:
/// `o0 | o1 << 8 | o2 << 16 | o3 << 24`, octets in textual order.
pub fn parse_ip(text: &str) -> Result<u32, DnsError> {
    let ip: Ipv4Addr = text
        .trim()
        .parse()
        .map_err(|_| DnsError::InvalidAddress(text.to_string()))?;
    Ok(u32::from_le_bytes(ip.octets()))
}

/// Inverse of [`parse_ip`], for display
pub fn addr_to_ipv4(addr: u32) -> Ipv4Addr {
    Ipv4Addr::from(addr.to_le_bytes())
}

/// Response code of a reply packet
pub fn response_code(buf: &[u8]) -> Option<u8> {
    buf.get(3).map(|flags| flags & 0x0F)
}

// ==================== Helper for building DNS packets (tests) ====================
