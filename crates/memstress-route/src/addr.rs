//! # Socket Addresses
//!
//! Addresses carried in a routing message, one per slot, each serialized as
//! the kernel's `sockaddr` record for its family (FreeBSD layout):
//!
//! ```text
//! sockaddr_in   (16)  len | family | port(2) | addr(4)  | zero(8)
//! sockaddr_in6  (28)  len | family | port(2) | flow(4)  | addr(16) | scope(4)
//! sockaddr_dl   (54)  len | family | index(2) | type | nlen | alen | slen | data(46)
//! ```
//!
//! Every record occupies [`sa_size`] bytes on the wire.

use std::fmt;
use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, ToSocketAddrs};

use bytes::{BufMut, BytesMut};

use crate::error::RouteError;
use crate::wire::WireError;

// ─── Constants ───────────────────────────────────────────────────────────────

/// `AF_INET` as seen by the routing socket.
pub const AF_INET: u8 = 2;
/// `AF_LINK` as seen by the routing socket.
pub const AF_LINK: u8 = 18;
/// `AF_INET6` as seen by the routing socket.
pub const AF_INET6: u8 = 28;

/// `sizeof(struct sockaddr_in)`.
pub const SOCKADDR_IN_LEN: usize = 16;
/// `sizeof(struct sockaddr_in6)`.
pub const SOCKADDR_IN6_LEN: usize = 28;
/// `sizeof(struct sockaddr_dl)`.
pub const SOCKADDR_DL_LEN: usize = 54;

/// Room for interface name, link address and selector in a `sockaddr_dl`.
const SDL_DATA_LEN: usize = 46;

/// Records are padded to the size of a C `long`.
pub const SA_ALIGN: usize = std::mem::size_of::<libc::c_long>();

/// Space a record of `sa_len` bytes takes in a routing message (`SA_SIZE`).
///
/// An empty record still occupies one `long`.
#[inline]
pub fn sa_size(sa_len: usize) -> usize {
    if sa_len == 0 {
        SA_ALIGN
    } else {
        1 + ((sa_len - 1) | (SA_ALIGN - 1))
    }
}

// ─── Link-layer address ──────────────────────────────────────────────────────

/// Link-layer (`sockaddr_dl`) address.
///
/// Requests only ever send the all-zero [`LinkAddr::placeholder`]; replies
/// carry the interface index and name the kernel resolved.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct LinkAddr {
    /// Interface index (`sdl_index`).
    pub index: u16,
    /// Interface type (`sdl_type`).
    pub kind: u8,
    /// Interface name.
    pub name: String,
    /// Link-level address bytes.
    pub lladdr: Vec<u8>,
}

impl LinkAddr {
    /// Zero-length link address used to ask the kernel for the outbound interface.
    pub fn placeholder() -> Self {
        Self::default()
    }

    fn encode(&self, buf: &mut BytesMut) {
        let name = self.name.as_bytes();
        let nlen = name.len().min(SDL_DATA_LEN);
        let alen = self.lladdr.len().min(SDL_DATA_LEN - nlen);

        buf.put_u8(SOCKADDR_DL_LEN as u8);
        buf.put_u8(AF_LINK);
        buf.put_u16_ne(self.index);
        buf.put_u8(self.kind);
        buf.put_u8(nlen as u8);
        buf.put_u8(alen as u8);
        buf.put_u8(0);
        buf.put_slice(&name[..nlen]);
        buf.put_slice(&self.lladdr[..alen]);
        buf.put_bytes(0, SDL_DATA_LEN - nlen - alen);
    }

    fn decode(record: &[u8]) -> Self {
        let byte = |i: usize| record.get(i).copied().unwrap_or(0);
        let index = u16::from_ne_bytes([byte(2), byte(3)]);
        let data = record.get(8..).unwrap_or(&[]);
        let nlen = usize::from(byte(5)).min(data.len());
        let alen = usize::from(byte(6)).min(data.len() - nlen);

        LinkAddr {
            index,
            kind: byte(4),
            name: String::from_utf8_lossy(&data[..nlen]).into_owned(),
            lladdr: data[nlen..nlen + alen].to_vec(),
        }
    }
}

// ─── Address ─────────────────────────────────────────────────────────────────

/// One address slot's content.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Address {
    V4(Ipv4Addr),
    V6 { addr: Ipv6Addr, scope_id: u32 },
    Link(LinkAddr),
    /// A record of a family this crate does not interpret, kept verbatim
    /// (everything after the length and family bytes).
    Unknown { family: u8, bytes: Vec<u8> },
}

impl Address {
    /// Address family byte written into the record.
    pub fn family(&self) -> u8 {
        match self {
            Address::V4(_) => AF_INET,
            Address::V6 { .. } => AF_INET6,
            Address::Link(_) => AF_LINK,
            Address::Unknown { family, .. } => *family,
        }
    }

    /// Record length (`sa_len`).
    pub fn record_len(&self) -> usize {
        match self {
            Address::V4(_) => SOCKADDR_IN_LEN,
            Address::V6 { .. } => SOCKADDR_IN6_LEN,
            Address::Link(_) => SOCKADDR_DL_LEN,
            Address::Unknown { bytes, .. } => 2 + bytes.len(),
        }
    }

    /// Bytes this address takes in a routing message, padding included.
    pub fn wire_len(&self) -> usize {
        sa_size(self.record_len())
    }

    /// Append the record and its padding.
    pub fn encode(&self, buf: &mut BytesMut) {
        let start = buf.len();
        match self {
            Address::V4(ip) => {
                buf.put_u8(SOCKADDR_IN_LEN as u8);
                buf.put_u8(AF_INET);
                buf.put_u16(0);
                buf.put_slice(&ip.octets());
                buf.put_bytes(0, 8);
            }
            Address::V6 { addr, scope_id } => {
                buf.put_u8(SOCKADDR_IN6_LEN as u8);
                buf.put_u8(AF_INET6);
                buf.put_u16(0);
                buf.put_u32(0);
                buf.put_slice(&addr.octets());
                buf.put_u32_ne(*scope_id);
            }
            Address::Link(link) => link.encode(buf),
            Address::Unknown { family, bytes } => {
                buf.put_u8(self.record_len() as u8);
                buf.put_u8(*family);
                buf.put_slice(bytes);
            }
        }
        let written = buf.len() - start;
        buf.put_bytes(0, self.wire_len() - written);
    }

    /// Decode one record from the front of `buf`.
    ///
    /// Returns the address and the number of bytes it occupied. The kernel
    /// trims trailing zero bytes from masks, so short inet records are
    /// zero-extended rather than rejected.
    pub fn decode(buf: &[u8]) -> Result<(Self, usize), WireError> {
        if buf.len() < 2 {
            return Err(WireError::Truncated {
                needed: 2,
                available: buf.len(),
            });
        }
        let sa_len = usize::from(buf[0]);
        if buf.len() < sa_len {
            return Err(WireError::Truncated {
                needed: sa_len,
                available: buf.len(),
            });
        }
        let consumed = sa_size(sa_len).min(buf.len());
        let family = buf[1];
        let record = &buf[..sa_len.max(2)];

        let addr = match family {
            _ if sa_len == 0 => Address::Unknown {
                family: 0,
                bytes: Vec::new(),
            },
            AF_INET => {
                let mut octets = [0u8; 4];
                copy_clipped(&mut octets, record, 4);
                Address::V4(Ipv4Addr::from(octets))
            }
            AF_INET6 => {
                let mut octets = [0u8; 16];
                copy_clipped(&mut octets, record, 8);
                let mut scope = [0u8; 4];
                copy_clipped(&mut scope, record, 24);
                Address::V6 {
                    addr: Ipv6Addr::from(octets),
                    scope_id: u32::from_ne_bytes(scope),
                }
            }
            AF_LINK => Address::Link(LinkAddr::decode(record)),
            _ => Address::Unknown {
                family,
                bytes: record[2..].to_vec(),
            },
        };

        Ok((addr, consumed))
    }
}

/// Copy `record[offset..]` into `dst`, leaving missing tail bytes zero.
fn copy_clipped(dst: &mut [u8], record: &[u8], offset: usize) {
    if let Some(src) = record.get(offset..) {
        let n = src.len().min(dst.len());
        dst[..n].copy_from_slice(&src[..n]);
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Address::V4(ip) => ip.fmt(f),
            Address::V6 { addr, scope_id: 0 } => addr.fmt(f),
            Address::V6 { addr, scope_id } => write!(f, "{addr}%{scope_id}"),
            Address::Link(link) if link.name.is_empty() => write!(f, "link#{}", link.index),
            Address::Link(link) => f.write_str(&link.name),
            Address::Unknown { family, .. } => write!(f, "(family {family})"),
        }
    }
}

impl From<Ipv4Addr> for Address {
    fn from(ip: Ipv4Addr) -> Self {
        Address::V4(ip)
    }
}

impl From<Ipv6Addr> for Address {
    fn from(addr: Ipv6Addr) -> Self {
        Address::V6 { addr, scope_id: 0 }
    }
}

// ─── Parsing ─────────────────────────────────────────────────────────────────

/// Parse an IPv4 address the way `inet_aton(3)` does.
///
/// Accepts the dotted quad plus the shortened `a`, `a.b` and `a.b.c` forms,
/// with decimal, octal (`0` prefix) or hex (`0x` prefix) components.
pub fn parse_ipv4(text: &str) -> Result<Address, RouteError> {
    inet_aton(text)
        .map(Address::V4)
        .ok_or_else(|| RouteError::AddressParse(text.to_owned()))
}

fn inet_aton(text: &str) -> Option<Ipv4Addr> {
    let mut parts = [0u32; 4];
    let mut count = 0;
    for component in text.split('.') {
        if count == parts.len() {
            return None;
        }
        parts[count] = parse_component(component)?;
        count += 1;
    }

    let [a, b, c, d] = parts;
    let value = match count {
        1 => a,
        2 if a <= 0xff && b <= 0xff_ffff => (a << 24) | b,
        3 if a <= 0xff && b <= 0xff && c <= 0xffff => (a << 24) | (b << 16) | c,
        4 if parts.iter().all(|p| *p <= 0xff) => (a << 24) | (b << 16) | (c << 8) | d,
        _ => return None,
    };
    Some(Ipv4Addr::from(value))
}

fn parse_component(component: &str) -> Option<u32> {
    let (digits, radix) = if let Some(hex) = component
        .strip_prefix("0x")
        .or_else(|| component.strip_prefix("0X"))
    {
        (hex, 16)
    } else if component.len() > 1 && component.starts_with('0') {
        (&component[1..], 8)
    } else {
        (component, 10)
    };

    if digits.is_empty() || !digits.chars().all(|c| c.is_digit(radix)) {
        return None;
    }
    u32::from_str_radix(digits, radix).ok()
}

/// Parse an IPv6 address, falling back to the system resolver.
///
/// The fallback blocks and accepts host names as well as scoped literals
/// such as `fe80::1%em0`; only IPv6 results are considered.
pub fn parse_ipv6(text: &str) -> Result<Address, RouteError> {
    if let Ok(addr) = text.parse::<Ipv6Addr>() {
        return Ok(Address::from(addr));
    }

    let resolution_failure = |source| RouteError::AddressResolution {
        host: text.to_owned(),
        source,
    };

    (text, 0)
        .to_socket_addrs()
        .map_err(resolution_failure)?
        .find_map(|resolved| match resolved {
            SocketAddr::V6(v6) => Some(Address::V6 {
                addr: *v6.ip(),
                scope_id: v6.scope_id(),
            }),
            SocketAddr::V4(_) => None,
        })
        .ok_or_else(|| {
            resolution_failure(io::Error::new(
                io::ErrorKind::NotFound,
                "no IPv6 address found",
            ))
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encoded(addr: &Address) -> BytesMut {
        let mut buf = BytesMut::new();
        addr.encode(&mut buf);
        buf
    }

    #[test]
    fn sa_size_rounds_to_long() {
        assert_eq!(sa_size(0), SA_ALIGN);
        assert_eq!(sa_size(1), SA_ALIGN);
        assert_eq!(sa_size(SA_ALIGN), SA_ALIGN);
        assert_eq!(sa_size(SA_ALIGN + 1), 2 * SA_ALIGN);
        assert_eq!(sa_size(SOCKADDR_IN_LEN), 16);
    }

    #[test]
    fn ipv4_record_layout() {
        let buf = encoded(&Address::V4(Ipv4Addr::new(10, 0, 0, 5)));
        assert_eq!(buf.len(), 16);
        assert_eq!(buf[0], 16);
        assert_eq!(buf[1], AF_INET);
        assert_eq!(&buf[4..8], &[10, 0, 0, 5]);
        assert!(buf[8..].iter().all(|b| *b == 0));
    }

    #[test]
    fn ipv6_record_is_padded() {
        let addr = Address::V6 {
            addr: "2001:db8::1".parse().unwrap(),
            scope_id: 3,
        };
        let buf = encoded(&addr);
        assert_eq!(buf[0] as usize, SOCKADDR_IN6_LEN);
        assert_eq!(buf.len(), sa_size(SOCKADDR_IN6_LEN));
        assert_eq!(Address::decode(&buf).unwrap(), (addr, buf.len()));
    }

    #[test]
    fn link_placeholder_is_zeroed() {
        let buf = encoded(&Address::Link(LinkAddr::placeholder()));
        assert_eq!(buf[0] as usize, SOCKADDR_DL_LEN);
        assert_eq!(buf[1], AF_LINK);
        assert!(buf[2..].iter().all(|b| *b == 0));
        assert_eq!(buf.len(), sa_size(SOCKADDR_DL_LEN));
    }

    #[test]
    fn link_decode_reads_name() {
        let link = LinkAddr {
            index: 2,
            kind: 6,
            name: "em0".into(),
            lladdr: vec![0, 1, 2, 3, 4, 5],
        };
        let buf = encoded(&Address::Link(link.clone()));
        let (decoded, used) = Address::decode(&buf).unwrap();
        assert_eq!(decoded, Address::Link(link));
        assert_eq!(used, buf.len());
    }

    #[test]
    fn short_netmask_is_zero_extended() {
        // 255.255.0.0 as the kernel sends it: len 6, trailing zeros trimmed.
        let mut raw = vec![6u8, AF_INET, 0, 0, 255, 255];
        raw.resize(SA_ALIGN, 0);
        let (addr, used) = Address::decode(&raw).unwrap();
        assert_eq!(addr, Address::V4(Ipv4Addr::new(255, 255, 0, 0)));
        assert_eq!(used, SA_ALIGN);
    }

    #[test]
    fn truncated_record_is_rejected() {
        let raw = [16u8, AF_INET, 0, 0, 10];
        assert!(matches!(
            Address::decode(&raw),
            Err(WireError::Truncated { needed: 16, .. })
        ));
    }

    #[test]
    fn inet_aton_forms() {
        let v4 = |s: &str| match parse_ipv4(s).unwrap() {
            Address::V4(ip) => ip,
            other => panic!("unexpected {other:?}"),
        };
        assert_eq!(v4("10.0.0.5"), Ipv4Addr::new(10, 0, 0, 5));
        assert_eq!(v4("10.5"), Ipv4Addr::new(10, 0, 0, 5));
        assert_eq!(v4("10.1.5"), Ipv4Addr::new(10, 1, 0, 5));
        assert_eq!(v4("0x0a.010.0.1"), Ipv4Addr::new(10, 8, 0, 1));
        assert_eq!(v4("167772165"), Ipv4Addr::new(10, 0, 0, 5));
    }

    #[test]
    fn inet_aton_rejects_garbage() {
        for bad in ["", "1.2.3.4.5", "256.0.0.1", "1..2", "a.b.c.d", "09.1.1.1", "+1.2.3.4", "0x"] {
            assert!(
                matches!(parse_ipv4(bad), Err(RouteError::AddressParse(_))),
                "{bad:?} should not parse"
            );
        }
    }

    #[test]
    fn ipv6_literal() {
        assert_eq!(
            parse_ipv6("::1").unwrap(),
            Address::from(Ipv6Addr::LOCALHOST)
        );
    }

    #[test]
    fn ipv6_rejects_ipv4_literal() {
        assert!(matches!(
            parse_ipv6("10.0.0.1"),
            Err(RouteError::AddressResolution { .. })
        ));
    }
}
