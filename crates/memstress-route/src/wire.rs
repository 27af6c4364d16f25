//! # Routing Message Format
//!
//! Requests and replies on the routing socket are an `rt_msghdr` followed by
//! the present address records in slot order (FreeBSD layout, native byte
//! order, `L` = `sizeof(long)`):
//!
//! ```text
//!  0       2     3     4       6       8
//! +-------+-----+-----+-------+-------+
//! |msglen |vers |type |index  |spare  |
//! +-------+-----+-----+-------+-------+---------+---------+---------+
//! | flags (i32) | addrs (i32) | pid (i32)       | seq (i32)         |
//! +-------------+-------------+-----------------+-------------------+
//! | errno (i32) | fmask (i32) | inits (L)       | metrics (14 × L)  |
//! +-------------+-------------+-----------------+-------------------+
//! | DST | GATEWAY | NETMASK | GENMASK | IFP | IFA   (present only)  |
//! +-----------------------------------------------------------------+
//! ```

use std::fmt;

use bytes::{BufMut, BytesMut};
use thiserror::Error;

use crate::addr::{Address, SA_ALIGN};
use crate::slots::{AddressSlotTable, Role};

// ─── Constants ───────────────────────────────────────────────────────────────

/// `RTM_VERSION`.
pub const RTM_VERSION: u8 = 5;

/// Number of `u_long` fields in `struct rt_metrics`.
const METRICS_FIELDS: usize = 14;

/// Size of `struct rt_msghdr`: 32 fixed bytes, `rtm_inits` and the metrics.
pub const HEADER_LEN: usize = 32 + SA_ALIGN * (1 + METRICS_FIELDS);

/// Room reserved after the header for reply addresses.
pub const REPLY_SPACE: usize = 512;

/// Size of the buffer a lookup reply is read into.
pub const REPLY_BUF_LEN: usize = HEADER_LEN + REPLY_SPACE;

// ─── Errors ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WireError {
    #[error("message truncated: need {needed} bytes, have {available}")]
    Truncated { needed: usize, available: usize },
    #[error("unsupported routing message version {0}")]
    Version(u8),
    #[error("unknown routing message type {0}")]
    UnknownType(u8),
}

// ─── Operation ───────────────────────────────────────────────────────────────

/// Routing message type (`rtm_type`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Operation {
    /// `RTM_ADD`
    Add = 1,
    /// `RTM_DELETE`
    Delete = 2,
    /// `RTM_CHANGE`
    Change = 3,
    /// `RTM_GET`
    Get = 4,
}

impl Operation {
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            1 => Some(Operation::Add),
            2 => Some(Operation::Delete),
            3 => Some(Operation::Change),
            4 => Some(Operation::Get),
            _ => None,
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Operation::Add => "add",
            Operation::Delete => "delete",
            Operation::Change => "change",
            Operation::Get => "get",
        })
    }
}

// ─── Flags ───────────────────────────────────────────────────────────────────

/// Route flags (`rtm_flags`).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct RouteFlags(i32);

impl RouteFlags {
    /// `RTF_UP`
    pub const UP: RouteFlags = RouteFlags(0x1);
    /// `RTF_GATEWAY`
    pub const GATEWAY: RouteFlags = RouteFlags(0x2);
    /// `RTF_HOST`
    pub const HOST: RouteFlags = RouteFlags(0x4);
    /// `RTF_STATIC`
    pub const STATIC: RouteFlags = RouteFlags(0x800);

    /// Flags for add/change/delete of a static host route via a gateway.
    pub const HOST_VIA_GATEWAY: RouteFlags =
        RouteFlags(Self::STATIC.0 | Self::UP.0 | Self::HOST.0 | Self::GATEWAY.0);
    /// Flags for a host route lookup.
    pub const HOST_LOOKUP: RouteFlags = RouteFlags(Self::STATIC.0 | Self::UP.0 | Self::HOST.0);

    pub const fn from_bits(bits: i32) -> Self {
        RouteFlags(bits)
    }

    pub const fn bits(self) -> i32 {
        self.0
    }

    pub const fn contains(self, other: RouteFlags) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for RouteFlags {
    type Output = RouteFlags;

    fn bitor(self, rhs: RouteFlags) -> RouteFlags {
        RouteFlags(self.0 | rhs.0)
    }
}

// ─── Metrics ─────────────────────────────────────────────────────────────────

/// `struct rt_metrics`. Requests send it zeroed; replies fill it in.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RouteMetrics {
    pub locks: u64,
    pub mtu: u64,
    pub hopcount: u64,
    pub expire: u64,
    pub recvpipe: u64,
    pub sendpipe: u64,
    pub ssthresh: u64,
    pub rtt: u64,
    pub rttvar: u64,
    pub pksent: u64,
    pub weight: u64,
    pub nhidx: u64,
    pub filler: [u64; 2],
}

impl RouteMetrics {
    fn fields(&self) -> [u64; METRICS_FIELDS] {
        [
            self.locks,
            self.mtu,
            self.hopcount,
            self.expire,
            self.recvpipe,
            self.sendpipe,
            self.ssthresh,
            self.rtt,
            self.rttvar,
            self.pksent,
            self.weight,
            self.nhidx,
            self.filler[0],
            self.filler[1],
        ]
    }

    fn from_fields(f: [u64; METRICS_FIELDS]) -> Self {
        RouteMetrics {
            locks: f[0],
            mtu: f[1],
            hopcount: f[2],
            expire: f[3],
            recvpipe: f[4],
            sendpipe: f[5],
            ssthresh: f[6],
            rtt: f[7],
            rttvar: f[8],
            pksent: f[9],
            weight: f[10],
            nhidx: f[11],
            filler: [f[12], f[13]],
        }
    }
}

fn put_ulong(buf: &mut BytesMut, v: u64) {
    if SA_ALIGN == 8 {
        buf.put_u64_ne(v);
    } else {
        buf.put_u32_ne(v as u32);
    }
}

// ─── Reader ──────────────────────────────────────────────────────────────────

/// Bounds-checked native-endian cursor over a reply.
struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8], WireError> {
        let end = self.pos + n;
        let bytes = self.buf.get(self.pos..end).ok_or(WireError::Truncated {
            needed: end,
            available: self.buf.len(),
        })?;
        self.pos = end;
        Ok(bytes)
    }

    fn u8(&mut self) -> Result<u8, WireError> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16, WireError> {
        let b = self.take(2)?;
        Ok(u16::from_ne_bytes([b[0], b[1]]))
    }

    fn i32(&mut self) -> Result<i32, WireError> {
        let b = self.take(4)?;
        Ok(i32::from_ne_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn ulong(&mut self) -> Result<u64, WireError> {
        let b = self.take(SA_ALIGN)?;
        let mut raw = [0u8; 8];
        if SA_ALIGN == 8 {
            raw.copy_from_slice(b);
            Ok(u64::from_ne_bytes(raw))
        } else {
            Ok(u64::from(u32::from_ne_bytes([b[0], b[1], b[2], b[3]])))
        }
    }
}

// ─── Routing Message ─────────────────────────────────────────────────────────

/// A decoded or to-be-encoded routing socket message.
///
/// `rtm_addrs` and `rtm_msglen` are not stored: they are derived from
/// [`RoutingMessage::addrs`] when encoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutingMessage {
    pub kind: Operation,
    pub flags: RouteFlags,
    pub version: u8,
    /// Interface index (`rtm_index`).
    pub index: u16,
    pub pid: i32,
    pub sequence: i32,
    /// Kernel-reported error on replies (`rtm_errno`).
    pub errno: i32,
    pub fmask: i32,
    pub inits: u64,
    pub metrics: RouteMetrics,
    pub addrs: AddressSlotTable,
}

impl RoutingMessage {
    /// Build a request carrying every populated slot of `addrs`.
    pub fn request(
        kind: Operation,
        flags: RouteFlags,
        sequence: i32,
        addrs: AddressSlotTable,
        metrics: RouteMetrics,
        inits: u64,
    ) -> Self {
        RoutingMessage {
            kind,
            flags,
            version: RTM_VERSION,
            index: 0,
            pid: 0,
            sequence,
            errno: 0,
            fmask: 0,
            inits,
            metrics,
            addrs,
        }
    }

    /// Presence bitmask (`rtm_addrs`).
    pub fn address_presence(&self) -> i32 {
        self.addrs.presence()
    }

    /// Address in `role`, if present.
    pub fn address(&self, role: Role) -> Option<&Address> {
        self.addrs.get(role)
    }

    /// `rtm_msglen`: header plus the serialized size of every present slot.
    pub fn encoded_len(&self) -> usize {
        HEADER_LEN + self.addrs.wire_len()
    }

    /// Encode the message into a buffer.
    pub fn encode(&self, buf: &mut BytesMut) {
        let len = self.encoded_len();
        buf.reserve(len);

        buf.put_u16_ne(len as u16);
        buf.put_u8(self.version);
        buf.put_u8(self.kind as u8);
        buf.put_u16_ne(self.index);
        buf.put_u16_ne(0);
        buf.put_i32_ne(self.flags.bits());
        buf.put_i32_ne(self.address_presence());
        buf.put_i32_ne(self.pid);
        buf.put_i32_ne(self.sequence);
        buf.put_i32_ne(self.errno);
        buf.put_i32_ne(self.fmask);
        put_ulong(buf, self.inits);
        for field in self.metrics.fields() {
            put_ulong(buf, field);
        }

        for (_, addr) in self.addrs.iter() {
            addr.encode(buf);
        }
    }

    /// Decode a message from a reply buffer.
    ///
    /// Only the first `rtm_msglen` bytes are considered.
    pub fn decode(buf: &[u8]) -> Result<Self, WireError> {
        if buf.len() < HEADER_LEN {
            return Err(WireError::Truncated {
                needed: HEADER_LEN,
                available: buf.len(),
            });
        }

        let mut r = Reader { buf, pos: 0 };
        let msglen = usize::from(r.u16()?);
        let version = r.u8()?;
        if version != RTM_VERSION {
            return Err(WireError::Version(version));
        }
        let type_byte = r.u8()?;
        let kind = Operation::from_byte(type_byte).ok_or(WireError::UnknownType(type_byte))?;
        let index = r.u16()?;
        let _spare = r.u16()?;
        let flags = RouteFlags::from_bits(r.i32()?);
        let presence = r.i32()?;
        let pid = r.i32()?;
        let sequence = r.i32()?;
        let errno = r.i32()?;
        let fmask = r.i32()?;
        let inits = r.ulong()?;
        let mut fields = [0u64; METRICS_FIELDS];
        for field in fields.iter_mut() {
            *field = r.ulong()?;
        }

        if buf.len() < msglen {
            return Err(WireError::Truncated {
                needed: msglen,
                available: buf.len(),
            });
        }
        let mut payload = &buf[HEADER_LEN..msglen.max(HEADER_LEN)];
        let mut addrs = AddressSlotTable::new();
        for role in Role::ALL {
            if presence & role.bit() == 0 {
                continue;
            }
            let (addr, used) = Address::decode(payload)?;
            addrs.set(role, addr);
            payload = &payload[used..];
        }

        Ok(RoutingMessage {
            kind,
            flags,
            version,
            index,
            pid,
            sequence,
            errno,
            fmask,
            inits,
            metrics: RouteMetrics::from_fields(fields),
            addrs,
        })
    }
}
