//! # Routing Session
//!
//! One routing socket bound to one fib, plus the address slots and header
//! template every request is built from. Requests are strictly one at a time:
//! write the message, and for lookups read the single reply.
//!
//! ```text
//!  add/change/delete/get ──▶ slots ──▶ RoutingMessage ──▶ transport.send
//!                                                          │ (get only)
//!                                          decode ◀── transport.recv
//! ```
//!
//! Slots are not reset between calls (see [`crate::slots`]). A lookup with
//! no interface slot gets a link-layer placeholder there, which then stays.

use bytes::BytesMut;

use crate::addr::{Address, LinkAddr};
use crate::error::RouteError;
use crate::slots::{AddressSlotTable, Role};
use crate::socket::{RouteSocket, RouteTransport};
use crate::wire::{
    Operation, RouteFlags, RouteMetrics, RoutingMessage, WireError, REPLY_BUF_LEN,
};

/// A routing-socket session.
///
/// Not meant to be shared between threads: each request waits for the
/// kernel on the calling thread.
#[derive(Debug)]
pub struct RoutingSession<T = RouteSocket> {
    fib: i32,
    transport: T,
    slots: AddressSlotTable,
    /// Sequence number of the next message built.
    sequence: i32,
    metrics: RouteMetrics,
    inits: u64,
    last_error: Option<i32>,
}

impl RoutingSession<RouteSocket> {
    /// Open a routing socket bound to `fib`.
    pub fn open(fib: i32) -> Result<Self, RouteError> {
        let socket = RouteSocket::open().map_err(RouteError::SocketCreation)?;
        Self::with_transport(socket, fib)
    }
}

impl<T: RouteTransport> RoutingSession<T> {
    /// Build a session over `transport` and bind it to `fib`.
    pub fn with_transport(transport: T, fib: i32) -> Result<Self, RouteError> {
        let mut session = RoutingSession {
            fib,
            transport,
            slots: AddressSlotTable::new(),
            sequence: 1,
            metrics: RouteMetrics::default(),
            inits: 0,
            last_error: None,
        };
        session.set_fib(fib)?;
        Ok(session)
    }

    /// Add a static host route to `dest` via `gateway`.
    pub fn add(&mut self, dest: &Address, gateway: &Address) -> Result<(), RouteError> {
        self.modify(Operation::Add, RouteFlags::HOST_VIA_GATEWAY, dest, Some(gateway))
    }

    /// Point the host route to `dest` at `gateway`.
    pub fn change(&mut self, dest: &Address, gateway: &Address) -> Result<(), RouteError> {
        self.modify(Operation::Change, RouteFlags::HOST_VIA_GATEWAY, dest, Some(gateway))
    }

    /// Delete the host route to `dest`. The gateway slot is sent as it is.
    pub fn delete(&mut self, dest: &Address) -> Result<(), RouteError> {
        self.modify(Operation::Delete, RouteFlags::HOST_VIA_GATEWAY, dest, None)
    }

    /// Look up the route to `dest` and return the kernel's reply.
    pub fn get(&mut self, dest: &Address) -> Result<RoutingMessage, RouteError> {
        if !self.slots.is_set(Role::Ifp) {
            self.slots.set(Role::Ifp, Address::Link(LinkAddr::placeholder()));
        }
        let sequence = self.sequence;
        self.modify(Operation::Get, RouteFlags::HOST_LOOKUP, dest, None)?;
        self.read_reply(Operation::Get, sequence)
    }

    /// Rebind the session to routing table `fib`.
    ///
    /// On failure the error is recorded and the session stays usable.
    pub fn set_fib(&mut self, fib: i32) -> Result<(), RouteError> {
        self.fib = fib;
        match self.transport.set_fib(fib) {
            Ok(()) => {
                tracing::debug!(fib, "routing socket bound to fib");
                Ok(())
            }
            Err(source) => Err(self.record(RouteError::ScopeBind { fib, source })),
        }
    }

    pub fn fib(&self) -> i32 {
        self.fib
    }

    /// Platform error code of the most recent failed call, if any.
    pub fn last_error(&self) -> Option<i32> {
        self.last_error
    }

    pub fn slots(&self) -> &AddressSlotTable {
        &self.slots
    }

    /// Direct access to the slots, e.g. to [`clear`](AddressSlotTable::clear)
    /// a remembered gateway or set an interface address.
    pub fn slots_mut(&mut self) -> &mut AddressSlotTable {
        &mut self.slots
    }

    /// Sequence number the next request will carry.
    pub fn next_sequence(&self) -> i32 {
        self.sequence
    }

    /// Build the request for `op` from the current slots.
    pub fn build(&mut self, op: Operation, flags: RouteFlags) -> RoutingMessage {
        let sequence = self.sequence;
        self.sequence = self.sequence.checked_add(1).unwrap_or(1);
        RoutingMessage::request(
            op,
            flags,
            sequence,
            self.slots.clone(),
            self.metrics,
            self.inits,
        )
    }

    fn modify(
        &mut self,
        op: Operation,
        flags: RouteFlags,
        dest: &Address,
        gateway: Option<&Address>,
    ) -> Result<(), RouteError> {
        self.slots.set(Role::Dst, dest.clone());
        if let Some(gateway) = gateway {
            self.slots.set(Role::Gateway, gateway.clone());
        }

        let request = self.build(op, flags);
        let mut buf = BytesMut::with_capacity(request.encoded_len());
        request.encode(&mut buf);

        tracing::debug!(
            %op,
            %dest,
            seq = request.sequence,
            addrs = request.address_presence(),
            len = buf.len(),
            "routing request"
        );

        match self.transport.send(&buf) {
            Ok(n) if n == buf.len() => {}
            Ok(n) => {
                let source = std::io::Error::new(
                    std::io::ErrorKind::WriteZero,
                    format!("short write: {n} of {} bytes", buf.len()),
                );
                return Err(self.record(RouteError::Transport { op, source }));
            }
            Err(source) => return Err(self.record(RouteError::Transport { op, source })),
        }

        Ok(())
    }

    /// Read until the reply to request `sequence` from this process arrives.
    ///
    /// The socket also delivers echoes of earlier requests and kernel
    /// broadcasts; those are skipped, including types this crate does not
    /// decode.
    fn read_reply(&mut self, op: Operation, sequence: i32) -> Result<RoutingMessage, RouteError> {
        let pid = std::process::id() as i32;
        let mut reply = vec![0u8; REPLY_BUF_LEN];
        loop {
            let n = match self.transport.recv(&mut reply) {
                Ok(n) => n,
                Err(source) => return Err(self.record(RouteError::Transport { op, source })),
            };
            match RoutingMessage::decode(&reply[..n]) {
                Ok(msg) if msg.pid == pid && msg.sequence == sequence => return Ok(msg),
                Ok(msg) => tracing::trace!(
                    kind = %msg.kind,
                    pid = msg.pid,
                    seq = msg.sequence,
                    "skipping unrelated routing message"
                ),
                Err(WireError::UnknownType(kind)) => {
                    tracing::trace!(kind, "skipping routing broadcast")
                }
                Err(source) => return Err(self.record(RouteError::Reply { op, source })),
            }
        }
    }

    fn record(&mut self, err: RouteError) -> RouteError {
        let errno = err.errno();
        self.last_error = Some(errno);
        tracing::warn!(fib = self.fib, errno, error = %err, "routing request failed");
        err
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::FakeKernel;
    use crate::wire::{HEADER_LEN, RTM_VERSION};
    use std::net::Ipv4Addr;

    fn v4(a: u8, b: u8, c: u8, d: u8) -> Address {
        Address::V4(Ipv4Addr::new(a, b, c, d))
    }

    fn session(kernel: &FakeKernel) -> RoutingSession<FakeKernel> {
        RoutingSession::with_transport(kernel.clone(), 0).unwrap()
    }

    #[test]
    fn add_sends_host_gateway_request() {
        let kernel = FakeKernel::new();
        let mut s = session(&kernel);
        s.add(&v4(10, 0, 0, 5), &v4(1, 0, 0, 1)).unwrap();

        let state = kernel.state();
        let req = &state.requests[0];
        assert_eq!(req.kind, Operation::Add);
        assert_eq!(req.flags, RouteFlags::HOST_VIA_GATEWAY);
        assert_eq!(req.address_presence(), 0x3);
        assert_eq!(req.address(Role::Gateway), Some(&v4(1, 0, 0, 1)));
        assert_eq!(s.last_error(), None);
    }

    #[test]
    fn sequence_increments_per_message() {
        let kernel = FakeKernel::new();
        let mut s = session(&kernel);
        assert_eq!(s.next_sequence(), 1);
        s.add(&v4(10, 0, 0, 5), &v4(1, 0, 0, 1)).unwrap();
        s.delete(&v4(10, 0, 0, 5)).unwrap();
        assert_eq!(s.next_sequence(), 3);

        let seqs: Vec<i32> = kernel.state().requests.iter().map(|m| m.sequence).collect();
        assert_eq!(seqs, vec![1, 2]);
    }

    #[test]
    fn sessions_do_not_share_sequences() {
        let kernel = FakeKernel::new();
        let mut a = session(&kernel);
        let mut b = session(&kernel);
        a.add(&v4(10, 0, 0, 5), &v4(1, 0, 0, 1)).unwrap();
        b.add(&v4(10, 0, 0, 6), &v4(1, 0, 0, 1)).unwrap();

        let seqs: Vec<i32> = kernel.state().requests.iter().map(|m| m.sequence).collect();
        assert_eq!(seqs, vec![1, 1]);
    }

    #[test]
    fn delete_resends_remembered_gateway() {
        let kernel = FakeKernel::new();
        let mut s = session(&kernel);
        s.add(&v4(10, 0, 0, 5), &v4(1, 0, 0, 1)).unwrap();
        s.delete(&v4(10, 0, 0, 5)).unwrap();

        let state = kernel.state();
        let del = &state.requests[1];
        assert_eq!(del.kind, Operation::Delete);
        assert_eq!(del.address(Role::Gateway), Some(&v4(1, 0, 0, 1)));
        assert_eq!(del.flags, RouteFlags::HOST_VIA_GATEWAY);
    }

    #[test]
    fn cleared_gateway_is_not_sent() {
        let kernel = FakeKernel::new();
        let mut s = session(&kernel);
        s.add(&v4(10, 0, 0, 5), &v4(1, 0, 0, 1)).unwrap();
        s.slots_mut().clear(Role::Gateway);
        s.delete(&v4(10, 0, 0, 5)).unwrap();

        assert_eq!(kernel.state().requests[1].address_presence(), 0x1);
    }

    #[test]
    fn get_adds_interface_placeholder_and_returns_reply() {
        let kernel = FakeKernel::new();
        let mut s = session(&kernel);
        s.add(&v4(10, 0, 0, 5), &v4(1, 0, 0, 1)).unwrap();
        let reply = s.get(&v4(10, 0, 0, 5)).unwrap();

        let state = kernel.state();
        let req = &state.requests[1];
        assert_eq!(req.flags, RouteFlags::HOST_LOOKUP);
        assert_eq!(
            req.address(Role::Ifp),
            Some(&Address::Link(LinkAddr::placeholder()))
        );
        assert_eq!(req.address_presence(), 0x13);
        assert_eq!(req.encoded_len(), HEADER_LEN + 16 + 16 + crate::addr::sa_size(54));

        assert_eq!(reply.kind, Operation::Get);
        assert_eq!(reply.sequence, 2);
        assert_eq!(reply.address(Role::Gateway), Some(&v4(1, 0, 0, 1)));
        // The placeholder stays in the session afterwards.
        assert!(s.slots().is_set(Role::Ifp));
    }

    #[test]
    fn get_keeps_caller_interface() {
        let kernel = FakeKernel::new();
        let mut s = session(&kernel);
        let ifp = Address::Link(LinkAddr {
            index: 3,
            name: "em1".into(),
            ..LinkAddr::default()
        });
        s.slots_mut().set(Role::Ifp, ifp.clone());
        s.add(&v4(10, 0, 0, 5), &v4(1, 0, 0, 1)).unwrap();
        s.get(&v4(10, 0, 0, 5)).unwrap();

        assert_eq!(kernel.state().requests[1].address(Role::Ifp), Some(&ifp));
    }

    #[test]
    fn transport_failure_records_errno() {
        let kernel = FakeKernel::new().fail_request(1, libc::ENETUNREACH);
        let mut s = session(&kernel);
        let err = s.add(&v4(10, 0, 0, 5), &v4(1, 0, 0, 1)).unwrap_err();

        assert!(matches!(err, RouteError::Transport { op: Operation::Add, .. }));
        assert_eq!(s.last_error(), Some(libc::ENETUNREACH));

        // Error is kept until the next failure overwrites it.
        s.add(&v4(10, 0, 0, 6), &v4(1, 0, 0, 1)).unwrap();
        assert_eq!(s.last_error(), Some(libc::ENETUNREACH));
        s.get(&v4(10, 9, 9, 9)).unwrap_err();
        assert_eq!(s.last_error(), Some(libc::ESRCH));
    }

    #[test]
    fn get_reply_read_failure_records_errno() {
        let kernel = FakeKernel::new().fail_recv(libc::ENOBUFS);
        let mut s = session(&kernel);
        s.add(&v4(10, 0, 0, 5), &v4(1, 0, 0, 1)).unwrap();

        let err = s.get(&v4(10, 0, 0, 5)).unwrap_err();
        assert!(matches!(err, RouteError::Transport { op: Operation::Get, .. }));
        assert_eq!(s.last_error(), Some(libc::ENOBUFS));
    }

    #[test]
    fn get_skips_echoes_and_broadcasts() {
        let kernel = FakeKernel::new();
        let mut s = session(&kernel);
        s.add(&v4(10, 0, 0, 5), &v4(1, 0, 0, 1)).unwrap();

        let encoded = |msg: &RoutingMessage| {
            let mut buf = BytesMut::new();
            msg.encode(&mut buf);
            buf.to_vec()
        };
        // Echo of our own add.
        let mut echo = kernel.state().requests[0].clone();
        echo.pid = std::process::id() as i32;
        kernel.broadcast(encoded(&echo));
        // Another process's lookup that happens to share our sequence.
        let mut foreign = echo.clone();
        foreign.kind = Operation::Get;
        foreign.pid = echo.pid.wrapping_add(1);
        foreign.sequence = s.next_sequence();
        kernel.broadcast(encoded(&foreign));
        // Interface announcement (RTM_IFINFO).
        let mut ifinfo = encoded(&echo);
        ifinfo[3] = 0xe;
        kernel.broadcast(ifinfo);

        let reply = s.get(&v4(10, 0, 0, 5)).unwrap();
        assert_eq!(reply.kind, Operation::Get);
        assert_eq!(reply.sequence, 2);
        assert_eq!(s.last_error(), None);
        assert!(kernel.state().broadcasts.is_empty());
    }

    #[test]
    fn get_reply_of_unknown_version_is_an_error() {
        let kernel = FakeKernel::new();
        let mut s = session(&kernel);
        s.add(&v4(10, 0, 0, 5), &v4(1, 0, 0, 1)).unwrap();

        let mut buf = BytesMut::new();
        kernel.state().requests[0].encode(&mut buf);
        buf[2] = RTM_VERSION + 1;
        kernel.broadcast(buf.to_vec());

        let err = s.get(&v4(10, 0, 0, 5)).unwrap_err();
        assert!(matches!(err, RouteError::Reply { op: Operation::Get, .. }));
        assert_eq!(s.last_error(), Some(libc::EBADMSG));
    }

    #[test]
    fn fib_failure_is_not_fatal() {
        let kernel = FakeKernel::new();
        let mut s = session(&kernel);
        kernel.state().fail_fib = Some(libc::EINVAL);

        let err = s.set_fib(3).unwrap_err();
        assert!(matches!(err, RouteError::ScopeBind { fib: 3, .. }));
        assert_eq!(s.last_error(), Some(libc::EINVAL));
        assert_eq!(s.fib(), 3);

        s.add(&v4(10, 0, 0, 5), &v4(1, 0, 0, 1)).unwrap();
    }

    #[test]
    fn open_over_failing_fib_is_an_error() {
        let kernel = FakeKernel::new().fail_fib(libc::EINVAL);
        let err = RoutingSession::with_transport(kernel, 1).unwrap_err();
        assert_eq!(err.errno(), libc::EINVAL);
    }
}
