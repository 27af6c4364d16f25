//! In-memory stand-in for the kernel side of a routing socket.
//!
//! [`FakeKernel`] decodes every request it is sent, keeps a host route table
//! keyed by destination, answers lookups and can be told to fail the Nth
//! request with a given errno.

use std::collections::{HashMap, VecDeque};
use std::io;
use std::sync::{Arc, Mutex, MutexGuard};

use bytes::BytesMut;

use crate::addr::Address;
use crate::slots::Role;
use crate::socket::RouteTransport;
use crate::wire::{Operation, RoutingMessage};

/// Shared state of a [`FakeKernel`]; clone the handle to inspect it after the
/// transport has been moved into a session.
#[derive(Debug, Default)]
pub struct KernelState {
    /// Every request received, in order, including failed ones.
    pub requests: Vec<RoutingMessage>,
    /// Destination → gateway.
    pub routes: HashMap<Address, Option<Address>>,
    /// Fib the transport is bound to.
    pub fib: i32,
    /// Fail request number N (1-based) with the errno.
    pub fail_at: Option<(usize, i32)>,
    /// Fail every `set_fib` with the errno.
    pub fail_fib: Option<i32>,
    /// Reject add of an existing route and delete of a missing one.
    pub strict: bool,
    /// Fail every `recv` with the errno.
    pub fail_recv: Option<i32>,
    /// Raw messages delivered by `recv` ahead of any reply.
    pub broadcasts: VecDeque<Vec<u8>>,
    pending_reply: Option<Vec<u8>>,
}

impl KernelState {
    pub fn count(&self, op: Operation) -> usize {
        self.requests.iter().filter(|m| m.kind == op).count()
    }

    /// Destinations of every request of type `op`, in order.
    pub fn destinations(&self, op: Operation) -> Vec<Address> {
        self.requests
            .iter()
            .filter(|m| m.kind == op)
            .filter_map(|m| m.address(Role::Dst).cloned())
            .collect()
    }
}

#[derive(Debug, Clone, Default)]
pub struct FakeKernel {
    state: Arc<Mutex<KernelState>>,
}

impl FakeKernel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Kernel that rejects duplicate adds and deletes of unknown routes.
    pub fn strict() -> Self {
        let kernel = Self::new();
        kernel.state().strict = true;
        kernel
    }

    /// Fail the `nth` request (1-based) with `errno`.
    pub fn fail_request(self, nth: usize, errno: i32) -> Self {
        self.state().fail_at = Some((nth, errno));
        self
    }

    /// Fail every fib bind with `errno`.
    pub fn fail_fib(self, errno: i32) -> Self {
        self.state().fail_fib = Some(errno);
        self
    }

    /// Fail every reply read with `errno`.
    pub fn fail_recv(self, errno: i32) -> Self {
        self.state().fail_recv = Some(errno);
        self
    }

    /// Queue a raw message that `recv` hands out before the next reply.
    pub fn broadcast(&self, msg: Vec<u8>) {
        self.state().broadcasts.push_back(msg);
    }

    pub fn state(&self) -> MutexGuard<'_, KernelState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn apply(state: &mut KernelState, req: &RoutingMessage) -> Result<Option<RoutingMessage>, i32> {
        let dst = req.address(Role::Dst).cloned().ok_or(libc::EINVAL)?;
        let gateway = req.address(Role::Gateway).cloned();
        match req.kind {
            Operation::Add => {
                if state.strict && state.routes.contains_key(&dst) {
                    return Err(libc::EEXIST);
                }
                state.routes.insert(dst, gateway);
                Ok(None)
            }
            Operation::Change => match state.routes.get_mut(&dst) {
                Some(entry) => {
                    *entry = gateway;
                    Ok(None)
                }
                None => Err(libc::ESRCH),
            },
            Operation::Delete => match state.routes.remove(&dst) {
                Some(_) => Ok(None),
                None if state.strict => Err(libc::ESRCH),
                None => Ok(None),
            },
            Operation::Get => {
                let stored = state.routes.get(&dst).ok_or(libc::ESRCH)?;
                let mut reply = req.clone();
                reply.pid = std::process::id() as i32;
                reply.addrs.clear(Role::Gateway);
                if let Some(gw) = stored {
                    reply.addrs.set(Role::Gateway, gw.clone());
                }
                Ok(Some(reply))
            }
        }
    }
}

impl RouteTransport for FakeKernel {
    fn send(&mut self, msg: &[u8]) -> io::Result<usize> {
        let mut state = self.state();
        let req = RoutingMessage::decode(msg)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        state.requests.push(req.clone());

        if let Some((nth, errno)) = state.fail_at {
            if state.requests.len() == nth {
                return Err(io::Error::from_raw_os_error(errno));
            }
        }

        let reply = Self::apply(&mut state, &req).map_err(io::Error::from_raw_os_error)?;
        state.pending_reply = reply.map(|reply| {
            let mut buf = BytesMut::new();
            reply.encode(&mut buf);
            buf.to_vec()
        });
        Ok(msg.len())
    }

    fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut state = self.state();
        if let Some(errno) = state.fail_recv {
            return Err(io::Error::from_raw_os_error(errno));
        }
        let reply = match state.broadcasts.pop_front() {
            Some(msg) => msg,
            None => state
                .pending_reply
                .take()
                .ok_or_else(|| io::Error::from_raw_os_error(libc::EAGAIN))?,
        };
        let n = reply.len().min(buf.len());
        buf[..n].copy_from_slice(&reply[..n]);
        Ok(n)
    }

    fn set_fib(&mut self, fib: i32) -> io::Result<()> {
        let mut state = self.state();
        if let Some(errno) = state.fail_fib {
            return Err(io::Error::from_raw_os_error(errno));
        }
        state.fib = fib;
        Ok(())
    }
}
