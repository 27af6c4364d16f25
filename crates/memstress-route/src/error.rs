use std::io;

use thiserror::Error;

use crate::wire::{Operation, WireError};

/// Errors returned by routing-socket operations.
///
/// A session also keeps the platform error code of the most recent failure,
/// see [`RoutingSession::last_error`](crate::RoutingSession::last_error).
#[derive(Debug, Error)]
pub enum RouteError {
    #[error("failed to create routing socket: {0}")]
    SocketCreation(#[source] io::Error),
    #[error("failed to bind routing socket to fib {fib}: {source}")]
    ScopeBind { fib: i32, source: io::Error },
    #[error("invalid IPv4 address {0:?}")]
    AddressParse(String),
    #[error("failed to resolve IPv6 address {host:?}: {source}")]
    AddressResolution { host: String, source: io::Error },
    #[error("route {op} failed: {source}")]
    Transport { op: Operation, source: io::Error },
    #[error("route {op} reply malformed: {source}")]
    Reply { op: Operation, source: WireError },
}

impl RouteError {
    /// Platform error code (`errno`) recorded for this failure.
    pub fn errno(&self) -> i32 {
        match self {
            RouteError::SocketCreation(source)
            | RouteError::ScopeBind { source, .. }
            | RouteError::AddressResolution { source, .. }
            | RouteError::Transport { source, .. } => source.raw_os_error().unwrap_or(libc::EIO),
            RouteError::AddressParse(_) => libc::EINVAL,
            RouteError::Reply { .. } => libc::EBADMSG,
        }
    }
}
