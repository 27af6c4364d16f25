//! # memstress-route
//!
//! Client for the kernel routing control socket (`PF_ROUTE`).
//!
//! Builds `rt_msghdr` requests for IPv4/IPv6 host routes, writes them to the
//! routing socket and decodes lookup replies.
//!
//! ## Crate structure
//!
//! - [`addr`] — Typed addresses and their `sockaddr` wire records
//! - [`slots`] — Per-session address slots keyed by role
//! - [`wire`] — Routing message header and codec
//! - [`socket`] — Control-socket transport
//! - [`session`] — Routing session: add/change/delete/get
//! - [`error`] — Error type shared by the above
//! - [`test_util`] — Scripted in-memory kernel for tests

pub mod addr;
pub mod error;
pub mod session;
pub mod slots;
pub mod socket;
pub mod test_util;
pub mod wire;

pub use addr::{parse_ipv4, parse_ipv6, Address, LinkAddr};
pub use error::RouteError;
pub use session::RoutingSession;
pub use slots::{AddressSlotTable, Role};
pub use socket::{RouteSocket, RouteTransport};
pub use wire::{Operation, RouteFlags, RoutingMessage};
