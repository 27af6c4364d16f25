//! # Address Slots
//!
//! A routing message carries up to six addresses, each in a fixed role. The
//! table keeps one optional address per role plus the presence bitmask that
//! becomes `rtm_addrs`.
//!
//! Slots persist across requests: setting the destination leaves a gateway
//! stored by an earlier call in place, and it is sent again. Use
//! [`AddressSlotTable::clear`] when a request must not carry it.

use crate::addr::Address;

/// Role of an address within a routing message, in wire order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Role {
    /// `RTAX_DST`
    Dst = 0,
    /// `RTAX_GATEWAY`
    Gateway = 1,
    /// `RTAX_NETMASK`
    Netmask = 2,
    /// `RTAX_GENMASK`
    Genmask = 3,
    /// `RTAX_IFP`
    Ifp = 4,
    /// `RTAX_IFA`
    Ifa = 5,
}

impl Role {
    /// Number of roles (`RTAX_MAX`).
    pub const COUNT: usize = 6;

    /// All roles in the order their addresses appear on the wire.
    pub const ALL: [Role; Role::COUNT] = [
        Role::Dst,
        Role::Gateway,
        Role::Netmask,
        Role::Genmask,
        Role::Ifp,
        Role::Ifa,
    ];

    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }

    /// The role's `RTA_*` presence bit.
    #[inline]
    pub fn bit(self) -> i32 {
        1 << (self as i32)
    }
}

/// Per-session address storage keyed by [`Role`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AddressSlotTable {
    slots: [Option<Address>; Role::COUNT],
    presence: i32,
}

impl AddressSlotTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `addr` in `role`, replacing whatever was there.
    pub fn set(&mut self, role: Role, addr: Address) {
        self.slots[role.index()] = Some(addr);
        self.presence |= role.bit();
    }

    /// Empty `role`.
    pub fn clear(&mut self, role: Role) {
        self.slots[role.index()] = None;
        self.presence &= !role.bit();
    }

    pub fn get(&self, role: Role) -> Option<&Address> {
        self.slots[role.index()].as_ref()
    }

    pub fn is_set(&self, role: Role) -> bool {
        self.presence & role.bit() != 0
    }

    /// Presence bitmask (`rtm_addrs`).
    pub fn presence(&self) -> i32 {
        self.presence
    }

    /// Number of populated slots.
    pub fn len(&self) -> usize {
        self.presence.count_ones() as usize
    }

    pub fn is_empty(&self) -> bool {
        self.presence == 0
    }

    /// Populated slots in wire order.
    pub fn iter(&self) -> impl Iterator<Item = (Role, &Address)> + '_ {
        Role::ALL
            .into_iter()
            .filter_map(move |role| self.get(role).map(|addr| (role, addr)))
    }

    /// Total serialized size of the populated slots, padding included.
    pub fn wire_len(&self) -> usize {
        self.iter().map(|(_, addr)| addr.wire_len()).sum()
    }
}
