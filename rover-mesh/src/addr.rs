//! Rover identity helpers.
//!
//! Every rover owns a one-byte identifier.  Its canonical private network is
//! `10.0.<id>.0/24`; that address is what routing entries and transport
//! packets use to name a rover.  The address a neighbor is *reached through*
//! (the next hop) is a different thing: it is the interface address the
//! rover's advertisements arrive from.

use std::net::Ipv4Addr;

/// One-byte rover identifier carried in every advertisement header.
pub type RoverId = u8;

/// Prefix length advertised for every private rover network.
pub const DEFAULT_MASK: u8 = 24;

/// Canonical private address of rover `id`: `10.0.<id>.0`.
pub fn private_addr(id: RoverId) -> Ipv4Addr {
    Ipv4Addr::new(10, 0, id, 0)
}

/// Inverse of [`private_addr`].
///
/// Returns `None` for any address outside the `10.0.x.0` shape.
pub fn rover_id(addr: Ipv4Addr) -> Option<RoverId> {
    match addr.octets() {
        [10, 0, id, 0] => Some(id),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn private_addr_layout() {
        assert_eq!(private_addr(7), Ipv4Addr::new(10, 0, 7, 0));
        assert_eq!(private_addr(255), Ipv4Addr::new(10, 0, 255, 0));
    }

    #[test]
    fn rover_id_inverts_private_addr() {
        for id in [0u8, 1, 42, 255] {
            assert_eq!(rover_id(private_addr(id)), Some(id));
        }
    }

    #[test]
    fn rover_id_rejects_foreign_addresses() {
        assert_eq!(rover_id(Ipv4Addr::new(192, 168, 0, 1)), None);
        assert_eq!(rover_id(Ipv4Addr::new(10, 1, 3, 0)), None);
        assert_eq!(rover_id(Ipv4Addr::new(10, 0, 3, 1)), None);
    }
}
