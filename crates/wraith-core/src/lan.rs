//! LAN beacon: a collaborator interface, not a subsystem of its own.
//!
//! The session only needs two things from LAN discovery: a way to
//! classify an address as "probably reachable without a relay or a DHT
//! round-trip" (used by the transport picker to prefer a freshly seen
//! LAN address outright), and a beacon payload to announce our DHT key
//! on the local network. Routing tables, peer lists, and everything
//! else LAN discovery might do in a full implementation stay with the
//! embedder.
//!
//! `beacon_tick` takes no timing parameters of its own — cadence is the
//! caller's responsibility, same as every other component driven by the
//! session manager's tick loop.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

/// `NET_PACKET_LAN_DISCOVERY`
pub const PACKET_LAN_DISCOVERY: u8 = 0x21;

/// IPv6 multicast group LAN beacons are sent to.
pub const IPV6_LAN_MULTICAST: Ipv6Addr = Ipv6Addr::new(0xff02, 0, 0, 0, 0, 0, 0, 1);

/// Build a LAN beacon payload: `0x21 || our_dht_pubkey` (33 bytes).
#[must_use]
pub fn build_beacon_payload(our_dht_pubkey: &[u8; 32]) -> [u8; 33] {
    let mut out = [0u8; 33];
    out[0] = PACKET_LAN_DISCOVERY;
    out[1..].copy_from_slice(our_dht_pubkey);
    out
}

/// Parse a received LAN beacon payload, returning the sender's claimed
/// DHT public key.
#[must_use]
pub fn parse_beacon_payload(data: &[u8]) -> Option<[u8; 32]> {
    if data.len() != 33 || data[0] != PACKET_LAN_DISCOVERY {
        return None;
    }
    let mut key = [0u8; 32];
    key.copy_from_slice(&data[1..]);
    Some(key)
}

/// Whether `addr` is on a local network: private IPv4 ranges, CGNAT,
/// loopback, IPv4-mapped IPv6 whose embedded v4 is LAN, and IPv6
/// link-local / the LAN multicast group.
#[must_use]
pub fn is_lan_address(addr: IpAddr) -> bool {
    match addr {
        IpAddr::V4(v4) => is_lan_ipv4(v4),
        IpAddr::V6(v6) => is_lan_ipv6(v6),
    }
}

fn is_lan_ipv4(addr: Ipv4Addr) -> bool {
    if addr.is_loopback() {
        return true;
    }
    let octets = addr.octets();
    match octets {
        [10, ..] => true,
        [172, b, ..] if (16..=31).contains(&b) => true,
        [192, 168, ..] => true,
        [169, 254, c, _] => c != 0 && c != 255,
        [100, b, ..] if (64..=127).contains(&b) => true,
        _ => false,
    }
}

fn is_lan_ipv6(addr: Ipv6Addr) -> bool {
    if addr == IPV6_LAN_MULTICAST {
        return true;
    }
    // fe80::/10
    let segments = addr.segments();
    if (segments[0] & 0xffc0) == 0xfe80 {
        return true;
    }
    if let Some(v4) = addr.to_ipv4_mapped() {
        return is_lan_ipv4(v4);
    }
    false
}

/// Classify a socket address's LAN-ness (ignores the port).
#[must_use]
pub fn is_lan_socket_addr(addr: SocketAddr) -> bool {
    is_lan_address(addr.ip())
}

/// IPv4 broadcast targets and the IPv6 multicast target a beacon tick
/// should be sent to.
///
/// `interface_broadcasts` is the process-global cache of per-interface
/// IPv4 broadcast addresses; its refresh lifecycle ("refresh at init,
/// re-sample on explicit request") belongs to the embedder, since
/// enumerating interfaces is platform-specific and out of scope here.
#[must_use]
pub fn beacon_targets(interface_broadcasts: &[Ipv4Addr], port: u16) -> Vec<SocketAddr> {
    let mut targets: Vec<SocketAddr> = interface_broadcasts
        .iter()
        .map(|&addr| SocketAddr::new(IpAddr::V4(addr), port))
        .collect();
    targets.push(SocketAddr::new(IpAddr::V6(IPV6_LAN_MULTICAST), port));
    targets
}

/// Fire one beacon tick: build the payload and return the
/// `(payload, targets)` pair for the caller to hand to its UDP socket.
/// Stateless — the session manager decides when to call this.
#[must_use]
pub fn beacon_tick(
    our_dht_pubkey: &[u8; 32],
    interface_broadcasts: &[Ipv4Addr],
    port: u16,
) -> ([u8; 33], Vec<SocketAddr>) {
    (
        build_beacon_payload(our_dht_pubkey),
        beacon_targets(interface_broadcasts, port),
    )
}
