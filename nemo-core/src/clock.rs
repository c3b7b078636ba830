//! Monotonic/wall clocks and the IPv6-address/`u64`-pair packing used on the
//! wire.

use nix::sys::time::{TimeSpec, TimeValLike};
use std::net::Ipv6Addr;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// Nanoseconds since an arbitrary, process-local epoch. Only ever compared
/// to other values from the same process; never sent to a peer as an
/// absolute instant (the wire timestamps are just "how many ns have passed
/// here", correlated by `seq_num`/`key`, not clock-synchronized).
pub fn mono_now(start: Instant) -> u64 {
    Instant::now().duration_since(start).as_nanos() as u64
}

/// Nanoseconds since the Unix epoch.
pub fn real_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as u64
}

/// Converts a [`Duration`] to a [`TimeSpec`], the unit `nix::sys::select::pselect`
/// expects for its timeout.
pub fn duration_to_timespec(d: Duration) -> TimeSpec {
    TimeSpec::nanoseconds(d.as_nanos() as i64)
}

/// Splits a [`Payload`](crate::payload::Payload)'s 128-bit IPv6 address into
/// its low/high `u64` halves, matching `fipv6`: byte `i` of `low` is the
/// `i`-th byte of the address's low 8 bytes, little-endian. Mutual inverse
/// of [`halves_to_ipv6`]. The source's other variant (masking without
/// shifting) is not reproduced here; it produces different bytes and was
/// flagged as a bug in the original.
pub fn ipv6_to_halves(addr: Ipv6Addr) -> (u64, u64) {
    let octets = addr.octets();
    let high = u64::from_le_bytes(octets[0..8].try_into().unwrap());
    let low = u64::from_le_bytes(octets[8..16].try_into().unwrap());
    (low, high)
}

/// Inverse of [`ipv6_to_halves`] (`tipv6`).
pub fn halves_to_ipv6(low: u64, high: u64) -> Ipv6Addr {
    let mut octets = [0u8; 16];
    octets[0..8].copy_from_slice(&high.to_le_bytes());
    octets[8..16].copy_from_slice(&low.to_le_bytes());
    Ipv6Addr::from(octets)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[test]
    fn ipv6_halves_are_mutual_inverses() {
        let addr: Ipv6Addr = "2001:db8::dead:beef:1234:5678".parse().unwrap();
        let (low, high) = ipv6_to_halves(addr);
        assert_eq!(halves_to_ipv6(low, high), addr);
    }

    #[test]
    fn ipv4_mapped_address_round_trips_too() {
        let v4 = Ipv4Addr::new(192, 0, 2, 1);
        let mapped = v4.to_ipv6_mapped();
        let (low, high) = ipv6_to_halves(mapped);
        assert_eq!(halves_to_ipv6(low, high), mapped);
    }

    #[test]
    fn mono_now_is_non_decreasing() {
        let start = Instant::now();
        let a = mono_now(start);
        std::thread::sleep(Duration::from_millis(1));
        let b = mono_now(start);
        assert!(b >= a);
    }
}
