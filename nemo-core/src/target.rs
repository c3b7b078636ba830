//! Parsing, resolving, deduplicating, and sorting the requester's target
//! list.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, ToSocketAddrs};

/// Per-name cap on resolved addresses (§4.F): excess results are dropped
/// with a warning rather than silently truncated without comment.
const MAX_ADDRS_PER_NAME: usize = 32;

/// Hard ceiling on the number of targets regardless of configuration.
pub const HARD_MAX_TARGETS: usize = 2048;

/// Default value for the requester's `-j`/`--max-targets` flag.
pub const DEFAULT_MAX_TARGETS: usize = 64;

/// One resolved probe destination.
#[derive(Debug, Clone)]
pub struct Target {
    pub ip_version: u8,
    pub addr_low: u64,
    pub addr_high: u64,
    /// The string this target was parsed or resolved from, kept for
    /// logging only. Excluded from equality, ordering, and hashing so two
    /// targets resolved from different names but the same address still
    /// dedup to one entry under `sort()` + `dedup()`.
    pub source_name: Option<String>,
}

impl PartialEq for Target {
    fn eq(&self, other: &Self) -> bool {
        (self.ip_version, self.addr_low, self.addr_high) == (other.ip_version, other.addr_low, other.addr_high)
    }
}

impl Eq for Target {}

impl PartialOrd for Target {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Target {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (self.ip_version, self.addr_low, self.addr_high).cmp(&(other.ip_version, other.addr_low, other.addr_high))
    }
}

impl Target {
    fn from_ip(ip: IpAddr, source_name: Option<&str>) -> Self {
        match ip {
            IpAddr::V4(v4) => {
                let octets = v4.octets();
                Target {
                    ip_version: 4,
                    addr_low: u32::from_be_bytes(octets) as u64,
                    addr_high: 0,
                    source_name: source_name.map(str::to_owned),
                }
            }
            IpAddr::V6(v6) => {
                let (low, high) = crate::clock::ipv6_to_halves(v6);
                Target {
                    ip_version: 6,
                    addr_low: low,
                    addr_high: high,
                    source_name: source_name.map(str::to_owned),
                }
            }
        }
    }

    pub fn to_ip(&self) -> IpAddr {
        match self.ip_version {
            4 => IpAddr::V4(Ipv4Addr::from((self.addr_low as u32).to_be_bytes())),
            _ => IpAddr::V6(crate::clock::halves_to_ipv6(self.addr_low, self.addr_high)),
        }
    }
}

// `source_name` must not participate in equality/ordering: two targets
// resolved from different hostnames but sharing an address are the same
// probe destination and must dedup to one entry.
impl std::hash::Hash for Target {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.ip_version.hash(state);
        self.addr_low.hash(state);
        self.addr_high.hash(state);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnabledFamily {
    V4,
    V6,
}

/// Parses/resolves every string in `names`, applies the per-name resolution
/// cap, then sorts and deduplicates byte-wise before applying
/// `max_targets`. Names that fail to resolve are logged and skipped rather
/// than aborting the whole load.
pub fn load_targets(
    names: &[String],
    family: EnabledFamily,
    max_targets: usize,
) -> Vec<Target> {
    let max_targets = max_targets.min(HARD_MAX_TARGETS);
    let mut targets = Vec::new();

    for name in names {
        if let Ok(ip) = name.parse::<Ipv4Addr>() {
            if family == EnabledFamily::V4 {
                targets.push(Target::from_ip(IpAddr::V4(ip), Some(name)));
            }
            continue;
        }
        if let Ok(ip) = name.parse::<Ipv6Addr>() {
            if family == EnabledFamily::V6 {
                targets.push(Target::from_ip(IpAddr::V6(ip), Some(name)));
            }
            continue;
        }

        match resolve_name(name) {
            Ok(addrs) => {
                let mut matched = addrs
                    .into_iter()
                    .filter(|ip| matches!((family, ip), (EnabledFamily::V4, IpAddr::V4(_)) | (EnabledFamily::V6, IpAddr::V6(_))));

                let mut count = 0;
                for ip in matched.by_ref() {
                    if count >= MAX_ADDRS_PER_NAME {
                        tracing::warn!(
                            name,
                            cap = MAX_ADDRS_PER_NAME,
                            "dropping excess resolved addresses for target"
                        );
                        break;
                    }
                    targets.push(Target::from_ip(ip, Some(name)));
                    count += 1;
                }
            }
            Err(e) => {
                tracing::warn!(name, error = %e, "failed to resolve target, skipping");
            }
        }
    }

    targets.sort();
    targets.dedup();
    targets.truncate(max_targets);
    targets
}

fn resolve_name(name: &str) -> std::io::Result<Vec<IpAddr>> {
    // `ToSocketAddrs` needs a port; it is discarded immediately below. This
    // is the idiomatic stand-in for "resolve as a name with a DGRAM hint
    // and unspecified family" on top of `std::net`.
    let with_port = format!("{name}:0");
    Ok(with_port
        .to_socket_addrs()?
        .map(|sa: SocketAddr| sa.ip())
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dedups_literal_ipv4_targets() {
        let names = vec![
            "1.1.1.1".to_string(),
            "1.1.1.1".to_string(),
            "2.2.2.2".to_string(),
        ];
        let targets = load_targets(&names, EnabledFamily::V4, DEFAULT_MAX_TARGETS);
        assert_eq!(targets.len(), 2);
        assert_eq!(targets[0].to_ip(), "1.1.1.1".parse::<IpAddr>().unwrap());
        assert_eq!(targets[1].to_ip(), "2.2.2.2".parse::<IpAddr>().unwrap());
    }

    #[test]
    fn sorted_lexicographically() {
        let names = vec!["2.2.2.2".to_string(), "1.1.1.1".to_string()];
        let targets = load_targets(&names, EnabledFamily::V4, DEFAULT_MAX_TARGETS);
        assert!(targets[0] < targets[1]);
    }

    #[test]
    fn ipv6_literal_ignored_when_v4_enabled() {
        let names = vec!["::1".to_string()];
        let targets = load_targets(&names, EnabledFamily::V4, DEFAULT_MAX_TARGETS);
        assert!(targets.is_empty());
    }

    #[test]
    fn max_targets_is_enforced_after_dedup() {
        let names: Vec<String> = (0..10).map(|i| format!("10.0.0.{i}")).collect();
        let targets = load_targets(&names, EnabledFamily::V4, 3);
        assert_eq!(targets.len(), 3);
    }

    #[test]
    fn hard_cap_overrides_a_larger_configured_max() {
        assert!(DEFAULT_MAX_TARGETS < HARD_MAX_TARGETS);
    }

    #[test]
    fn dedup_ignores_source_name_differences() {
        let a = Target {
            ip_version: 4,
            addr_low: 1,
            addr_high: 0,
            source_name: Some("host-a".to_string()),
        };
        let b = Target {
            ip_version: 4,
            addr_low: 1,
            addr_high: 0,
            source_name: Some("host-b".to_string()),
        };
        let mut targets = vec![a, b];
        targets.sort();
        targets.dedup();
        assert_eq!(targets.len(), 1);
    }
}
