//! Duration/size-suffix parsing and the plain `Config` structs each binary
//! builds from its own `clap::Parser`. Deliberately `clap`-free: keeping
//! these types free of the CLI layer is what makes the round engine and
//! event loop unit-testable without going through argument parsing.

use std::time::Duration;

/// Duration suffixes accepted on `-i`/`-u`/`-w`/`-d`, longest-first so `"ms"`
/// is tried before `"m"` matches it by accident.
const DURATION_SUFFIXES: &[(&str, u64)] = &[
    ("ns", 1),
    ("us", 1_000),
    ("ms", 1_000_000),
    ("s", 1_000_000_000),
    ("m", 60_000_000_000),
    ("h", 3_600_000_000_000),
    ("d", 86_400_000_000_000),
    ("w", 604_800_000_000_000),
];

/// Parses a duration string like `"500ms"`, `"30s"`, `"2h"` (case
/// insensitive). Rejects partial numeric consumption (e.g. `"30xs"`) and
/// detects multiplier overflow rather than silently wrapping.
pub fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    let lower = s.to_ascii_lowercase();

    for &(suffix, ns_per_unit) in DURATION_SUFFIXES {
        if let Some(num_str) = lower.strip_suffix(suffix) {
            if num_str.is_empty() {
                return Err(format!("missing number before suffix `{suffix}` in `{s}`"));
            }
            let num: u64 = num_str
                .parse()
                .map_err(|_| format!("invalid duration `{s}`: `{num_str}` is not a number"))?;
            let nanos = num
                .checked_mul(ns_per_unit)
                .ok_or_else(|| format!("duration `{s}` overflows"))?;
            return Ok(Duration::from_nanos(nanos));
        }
    }

    Err(format!(
        "invalid duration `{s}` (expected a number followed by one of ns/us/ms/s/m/h/d/w)"
    ))
}

/// Memory-size suffixes (base 1024), longest-first for the same reason as
/// above (`"kb"` before `"k"`, etc. is irrelevant here since none is a
/// prefix of another, but the table is kept in this order for
/// readability).
const SIZE_SUFFIXES: &[(&str, u64)] = &[
    ("gb", 1024 * 1024 * 1024),
    ("g", 1024 * 1024 * 1024),
    ("mb", 1024 * 1024),
    ("m", 1024 * 1024),
    ("kb", 1024),
    ("k", 1024),
    ("b", 1),
];

/// Parses a byte-size string like `"64k"`, `"1mb"`, `"128"` (bare numbers
/// are bytes). Case insensitive; rejects overflow and partial consumption.
pub fn parse_size(s: &str) -> Result<usize, String> {
    let s = s.trim();
    let lower = s.to_ascii_lowercase();

    for &(suffix, bytes_per_unit) in SIZE_SUFFIXES {
        if let Some(num_str) = lower.strip_suffix(suffix) {
            if num_str.is_empty() {
                return Err(format!("missing number before suffix `{suffix}` in `{s}`"));
            }
            let num: u64 = num_str
                .parse()
                .map_err(|_| format!("invalid size `{s}`: `{num_str}` is not a number"))?;
            let bytes = num
                .checked_mul(bytes_per_unit)
                .ok_or_else(|| format!("size `{s}` overflows"))?;
            return usize::try_from(bytes).map_err(|_| format!("size `{s}` overflows"));
        }
    }

    s.parse::<usize>()
        .map_err(|_| format!("invalid size `{s}` (expected a number, optionally suffixed with b/k/kb/m/mb/g/gb)"))
}

/// Lower/upper bounds for the `-l`/`--length` flag (§6).
pub const MIN_PAYLOAD_LENGTH: u16 = crate::payload::BASE_SIZE as u16;
pub const MAX_PAYLOAD_LENGTH: u16 = 64436;

/// Lower/upper bounds for the `-p`/`--port` flag.
pub const MIN_PORT: u16 = 1;
pub const DEFAULT_PORT: u16 = 23000;

/// Default outgoing hop limit (`-t`/`--ttl`).
pub const DEFAULT_TTL: u8 = 64;

/// Report output mode, selected by `-b`/`-q`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReportMode {
    #[default]
    Csv,
    Binary,
    Quiet,
}

/// Requester-side configuration, built from `nemo-rq`'s `Cli` struct.
#[derive(Debug, Clone)]
pub struct RequesterConfig {
    pub ipv6: bool,
    pub targets: Vec<String>,
    pub report_mode: ReportMode,
    pub round_count: u64,
    pub exit_on_error: bool,
    pub grouped: bool,
    pub interval: Duration,
    pub max_targets: usize,
    pub key: u64,
    pub payload_length: u16,
    pub monologue: bool,
    pub port: u16,
    pub recv_buf: usize,
    pub send_buf: usize,
    pub ttl: u8,
    pub refresh: Duration,
    pub final_wait: Duration,
    pub daemonize: bool,
}

/// Responder-side configuration, built from `nemo-rp`'s `Cli` struct.
#[derive(Debug, Clone)]
pub struct ResponderConfig {
    pub ipv6: bool,
    pub plugins: Vec<String>,
    pub report_mode: ReportMode,
    pub exit_on_error: bool,
    pub key: u64,
    pub payload_length: u16,
    pub monologue: bool,
    pub port: u16,
    pub recv_buf: usize,
    pub send_buf: usize,
    pub ttl: u8,
    pub inactivity_timeout: Option<Duration>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_each_duration_suffix() {
        assert_eq!(parse_duration("500ms").unwrap(), Duration::from_millis(500));
        assert_eq!(parse_duration("30s").unwrap(), Duration::from_secs(30));
        assert_eq!(parse_duration("2m").unwrap(), Duration::from_secs(120));
        assert_eq!(parse_duration("1h").unwrap(), Duration::from_secs(3600));
        assert_eq!(parse_duration("1d").unwrap(), Duration::from_secs(86400));
        assert_eq!(parse_duration("1w").unwrap(), Duration::from_secs(604800));
        assert_eq!(parse_duration("100ns").unwrap(), Duration::from_nanos(100));
        assert_eq!(parse_duration("100us").unwrap(), Duration::from_micros(100));
    }

    #[test]
    fn rejects_partial_numeric_consumption() {
        assert!(parse_duration("30xs").is_err());
        assert!(parse_duration("s").is_err());
    }

    #[test]
    fn rejects_unknown_suffix() {
        assert!(parse_duration("30y").is_err());
    }

    #[test]
    fn detects_duration_overflow() {
        assert!(parse_duration(&format!("{}w", u64::MAX)).is_err());
    }

    #[test]
    fn parses_each_size_suffix() {
        assert_eq!(parse_size("128").unwrap(), 128);
        assert_eq!(parse_size("64k").unwrap(), 64 * 1024);
        assert_eq!(parse_size("1kb").unwrap(), 1024);
        assert_eq!(parse_size("1m").unwrap(), 1024 * 1024);
        assert_eq!(parse_size("1mb").unwrap(), 1024 * 1024);
        assert_eq!(parse_size("1g").unwrap(), 1024 * 1024 * 1024);
        assert_eq!(parse_size("1gb").unwrap(), 1024 * 1024 * 1024);
        assert_eq!(parse_size("10b").unwrap(), 10);
    }

    #[test]
    fn detects_size_overflow() {
        assert!(parse_size(&format!("{}gb", u64::MAX)).is_err());
    }
}
