//! The requester's command-line surface (§6). Kept separate from
//! `nemo_core::config` so the core library never depends on `clap`.

use clap::Parser;
use nemo_core::config::{parse_duration, parse_size, RequesterConfig, ReportMode, DEFAULT_TTL};
use nemo_core::target::DEFAULT_MAX_TARGETS;
use std::time::Duration;

/// Sends `nemo` request probes to one or more targets and reports the
/// round-trip results.
#[derive(Debug, Parser)]
#[command(name = "nemo-rq", version, about)]
pub struct Cli {
    /// Targets to probe: IPv4/IPv6 literals or hostnames.
    #[arg(required = true)]
    pub targets: Vec<String>,

    /// IPv6-only (default is IPv4).
    #[arg(short = '6', long = "ipv6")]
    pub ipv6: bool,

    /// Binary report mode: no header, raw 88-byte records.
    #[arg(short = 'b', long = "binary")]
    pub binary: bool,

    /// Number of request rounds to run.
    #[arg(short = 'c', long = "count", default_value_t = 1)]
    pub count: u64,

    /// Daemonize after startup.
    #[arg(short = 'd', long = "daemonize")]
    pub daemonize: bool,

    /// Exit on the first network error.
    #[arg(short = 'e', long = "exit-on-error")]
    pub exit_on_error: bool,

    /// Grouped rounds: one pause per round instead of spreading sends.
    #[arg(short = 'g', long = "grouped")]
    pub grouped: bool,

    /// Interval between rounds.
    #[arg(short = 'i', long = "interval", value_parser = parse_duration, default_value = "1s")]
    pub interval: Duration,

    /// Maximum number of targets after resolution and dedup.
    #[arg(short = 'j', long = "max-targets", default_value_t = DEFAULT_MAX_TARGETS)]
    pub max_targets: usize,

    /// Identity/filter key (0 disables filtering on send; replies are
    /// always tagged with this value).
    #[arg(short = 'k', long = "key", default_value_t = 0)]
    pub key: u64,

    /// Payload length in bytes (88..=64436).
    #[arg(short = 'l', long = "length", default_value_t = nemo_core::config::MIN_PAYLOAD_LENGTH)]
    pub length: u16,

    /// Monologue mode: send requests but never expect or capture replies.
    #[arg(short = 'm', long = "monologue")]
    pub monologue: bool,

    /// Disable log coloring.
    #[arg(short = 'n', long = "no-color")]
    pub no_color: bool,

    /// UDP port to send from and expect replies on.
    #[arg(short = 'p', long = "port", default_value_t = nemo_core::config::DEFAULT_PORT)]
    pub port: u16,

    /// Suppress the report stream entirely.
    #[arg(short = 'q', long = "quiet")]
    pub quiet: bool,

    /// Socket receive buffer size.
    #[arg(short = 'r', long = "recv-buf", value_parser = parse_size, default_value = "64k")]
    pub recv_buf: usize,

    /// Socket send buffer size.
    #[arg(short = 's', long = "send-buf", value_parser = parse_size, default_value = "64k")]
    pub send_buf: usize,

    /// Outgoing hop limit (TTL).
    #[arg(short = 't', long = "ttl", default_value_t = DEFAULT_TTL)]
    pub ttl: u8,

    /// Target-list re-resolution period.
    #[arg(short = 'u', long = "refresh", value_parser = parse_duration, default_value = "1h")]
    pub refresh: Duration,

    /// Bump log verbosity; repeatable.
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Final wait after the last round, to collect late replies.
    #[arg(short = 'w', long = "final-wait", value_parser = parse_duration, default_value = "2s")]
    pub final_wait: Duration,
}

impl Cli {
    pub fn report_mode(&self) -> ReportMode {
        if self.quiet {
            ReportMode::Quiet
        } else if self.binary {
            ReportMode::Binary
        } else {
            ReportMode::Csv
        }
    }

    pub fn into_config(self) -> RequesterConfig {
        let report_mode = self.report_mode();
        RequesterConfig {
            ipv6: self.ipv6,
            targets: self.targets,
            report_mode,
            round_count: self.count,
            exit_on_error: self.exit_on_error,
            grouped: self.grouped,
            interval: self.interval,
            max_targets: self.max_targets,
            key: self.key,
            payload_length: self.length,
            monologue: self.monologue,
            port: self.port,
            recv_buf: self.recv_buf,
            send_buf: self.send_buf,
            ttl: self.ttl,
            refresh: self.refresh,
            final_wait: self.final_wait,
            daemonize: self.daemonize,
        }
    }
}
