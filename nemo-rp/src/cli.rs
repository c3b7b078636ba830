//! The responder's command-line surface (§6).

use clap::Parser;
use nemo_core::config::{parse_duration, parse_size, ReportMode, ResponderConfig, DEFAULT_TTL};
use std::time::Duration;

/// Listens for `nemo` request probes and echoes a timestamped, TTL-stamped
/// reply for each one.
#[derive(Debug, Parser)]
#[command(name = "nemo-rp", version, about)]
pub struct Cli {
    /// IPv6-only (default is IPv4).
    #[arg(short = '6', long = "ipv6")]
    pub ipv6: bool,

    /// Attach a plugin shared object (repeatable, up to 32).
    #[arg(short = 'a', long = "plugin")]
    pub plugins: Vec<String>,

    /// Binary report mode: no header, raw 88-byte records.
    #[arg(short = 'b', long = "binary")]
    pub binary: bool,

    /// Exit if no datagram is received within this duration.
    #[arg(short = 'd', long = "duration", value_parser = parse_duration)]
    pub inactivity_timeout: Option<Duration>,

    /// Exit on the first network error.
    #[arg(short = 'e', long = "exit-on-error")]
    pub exit_on_error: bool,

    /// Identity/filter key (0 disables filtering).
    #[arg(short = 'k', long = "key", default_value_t = 0)]
    pub key: u64,

    /// Expected payload length; 0 disables the length filter.
    #[arg(short = 'l', long = "length", default_value_t = 0)]
    pub length: u16,

    /// Monologue mode: receive and report, but never reply.
    #[arg(short = 'm', long = "monologue")]
    pub monologue: bool,

    /// Disable log coloring.
    #[arg(short = 'n', long = "no-color")]
    pub no_color: bool,

    /// UDP port to listen on.
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

    /// Bump log verbosity; repeatable.
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    pub verbose: u8,
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

    pub fn into_config(self) -> ResponderConfig {
        let report_mode = self.report_mode();
        ResponderConfig {
            ipv6: self.ipv6,
            plugins: self.plugins,
            report_mode,
            exit_on_error: self.exit_on_error,
            key: self.key,
            payload_length: self.length,
            monologue: self.monologue,
            port: self.port,
            recv_buf: self.recv_buf,
            send_buf: self.send_buf,
            ttl: self.ttl,
            inactivity_timeout: self.inactivity_timeout,
        }
    }
}
