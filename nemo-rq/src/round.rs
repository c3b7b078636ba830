//! The request round engine (§4.G): grouped or dispersed sends across
//! `round_count` iterations, with target-list reload on hangup or refresh
//! timeout.

use nemo_core::channel::Channel;
use nemo_core::clock::{mono_now, real_now};
use nemo_core::config::{RequesterConfig, ReportMode};
use nemo_core::packet_io::{receive_packet, send_packet};
use nemo_core::payload::{Payload, MSG_TYPE_REQUEST, MSG_TYPE_RESPONSE};
use nemo_core::report::{ReportSink, RequesterRow};
use nemo_core::target::{load_targets, EnabledFamily, Target};
use nemo_core::wait::{fatal_if_exit_on_error, wait_for_events, Fatal, WaitEvent};
use std::net::SocketAddr;
use std::time::{Duration, Instant};

pub struct Round<'a> {
    pub channel: &'a mut Channel,
    pub config: &'a RequesterConfig,
    pub sink: &'a mut dyn ReportSink,
    pub start: Instant,
}

impl<'a> Round<'a> {
    /// Runs every configured round, re-resolving the target list on
    /// hangup or when `refresh` has elapsed, then returns `Ok(())` on a
    /// clean finish or `Err(Fatal)` the moment `SIGINT`/`SIGTERM` lands.
    pub fn run(&mut self) -> Result<(), Fatal> {
        let family = if self.config.ipv6 { EnabledFamily::V6 } else { EnabledFamily::V4 };
        let mut targets = load_targets(&self.config.targets, family, self.config.max_targets);
        let mut last_resolved = Instant::now();
        let mut reload_requested = false;

        for seq_num in 0..self.config.round_count {
            if reload_requested || last_resolved.elapsed() >= self.config.refresh {
                tracing::info!("reloading target list");
                targets = load_targets(&self.config.targets, family, self.config.max_targets);
                last_resolved = Instant::now();
                reload_requested = false;
            }

            if self.config.grouped {
                self.dispatch_round(&targets, seq_num)?;
                self.wait(self.config.interval, &mut reload_requested)?;
            } else {
                let slice = dispersed_slice(self.config.interval, targets.len());
                for target in &targets {
                    self.send_one(target, seq_num)?;
                    self.wait(slice, &mut reload_requested)?;
                }
            }
        }

        self.wait(self.config.final_wait, &mut reload_requested)
    }

    fn dispatch_round(&mut self, targets: &[Target], seq_num: u64) -> Result<(), Fatal> {
        for target in targets {
            self.send_one(target, seq_num)?;
        }
        Ok(())
    }

    fn send_one(&mut self, target: &Target, seq_num: u64) -> Result<(), Fatal> {
        let payload = Payload {
            magic: nemo_core::payload::MAGIC,
            format_version: nemo_core::payload::FORMAT_VERSION,
            msg_type: MSG_TYPE_REQUEST,
            udp_port: self.channel.local_port(),
            ttl_req_dep: self.config.ttl,
            ttl_req_arr: 0,
            ttl_res_dep: 0,
            ip_version: target.ip_version,
            payload_length: self.config.payload_length,
            seq_num,
            seq_len: self.config.round_count,
            addr_low: target.addr_low,
            addr_high: target.addr_high,
            key: self.config.key,
            mono_req: mono_now(self.start),
            real_req: real_now(),
            mono_res: 0,
            real_res: 0,
        };

        let extra = vec![0u8; (self.config.payload_length as usize).saturating_sub(nemo_core::payload::BASE_SIZE)];
        let dest = SocketAddr::new(target.to_ip(), self.config.port);

        if let Err(e) = send_packet(self.channel, &payload, &extra, dest, self.config.exit_on_error) {
            if self.config.exit_on_error {
                tracing::error!(target = %dest, "send failed with exit-on-error set, exiting");
                return Err(Fatal::Datagram(e));
            }
        }

        Ok(())
    }

    fn wait(&mut self, dur: Duration, reload_requested: &mut bool) -> Result<(), Fatal> {
        let fd = self.channel.raw_fd();
        let channel = &mut *self.channel;
        let config = self.config;
        let sink = &mut *self.sink;
        let start = self.start;

        wait_for_events(fd, dur, |event| match event {
            WaitEvent::Readable => on_readable(&mut *channel, config, &mut *sink, start),
            WaitEvent::Signal(snapshot) => {
                if snapshot.usr1_requested {
                    dump_info(channel, config);
                }
                if snapshot.hup_requested {
                    *reload_requested = true;
                }
                Ok(())
            }
        })
    }
}

/// `SIGUSR1` introspection dump (§4.E): current config, channel counters,
/// and bound port, logged and otherwise non-disruptive to the loop.
fn dump_info(channel: &Channel, config: &RequesterConfig) {
    tracing::info!(
        port = channel.local_port(),
        counters = ?channel.counters,
        targets = config.targets.len(),
        interval = ?config.interval,
        key = config.key,
        "info dump (SIGUSR1)"
    );
}

fn on_readable(channel: &mut Channel, config: &RequesterConfig, sink: &mut dyn ReportSink, start: Instant) -> Result<(), Fatal> {
    let received = match receive_packet(channel, config.exit_on_error, MSG_TYPE_RESPONSE) {
        Ok(received) => received,
        Err(e) => return fatal_if_exit_on_error(config.exit_on_error, e),
    };

    // Monologue mode still drains the socket (so buffers don't back up)
    // but never captures or reports a reply.
    if config.monologue {
        return Ok(());
    }
    if config.key != 0 && received.base.key != config.key {
        return Ok(());
    }

    if config.report_mode == ReportMode::Binary {
        if let Err(e) = sink.write_binary(&received.base) {
            tracing::warn!(error = %e, "failed to write binary report record");
        }
        return Ok(());
    }

    let row = RequesterRow {
        key: received.base.key,
        seq_num: received.base.seq_num,
        seq_len: received.base.seq_len,
        addr_res: received.from.ip(),
        ttl_dep_req: config.ttl,
        ttl_arr_res: received.hop_limit,
        ttl_dep_res: received.base.ttl_res_dep,
        ttl_arr_req: received.base.ttl_req_arr,
        real_dep_req: received.base.real_req,
        real_arr_res: real_now(),
        real_arr_req: received.base.real_res,
        mono_dep_req: received.base.mono_req,
        mono_arr_res: mono_now(start),
        mono_arr_req: received.base.mono_res,
    };

    if let Err(e) = sink.write_requester_row(&row) {
        tracing::warn!(error = %e, "failed to write requester report row");
    }
    Ok(())
}

/// `1 + interval / n` per target, so dispersed sends spread across the
/// whole interval rather than bursting at the start.
fn dispersed_slice(interval: Duration, target_count: usize) -> Duration {
    if target_count == 0 {
        return interval;
    }
    interval / target_count as u32 + Duration::from_nanos(1)
}
