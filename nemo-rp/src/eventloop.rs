//! The responder event loop (§4.I): receive, filter, mutate, report,
//! fan-out to plugins, reply — plus the inactivity-timeout shutdown path
//! and SIGCHLD-driven plugin reaping.

use nemo_core::channel::Channel;
use nemo_core::clock::{mono_now, real_now};
use nemo_core::config::{ReportMode, ResponderConfig};
use nemo_core::packet_io::{receive_packet, send_packet};
use nemo_core::payload::{MSG_TYPE_REQUEST, MSG_TYPE_RESPONSE};
use nemo_core::plugin::Plugin;
use nemo_core::report::{ReportSink, ResponderRow};
use nemo_core::wait::{fatal_if_exit_on_error, wait_for_events, Fatal, WaitEvent};
use std::time::{Duration, Instant};

/// One polling slice used while waiting for the next datagram, so the
/// loop still gets to check the inactivity deadline and reap exited
/// plugins even when nothing has arrived recently.
const POLL_SLICE: Duration = Duration::from_secs(1);

pub struct Responder<'a> {
    pub channel: &'a mut Channel,
    pub config: &'a ResponderConfig,
    pub sink: &'a mut dyn ReportSink,
    pub plugins: &'a mut Vec<Plugin>,
    pub start: Instant,
}

impl<'a> Responder<'a> {
    pub fn run(&mut self) -> Result<(), Fatal> {
        let mut last_activity = Instant::now();

        loop {
            let fd = self.channel.raw_fd();
            let channel = &mut *self.channel;
            let config = self.config;
            let sink = &mut *self.sink;
            let plugins = &mut *self.plugins;
            let start = self.start;
            let mut saw_activity = false;

            wait_for_events(fd, POLL_SLICE, |event| match event {
                WaitEvent::Readable => {
                    let result = on_readable(&mut *channel, config, &mut *sink, &mut *plugins, start);
                    saw_activity = true;
                    result
                }
                WaitEvent::Signal(snapshot) => {
                    if snapshot.child_exited {
                        for plugin in plugins.iter_mut() {
                            plugin.reap();
                        }
                    }
                    if snapshot.usr1_requested {
                        dump_info(channel, config, plugins);
                    }
                    Ok(())
                }
            })?;

            if saw_activity {
                last_activity = Instant::now();
            } else if let Some(timeout) = self.config.inactivity_timeout {
                if last_activity.elapsed() >= timeout {
                    tracing::warn!(?timeout, "no traffic received within inactivity timeout, exiting");
                    return Ok(());
                }
            }
        }
    }
}

/// `SIGUSR1` introspection dump (§4.E): current config, channel counters,
/// bound port, and plugin count/states, logged and otherwise non-disruptive
/// to the loop.
fn dump_info(channel: &Channel, config: &ResponderConfig, plugins: &[Plugin]) {
    tracing::info!(
        port = channel.local_port(),
        counters = ?channel.counters,
        key = config.key,
        plugins = plugins.len(),
        "info dump (SIGUSR1)"
    );
}

fn on_readable(
    channel: &mut Channel,
    config: &ResponderConfig,
    sink: &mut dyn ReportSink,
    plugins: &mut [Plugin],
    start: Instant,
) -> Result<(), Fatal> {
    let received = match receive_packet(channel, config.exit_on_error, MSG_TYPE_REQUEST) {
        Ok(received) => received,
        Err(e) => return fatal_if_exit_on_error(config.exit_on_error, e),
    };

    if config.key != 0 && received.base.key != config.key {
        return Ok(());
    }
    if config.payload_length != 0 && received.base.payload_length != config.payload_length {
        return Ok(());
    }

    let mut reply = received.base;
    reply.msg_type = MSG_TYPE_RESPONSE;
    reply.key = config.key;
    reply.mono_res = mono_now(start);
    reply.real_res = real_now();
    reply.ttl_req_arr = received.hop_limit;
    reply.ttl_res_dep = config.ttl;

    match config.report_mode {
        ReportMode::Quiet => {}
        ReportMode::Binary => {
            if let Err(e) = sink.write_binary(&reply) {
                tracing::warn!(error = %e, "failed to write binary report record");
            }
        }
        ReportMode::Csv => {
            let row = ResponderRow {
                key: reply.key,
                seq_num: reply.seq_num,
                seq_len: reply.seq_len,
                addr_req: received.from.ip(),
                port_req: received.from.port(),
                ttl_dep_req: reply.ttl_req_dep,
                ttl_arr_res: reply.ttl_req_arr,
                real_dep_req: reply.real_req,
                real_arr_res: reply.real_res,
                mono_dep_req: reply.mono_req,
                mono_arr_res: reply.mono_res,
            };
            if let Err(e) = sink.write_responder_row(&row) {
                tracing::warn!(error = %e, "failed to write responder report row");
            }
        }
    }

    for plugin in plugins.iter_mut() {
        plugin.notify(&reply);
    }

    if !config.monologue {
        let dest = received.from;
        let extra_len = (reply.payload_length as usize).saturating_sub(nemo_core::payload::BASE_SIZE);
        if let Err(e) = send_packet(channel, &reply, &vec![0u8; extra_len], dest, config.exit_on_error) {
            return fatal_if_exit_on_error(config.exit_on_error, e);
        }
    }

    Ok(())
}
