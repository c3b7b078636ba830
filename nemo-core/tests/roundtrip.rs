//! End-to-end tests over real loopback UDP sockets, covering the
//! concrete scenarios a responder/requester pair is expected to satisfy.

use nemo_core::channel::Channel;
use nemo_core::clock::{mono_now, real_now};
use nemo_core::packet_io::{receive_packet, send_packet};
use nemo_core::payload::{Payload, BASE_SIZE, MSG_TYPE_REQUEST, MSG_TYPE_RESPONSE};
use nemo_core::target::{load_targets, EnabledFamily, DEFAULT_MAX_TARGETS};
use nemo_core::wait::{wait_for_events, Fatal, WaitEvent};
use std::net::SocketAddr;
use std::time::{Duration, Instant};

fn base_request(key: u64, length: u16, start: Instant) -> Payload {
    Payload {
        magic: nemo_core::payload::MAGIC,
        format_version: nemo_core::payload::FORMAT_VERSION,
        msg_type: MSG_TYPE_REQUEST,
        udp_port: 0,
        ttl_req_dep: 5,
        ttl_req_arr: 0,
        ttl_res_dep: 0,
        ip_version: 4,
        payload_length: length,
        seq_num: 0,
        seq_len: 1,
        addr_low: 0,
        addr_high: 0,
        key,
        mono_req: mono_now(start),
        real_req: real_now(),
        mono_res: 0,
        real_res: 0,
    }
}

/// A minimal, single-round responder reaction used by these tests: accept
/// one datagram, apply the responder's filter/mutate rules, and reply.
fn respond_once(responder: &mut Channel, key: u64, length_filter: u16, ttl: u8, wait: Duration) -> bool {
    let mut replied = false;
    let _ = wait_for_events(responder.raw_fd(), wait, |event| {
        if !matches!(event, WaitEvent::Readable) {
            return Ok(());
        }
        let Ok(received) = receive_packet(responder, true, MSG_TYPE_REQUEST) else { return Ok(()) };

        if key != 0 && received.base.key != key {
            return Ok(());
        }
        if length_filter != 0 && received.base.payload_length != length_filter {
            return Ok(());
        }

        let mut reply = received.base;
        reply.msg_type = MSG_TYPE_RESPONSE;
        reply.key = key;
        reply.mono_res = mono_now(Instant::now());
        reply.real_res = real_now();
        reply.ttl_req_arr = received.hop_limit;
        reply.ttl_res_dep = ttl;

        let extra = vec![0u8; (reply.payload_length as usize).saturating_sub(BASE_SIZE)];
        let _ = send_packet(responder, &reply, &extra, received.from, true);
        replied = true;
        Ok(())
    });
    replied
}

#[test]
fn single_request_response_round_trip() {
    let start = Instant::now();
    let mut requester = Channel::open_v4(0, 65536, 65536, 5).unwrap();
    let mut responder = Channel::open_v4(0, 65536, 65536, 9).unwrap();
    let dest: SocketAddr = format!("127.0.0.1:{}", responder.local_port()).parse().unwrap();

    let request = base_request(7, BASE_SIZE as u16, start);
    send_packet(&mut requester, &request, &[], dest, true).unwrap();

    assert!(respond_once(&mut responder, 7, 0, 9, Duration::from_millis(500)));

    let mut response = None;
    let _ = wait_for_events(requester.raw_fd(), Duration::from_secs(2), |event| {
        if matches!(event, WaitEvent::Readable) {
            response = receive_packet(&mut requester, true, MSG_TYPE_RESPONSE).ok();
        }
        Ok(())
    });

    let response = response.expect("expected a response within the wait window");
    assert_eq!(response.base.msg_type, MSG_TYPE_RESPONSE);
    assert_eq!(response.base.seq_num, 0);
    assert_eq!(response.base.seq_len, 1);
    assert_eq!(response.base.ttl_req_dep, 5);
    assert_eq!(response.base.ttl_res_dep, 9);
}

#[test]
fn key_mismatch_produces_no_reply() {
    let start = Instant::now();
    let mut requester = Channel::open_v4(0, 65536, 65536, 5).unwrap();
    let mut responder = Channel::open_v4(0, 65536, 65536, 9).unwrap();
    let dest: SocketAddr = format!("127.0.0.1:{}", responder.local_port()).parse().unwrap();

    let request = base_request(7, BASE_SIZE as u16, start);
    send_packet(&mut requester, &request, &[], dest, true).unwrap();

    // Responder is configured for key 8, request carries key 7: dropped.
    assert!(!respond_once(&mut responder, 8, 0, 9, Duration::from_millis(200)));

    let mut got_anything = false;
    let _ = wait_for_events(requester.raw_fd(), Duration::from_millis(300), |event| {
        if matches!(event, WaitEvent::Readable) {
            got_anything = true;
        }
        Ok(())
    });
    assert!(!got_anything);
}

#[test]
fn extended_length_payload_is_accepted_and_echoed() {
    let start = Instant::now();
    let mut requester = Channel::open_v4(0, 65536, 65536, 5).unwrap();
    let mut responder = Channel::open_v4(0, 65536, 65536, 9).unwrap();
    let dest: SocketAddr = format!("127.0.0.1:{}", responder.local_port()).parse().unwrap();

    let request = base_request(1, 1000, start);
    let extra = vec![0xCDu8; 1000 - BASE_SIZE];
    send_packet(&mut requester, &request, &extra, dest, true).unwrap();

    assert!(respond_once(&mut responder, 1, 0, 9, Duration::from_millis(500)));

    let mut response = None;
    let _ = wait_for_events(requester.raw_fd(), Duration::from_secs(1), |event| {
        if matches!(event, WaitEvent::Readable) {
            response = receive_packet(&mut requester, true, MSG_TYPE_RESPONSE).ok();
        }
        Ok(())
    });

    let response = response.expect("expected a response");
    assert_eq!(response.base.payload_length, 1000);
    assert_eq!(response.received_len, 1000);
}

#[test]
fn hop_limit_ancillary_message_is_captured_on_loopback() {
    let start = Instant::now();
    let mut requester = Channel::open_v4(0, 65536, 65536, 5).unwrap();
    let mut responder = Channel::open_v4(0, 65536, 65536, 9).unwrap();
    let dest: SocketAddr = format!("127.0.0.1:{}", responder.local_port()).parse().unwrap();

    send_packet(&mut requester, &base_request(1, BASE_SIZE as u16, start), &[], dest, true).unwrap();

    let mut hop_limit = None;
    let _ = wait_for_events(responder.raw_fd(), Duration::from_millis(500), |event| {
        if matches!(event, WaitEvent::Readable) {
            hop_limit = receive_packet(&mut responder, true, MSG_TYPE_REQUEST).ok().map(|r| r.hop_limit);
        }
        Ok(())
    });

    assert!(hop_limit.is_some());
}

#[test]
fn duplicate_targets_dedup_to_the_distinct_set() {
    let names = vec![
        "10.0.0.1".to_string(),
        "10.0.0.2".to_string(),
        "10.0.0.1".to_string(),
    ];
    let targets = load_targets(&names, EnabledFamily::V4, DEFAULT_MAX_TARGETS);
    assert_eq!(targets.len(), 2);
}

#[test]
fn fatal_enum_distinguishes_interrupt_from_terminate() {
    assert_ne!(Fatal::Interrupt, Fatal::Terminate);
}
