//! `send_packet`/`receive_packet`: the only two functions that touch a
//! [`Channel`]'s socket, responsible for encoding/decoding, counter
//! bookkeeping, and ancillary hop-limit extraction.

use crate::channel::Channel;
use crate::error::DatagramError;
use crate::payload::{Payload, BASE_SIZE};
use nix::sys::socket::{
    recvmsg, sendto, ControlMessageOwned, MsgFlags, SockaddrIn, SockaddrIn6, SockaddrStorage,
};
use std::io::IoSliceMut;
use std::net::SocketAddr;

/// Maximum datagram this crate will ever build or accept; matches the `-l`
/// flag's upper bound (64436) rounded up to a round staging-buffer size.
pub const MAX_DATAGRAM: usize = 65536;

/// A successfully validated, received datagram.
pub struct Received {
    pub base: Payload,
    pub from: SocketAddr,
    /// `0` when the kernel did not supply a hop-limit ancillary message
    /// (renders as `"N/A"` downstream).
    pub hop_limit: u8,
    pub received_len: usize,
}

/// Encodes `base` (plus `extra` trailing bytes, if any — `base.payload_length
/// - BASE_SIZE` of them are expected) and sends it to `destination` in one
/// non-blocking `sendto`. Bumps `sent_total`/`sent_network_error`
/// accordingly. `raise_on_error` only controls the log level a caller
/// should use; this function always returns the same `Result` shape either
/// way.
pub fn send_packet(
    channel: &mut Channel,
    base: &Payload,
    extra: &[u8],
    destination: SocketAddr,
    raise_on_error: bool,
) -> Result<(), DatagramError> {
    let mut buf = Vec::with_capacity(base.payload_length as usize);
    buf.extend_from_slice(&base.encode());
    buf.extend_from_slice(extra);
    buf.truncate(base.payload_length as usize);

    channel.counters.sent_total += 1;

    let fd = channel.raw_fd();
    let result = match destination {
        SocketAddr::V4(v4) => sendto(fd, &buf, &SockaddrIn::from(v4), MsgFlags::empty()),
        SocketAddr::V6(v6) => sendto(fd, &buf, &SockaddrIn6::from(v6), MsgFlags::empty()),
    };

    match result {
        Ok(sent) if sent == buf.len() => Ok(()),
        Ok(_) => {
            channel.counters.sent_network_error += 1;
            log_send_failure(raise_on_error, "short send");
            Err(DatagramError::Network)
        }
        Err(e) => {
            channel.counters.sent_network_error += 1;
            log_send_failure(raise_on_error, &e.to_string());
            Err(DatagramError::Network)
        }
    }
}

fn log_send_failure(raise_on_error: bool, detail: &str) {
    if raise_on_error {
        tracing::error!(detail, "send_packet failed");
    } else {
        tracing::debug!(detail, "send_packet failed");
    }
}

/// Receives one datagram, validates it against `expected_type`, and
/// extracts the ancillary hop limit. Every rejection (`< 88` bytes,
/// truncated, bad magic/version/type) bumps the matching counter and
/// returns the matching [`DatagramError`]; nothing is fatal here — it is
/// up to the caller to decide, via `raise_on_error`, whether to treat the
/// error as fatal (§7).
pub fn receive_packet(
    channel: &mut Channel,
    raise_on_error: bool,
    expected_type: u8,
) -> Result<Received, DatagramError> {
    channel.counters.received_total += 1;

    let fd = channel.raw_fd();
    let mut buf = [0u8; MAX_DATAGRAM];
    let mut iov = [IoSliceMut::new(&mut buf)];
    let mut cmsg_buf = nix::cmsg_space!(libc::c_int);

    let msg = match recvmsg::<SockaddrStorage>(
        fd,
        &mut iov,
        Some(&mut cmsg_buf),
        MsgFlags::MSG_TRUNC,
    ) {
        Ok(msg) => msg,
        Err(e) => {
            channel.counters.received_network_error += 1;
            log_recv_failure(raise_on_error, &e.to_string());
            return Err(DatagramError::Network);
        }
    };

    let received_len = msg.bytes;
    let truncated = msg.flags.contains(MsgFlags::MSG_TRUNC);

    if received_len < BASE_SIZE || truncated {
        channel.counters.received_size_mismatch += 1;
        log_recv_failure(raise_on_error, "short or truncated datagram");
        return Err(DatagramError::Size);
    }

    let base_bytes: [u8; BASE_SIZE] = buf[..BASE_SIZE].try_into().unwrap();
    let base = Payload::decode(&base_bytes);

    if base.payload_length as usize != received_len {
        channel.counters.received_size_mismatch += 1;
        log_recv_failure(raise_on_error, "payload_length disagrees with received length");
        return Err(DatagramError::Size);
    }

    if base.magic != crate::payload::MAGIC {
        channel.counters.received_magic_mismatch += 1;
        return Err(DatagramError::Magic);
    }
    if base.format_version != crate::payload::FORMAT_VERSION {
        channel.counters.received_version_mismatch += 1;
        return Err(DatagramError::Version);
    }
    if base.msg_type != expected_type {
        channel.counters.received_type_mismatch += 1;
        log_recv_failure(raise_on_error, "unexpected message type");
        return Err(DatagramError::Type);
    }

    let hop_limit = msg
        .cmsgs()
        .map(extract_hop_limit)
        .unwrap_or(0);

    let from = msg
        .address
        .and_then(sockaddr_storage_to_std)
        .unwrap_or_else(|| SocketAddr::from(([0, 0, 0, 0], 0)));

    Ok(Received {
        base,
        from,
        hop_limit,
        received_len,
    })
}

fn sockaddr_storage_to_std(addr: SockaddrStorage) -> Option<SocketAddr> {
    if let Some(v4) = addr.as_sockaddr_in() {
        return Some(SocketAddr::from((v4.ip(), v4.port())));
    }
    if let Some(v6) = addr.as_sockaddr_in6() {
        return Some(SocketAddr::from((v6.ip(), v6.port())));
    }
    None
}

fn log_recv_failure(raise_on_error: bool, detail: &str) {
    if raise_on_error {
        tracing::error!(detail, "receive_packet failed");
    } else {
        tracing::debug!(detail, "receive_packet failed");
    }
}

/// Walks the ancillary messages for either the IPv4- or IPv6-specific
/// hop-limit control message. Linux reports the former as `Ipv4Ttl` and the
/// latter as `Ipv6HopLimit`; both are matched since a single [`Channel`]
/// only ever carries one family but callers share this code path.
fn extract_hop_limit(cmsgs: impl Iterator<Item = ControlMessageOwned>) -> u8 {
    for cmsg in cmsgs {
        match cmsg {
            ControlMessageOwned::Ipv4Ttl(ttl) => return ttl.clamp(0, 255) as u8,
            ControlMessageOwned::Ipv6HopLimit(hops) => return hops.clamp(0, 255) as u8,
            _ => continue,
        }
    }
    0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payload::{FORMAT_VERSION, MAGIC, MSG_TYPE_REQUEST};

    fn sample_payload(len: u16) -> Payload {
        Payload {
            magic: MAGIC,
            format_version: FORMAT_VERSION,
            msg_type: MSG_TYPE_REQUEST,
            udp_port: 23000,
            ttl_req_dep: 64,
            ttl_req_arr: 0,
            ttl_res_dep: 0,
            ip_version: 4,
            payload_length: len,
            seq_num: 0,
            seq_len: 1,
            addr_low: 0,
            addr_high: 0,
            key: 1,
            mono_req: 0,
            real_req: 0,
            mono_res: 0,
            real_res: 0,
        }
    }

    #[test]
    fn send_then_receive_round_trips_over_loopback() {
        let mut sender = Channel::open_v4(0, 65536, 65536, 64).unwrap();
        let mut receiver = Channel::open_v4(0, 65536, 65536, 64).unwrap();
        let dest: SocketAddr = format!("127.0.0.1:{}", receiver.local_port()).parse().unwrap();

        let payload = sample_payload(BASE_SIZE as u16);
        send_packet(&mut sender, &payload, &[], dest, true).unwrap();

        std::thread::sleep(std::time::Duration::from_millis(20));

        let received = receive_packet(&mut receiver, true, MSG_TYPE_REQUEST).unwrap();
        assert_eq!(received.base, payload);
        assert_eq!(received.received_len, BASE_SIZE);
    }

    #[test]
    fn extended_length_payload_round_trips_with_trailing_bytes() {
        let mut sender = Channel::open_v4(0, 65536, 65536, 64).unwrap();
        let mut receiver = Channel::open_v4(0, 65536, 65536, 64).unwrap();
        let dest: SocketAddr = format!("127.0.0.1:{}", receiver.local_port()).parse().unwrap();

        let payload = sample_payload(1000);
        let extra = vec![0xABu8; 1000 - BASE_SIZE];
        send_packet(&mut sender, &payload, &extra, dest, true).unwrap();

        std::thread::sleep(std::time::Duration::from_millis(20));

        let received = receive_packet(&mut receiver, true, MSG_TYPE_REQUEST).unwrap();
        assert_eq!(received.base, payload);
        assert_eq!(received.received_len, 1000);
    }

    #[test]
    fn rejects_datagram_shorter_than_base_size() {
        let mut sender = Channel::open_v4(0, 65536, 65536, 64).unwrap();
        let mut receiver = Channel::open_v4(0, 65536, 65536, 64).unwrap();
        let dest: SocketAddr = format!("127.0.0.1:{}", receiver.local_port()).parse().unwrap();

        let short = [0u8; 10];
        let fd = sender.raw_fd();
        let addr: SockaddrIn = match dest {
            SocketAddr::V4(v4) => SockaddrIn::from(v4),
            _ => unreachable!(),
        };
        sendto(fd, &short, &addr, MsgFlags::empty()).unwrap();

        std::thread::sleep(std::time::Duration::from_millis(20));

        let err = receive_packet(&mut receiver, true, MSG_TYPE_REQUEST).unwrap_err();
        assert_eq!(err, DatagramError::Size);
        assert_eq!(receiver.counters.received_size_mismatch, 1);
    }

    #[test]
    fn rejects_and_counts_unexpected_message_type() {
        let mut sender = Channel::open_v4(0, 65536, 65536, 64).unwrap();
        let mut receiver = Channel::open_v4(0, 65536, 65536, 64).unwrap();
        let dest: SocketAddr = format!("127.0.0.1:{}", receiver.local_port()).parse().unwrap();

        let payload = sample_payload(BASE_SIZE as u16);
        send_packet(&mut sender, &payload, &[], dest, true).unwrap();

        std::thread::sleep(std::time::Duration::from_millis(20));

        let err = receive_packet(&mut receiver, true, crate::payload::MSG_TYPE_RESPONSE).unwrap_err();
        assert_eq!(err, DatagramError::Type);
        assert_eq!(receiver.counters.received_type_mismatch, 1);
    }
}
