//! The bounded, signal-aware wait primitive every event loop iteration goes
//! through (§4.H). The only suspension point in either process.

use crate::clock::duration_to_timespec;
use crate::error::DatagramError;
use crate::signals::{wait_mask, SignalLatch};
use nix::sys::select::{pselect, FdSet};
use std::os::fd::RawFd;
use std::time::{Duration, Instant};

/// A fatal condition surfaced out of the wait loop: `SIGINT`/`SIGTERM`, or a
/// per-datagram error the caller has opted (`-e`/`exit_on_error`) to treat
/// as fatal rather than log-and-continue (§7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fatal {
    Interrupt,
    Terminate,
    Datagram(DatagramError),
}

/// Maps a per-datagram error to the wait loop's fatal channel when the
/// caller runs with `-e`/`exit_on_error`, or swallows it (it has already
/// been counted and logged by `packet_io`) otherwise.
pub fn fatal_if_exit_on_error(exit_on_error: bool, err: DatagramError) -> Result<(), Fatal> {
    if exit_on_error {
        Err(Fatal::Datagram(err))
    } else {
        Ok(())
    }
}

/// What happened during one iteration of [`wait_for_events`], passed to the
/// single event callback. Folded into one enum (rather than two separate
/// closures) since callers that need `&mut` access to the same state from
/// both cases — the responder's plugin table, notified on `Readable` and
/// reaped on `Signal` — can't otherwise give two closures overlapping
/// captures.
pub enum WaitEvent {
    /// The channel's socket is readable; the caller should drain it.
    Readable,
    /// A non-fatal signal fired. The caller consults the snapshot to
    /// decide what to do about it (SIGHUP reload, SIGCHLD reap, ...).
    Signal(crate::signals::LatchSnapshot),
}

/// Waits up to `dur` for `fd` to become readable, invoking `on_event` once
/// per readable event or cooperative (non-fatal) signal latch observed.
/// Returns `Ok(())` once `dur` has elapsed, or `Err(Fatal)` the moment a
/// fatal signal is observed partway through, or the moment `on_event`
/// itself returns one (e.g. a per-datagram error under `-e`).
///
/// Takes the raw fd rather than borrowing a [`crate::channel::Channel`]
/// directly so `on_event` stays free to take its own `&mut Channel` to
/// actually drain the socket; the only thing this loop itself needs from
/// the channel is the integer it polls.
///
/// The loop re-samples a monotonic clock every iteration, so it always
/// makes non-negative progress toward the deadline regardless of how many
/// times `pselect` returns early with nothing to do.
pub fn wait_for_events<F>(fd: RawFd, dur: Duration, mut on_event: F) -> Result<(), Fatal>
where
    F: FnMut(WaitEvent) -> Result<(), Fatal>,
{
    let start = Instant::now();
    let goal = start + dur;

    loop {
        let now = Instant::now();
        if now >= goal {
            return Ok(());
        }
        let todo = goal - now;

        let mut read_fds = FdSet::new();
        read_fds.insert(unsafe { std::os::fd::BorrowedFd::borrow_raw(fd) });

        let mask = wait_mask();
        let timeout = duration_to_timespec(todo);

        let ready = pselect(
            fd + 1,
            Some(&mut read_fds),
            None,
            None,
            Some(&timeout),
            Some(&mask),
        );

        match ready {
            Ok(n) if n > 0 && read_fds.contains(unsafe { std::os::fd::BorrowedFd::borrow_raw(fd) }) => {
                on_event(WaitEvent::Readable)?;
            }
            Ok(_) => {
                // Timed out with no readable fd; loop and re-check the deadline.
            }
            Err(nix::errno::Errno::EINTR) => {
                let snapshot = SignalLatch.take();
                if snapshot.int_requested {
                    return Err(Fatal::Interrupt);
                }
                if snapshot.term_requested {
                    return Err(Fatal::Terminate);
                }
                on_event(WaitEvent::Signal(snapshot))?;
            }
            Err(e) => {
                tracing::warn!(error = %e, "pselect failed unexpectedly");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::Channel;

    #[test]
    fn times_out_without_calling_on_readable_when_nothing_arrives() {
        let channel = Channel::open_v4(0, 4096, 4096, 64).unwrap();
        let mut called = false;
        let result = wait_for_events(channel.raw_fd(), Duration::from_millis(30), |event| {
            if matches!(event, WaitEvent::Readable) {
                called = true;
            }
            Ok(())
        });
        assert!(result.is_ok());
        assert!(!called);
    }

    #[test]
    fn invokes_on_readable_when_a_datagram_arrives() {
        let channel = Channel::open_v4(0, 4096, 4096, 64).unwrap();
        let port = channel.local_port();

        let sender = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
        sender.send_to(&[0u8; 10], format!("127.0.0.1:{port}")).unwrap();

        let mut called = false;
        let result = wait_for_events(channel.raw_fd(), Duration::from_millis(500), |event| {
            if matches!(event, WaitEvent::Readable) {
                called = true;
            }
            Ok(())
        });
        assert!(result.is_ok());
        assert!(called);
    }

    #[test]
    fn on_event_fatal_result_propagates_immediately() {
        let channel = Channel::open_v4(0, 4096, 4096, 64).unwrap();
        let port = channel.local_port();

        let sender = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
        sender.send_to(&[0u8; 10], format!("127.0.0.1:{port}")).unwrap();

        let result = wait_for_events(channel.raw_fd(), Duration::from_millis(500), |event| {
            if matches!(event, WaitEvent::Readable) {
                return Err(Fatal::Datagram(DatagramError::Size));
            }
            Ok(())
        });
        assert_eq!(result, Err(Fatal::Datagram(DatagramError::Size)));
    }
}
