//! Signal handling: async-signal-safe latches plus the blocked-mask /
//! wait-mask pair that makes [`crate::wait::wait_for_events`]'s `pselect`
//! call the only place signals are actually delivered.

use nix::sys::signal::{
    sigaction, sigprocmask, SaFlags, SigAction, SigHandler, SigSet, SigmaskHow, Signal,
};
use std::sync::atomic::{AtomicBool, Ordering};

/// Handle onto the process-wide signal flags, one per handled signal. Each
/// is set only by its handler (async-signal-safe: a single `AtomicBool`
/// store) and cleared only by the owning event loop after acting on it.
///
/// The flags themselves live in file-scope statics, not struct fields: a
/// signal handler can only ever reach process-wide state, so `SignalLatch`
/// is a zero-sized handle onto that state rather than an owner of it.
#[derive(Default, Clone, Copy)]
pub struct SignalLatch;

static INT_REQUESTED: AtomicBool = AtomicBool::new(false);
static TERM_REQUESTED: AtomicBool = AtomicBool::new(false);
static USR1_REQUESTED: AtomicBool = AtomicBool::new(false);
static HUP_REQUESTED: AtomicBool = AtomicBool::new(false);
static CHILD_EXITED: AtomicBool = AtomicBool::new(false);

extern "C" fn handle_int(_: i32) {
    INT_REQUESTED.store(true, Ordering::SeqCst);
}
extern "C" fn handle_term(_: i32) {
    TERM_REQUESTED.store(true, Ordering::SeqCst);
}
extern "C" fn handle_usr1(_: i32) {
    USR1_REQUESTED.store(true, Ordering::SeqCst);
}
extern "C" fn handle_hup(_: i32) {
    HUP_REQUESTED.store(true, Ordering::SeqCst);
}
extern "C" fn handle_chld(_: i32) {
    CHILD_EXITED.store(true, Ordering::SeqCst);
}

/// Signals this process ever installs a handler for.
const HANDLED: [Signal; 5] = [
    Signal::SIGINT,
    Signal::SIGTERM,
    Signal::SIGUSR1,
    Signal::SIGHUP,
    Signal::SIGCHLD,
];

impl SignalLatch {
    /// Installs handlers for `SIGINT`, `SIGTERM`, `SIGUSR1`, `SIGHUP`, and
    /// `SIGCHLD`, then blocks every signal except `SIGKILL`/`SIGSTOP` (which
    /// cannot be blocked) in the process mask. After this call, the five
    /// handled signals are only ever delivered during
    /// [`crate::wait::wait_for_events`]'s `pselect`.
    pub fn install() -> nix::Result<()> {
        let action = SigAction::new(SigHandler::Handler(handle_int), SaFlags::empty(), SigSet::empty());
        unsafe { sigaction(Signal::SIGINT, &action)? };

        let action = SigAction::new(SigHandler::Handler(handle_term), SaFlags::empty(), SigSet::empty());
        unsafe { sigaction(Signal::SIGTERM, &action)? };

        let action = SigAction::new(SigHandler::Handler(handle_usr1), SaFlags::empty(), SigSet::empty());
        unsafe { sigaction(Signal::SIGUSR1, &action)? };

        let action = SigAction::new(SigHandler::Handler(handle_hup), SaFlags::empty(), SigSet::empty());
        unsafe { sigaction(Signal::SIGHUP, &action)? };

        let action = SigAction::new(SigHandler::Handler(handle_chld), SaFlags::empty(), SigSet::empty());
        unsafe { sigaction(Signal::SIGCHLD, &action)? };

        sigprocmask(SigmaskHow::SIG_SETMASK, Some(&blocked_mask()), None)?;

        Ok(())
    }

    /// Snapshots and clears every flag, returning the ones that had fired.
    /// Callers act on the returned snapshot, never on the live atomics,
    /// so a signal arriving mid-dispatch is simply picked up next time.
    pub fn take(&self) -> LatchSnapshot {
        LatchSnapshot {
            int_requested: INT_REQUESTED.swap(false, Ordering::SeqCst),
            term_requested: TERM_REQUESTED.swap(false, Ordering::SeqCst),
            usr1_requested: USR1_REQUESTED.swap(false, Ordering::SeqCst),
            hup_requested: HUP_REQUESTED.swap(false, Ordering::SeqCst),
            child_exited: CHILD_EXITED.swap(false, Ordering::SeqCst),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct LatchSnapshot {
    pub int_requested: bool,
    pub term_requested: bool,
    pub usr1_requested: bool,
    pub hup_requested: bool,
    pub child_exited: bool,
}

impl LatchSnapshot {
    pub fn is_fatal(&self) -> bool {
        self.int_requested || self.term_requested
    }
}

/// All signals blocked during normal execution, except the two that cannot
/// be blocked.
fn blocked_mask() -> SigSet {
    let mut set = SigSet::all();
    set.remove(Signal::SIGKILL);
    set.remove(Signal::SIGSTOP);
    set
}

/// The mask `pselect` should install for the duration of its wait: every
/// signal blocked *except* the five this process handles, so exactly those
/// five can interrupt the call.
pub fn wait_mask() -> SigSet {
    let mut set = blocked_mask();
    for sig in HANDLED {
        set.remove(sig);
    }
    set
}
