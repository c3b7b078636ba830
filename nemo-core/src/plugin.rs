//! The plugin sandbox: one forked child process per plugin, connected to
//! the parent by a one-directional pipe, loading its code via `dlopen`
//! inside the child so a crashing or misbehaving plugin cannot corrupt the
//! responder's own address space (§4.J, §9).

use crate::error::{Error, PluginError};
use crate::payload::{Payload, BASE_SIZE};
use libloading::Library;
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::{fork, pipe, read, write, ForkResult, Pid};
use std::ffi::CStr;
use std::os::fd::{AsRawFd, OwnedFd, RawFd};
use std::os::raw::{c_char, c_int};

/// The four fixed entry points every plugin shared object must export.
type NameFn = unsafe extern "C" fn() -> *const c_char;
type InitFn = unsafe extern "C" fn() -> c_int;
type EventFn = unsafe extern "C" fn(u64, u64, u64, u64);
type FreeFn = unsafe extern "C" fn();

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PluginState {
    Prepared,
    Running,
    Paused,
    Stopped,
}

/// Parent-side handle to one sandboxed plugin.
pub struct Plugin {
    pub name: String,
    path: String,
    child_pid: Pid,
    write_fd: Option<OwnedFd>,
    pub state: PluginState,
}

impl Plugin {
    /// Forks a child for the plugin at `path`, labeling the returned handle
    /// with `name` (the caller typically gets this from [`probe_name`]). The
    /// child loads the shared object itself (see [`run_child`]); the parent
    /// only ever talks to it over the pipe.
    pub fn spawn(path: &str, name: String) -> Result<Self, Error> {
        let (read_end, write_end) = pipe().map_err(Error::from)?;

        // SAFETY: the child immediately closes one end and enters a
        // read-only loop before touching any shared parent state beyond
        // the raw fds passed to it; it never returns to the caller.
        match unsafe { fork() }.map_err(Error::from)? {
            ForkResult::Child => {
                drop(write_end);
                run_child(path, read_end);
                unreachable!("run_child always exits the process");
            }
            ForkResult::Parent { child } => {
                drop(read_end);
                set_nonblocking(write_end.as_raw_fd())?;

                Ok(Plugin {
                    name,
                    path: path.to_string(),
                    child_pid: child,
                    write_fd: Some(write_end),
                    state: PluginState::Running,
                })
            }
        }
    }

    /// Best-effort, non-blocking fan-out write of the full 88-byte base.
    /// Short or failed writes are logged and dropped; never fatal to the
    /// responder or to other plugins.
    pub fn notify(&mut self, payload: &Payload) {
        if self.state != PluginState::Running {
            return;
        }
        let Some(fd) = &self.write_fd else { return };

        let buf = payload.encode();
        match write(fd, &buf) {
            Ok(n) if n == BASE_SIZE => {}
            Ok(n) => {
                let err = PluginError::Io(self.name.clone());
                tracing::warn!(plugin = %self.name, wrote = n, want = BASE_SIZE, error = %err, "short write to plugin pipe");
            }
            Err(nix::errno::Errno::EAGAIN) => {
                tracing::warn!(plugin = %self.name, "plugin pipe would block, dropping payload");
            }
            Err(e) => {
                let err = PluginError::Io(self.name.clone());
                tracing::warn!(plugin = %self.name, source = %e, error = %err, "failed to write to plugin pipe");
            }
        }
    }

    /// Non-blocking reap: call after `SIGCHLD`, once per plugin. Updates
    /// `state` based on the wait status; never blocks.
    pub fn reap(&mut self) {
        match waitpid(self.child_pid, Some(WaitPidFlag::WNOHANG | WaitPidFlag::WUNTRACED | WaitPidFlag::WCONTINUED)) {
            Ok(WaitStatus::Exited(_, code)) => {
                let err = PluginError::Exited(self.name.clone());
                tracing::info!(plugin = %self.name, code, error = %err, "plugin child exited");
                self.state = PluginState::Stopped;
            }
            Ok(WaitStatus::Signaled(_, sig, _)) => {
                let err = PluginError::Exited(self.name.clone());
                tracing::warn!(plugin = %self.name, signal = %sig, error = %err, "plugin child killed by signal");
                self.state = PluginState::Stopped;
            }
            Ok(WaitStatus::Stopped(_, _)) => {
                self.state = PluginState::Paused;
            }
            Ok(WaitStatus::Continued(_)) => {
                self.state = PluginState::Running;
            }
            Ok(WaitStatus::StillAlive) => {}
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(plugin = %self.name, error = %e, "waitpid failed");
            }
        }
    }

    /// Closes the write end, which unblocks the child's read loop, then
    /// blocking-joins it. Failure to join one plugin never stops the
    /// others from being cleaned up.
    pub fn shutdown(mut self) {
        self.write_fd.take();

        match waitpid(self.child_pid, None) {
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(plugin = %self.name, error = %e, "failed to join plugin child at shutdown");
            }
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }
}

fn set_nonblocking(fd: RawFd) -> Result<(), Error> {
    use nix::fcntl::{fcntl, FcntlArg, OFlag};

    let flags = fcntl(fd, FcntlArg::F_GETFL).map_err(Error::from)?;
    let mut flags = OFlag::from_bits_truncate(flags);
    flags.insert(OFlag::O_NONBLOCK);
    fcntl(fd, FcntlArg::F_SETFL(flags)).map_err(Error::from)?;
    Ok(())
}

/// The child side of the sandbox: load the plugin, call `init`, then block
/// on 88-byte reads until the pipe closes or a short read occurs, calling
/// `event` for each whole payload. Always exits the process; never
/// returns.
fn run_child(path: &str, read_end: OwnedFd) -> ! {
    // SAFETY: `dlopen`-ing arbitrary plugin code is inherently unsafe; the
    // process-per-plugin sandbox (this function only ever runs in the
    // forked child) is what bounds the blast radius of a bad plugin.
    let lib = match unsafe { Library::new(path) } {
        Ok(lib) => lib,
        Err(e) => {
            tracing::error!(path, error = %e, "plugin child failed to load shared object");
            std::process::exit(1);
        }
    };

    let (init, event, free) = match unsafe { resolve_symbols(&lib) } {
        Ok(fns) => fns,
        Err(e) => {
            tracing::error!(path, error = %e, "plugin child is missing a required symbol");
            std::process::exit(1);
        }
    };

    unsafe { init() };

    let mut buf = [0u8; BASE_SIZE];
    loop {
        match read(&read_end, &mut buf) {
            Ok(BASE_SIZE) => {
                let payload = Payload::decode(&buf);
                unsafe { event(payload.key, payload.key, payload.key, payload.key) };
            }
            _ => break,
        }
    }

    unsafe { free() };
    std::process::exit(0)
}

unsafe fn resolve_symbols(lib: &Library) -> Result<(InitFn, EventFn, FreeFn), Error> {
    let _name: libloading::Symbol<NameFn> = lib.get(b"nemo_name\0").map_err(|_| Error::PluginLoad {
        path: String::new(),
        symbol: "nemo_name",
    })?;
    let init: libloading::Symbol<InitFn> = lib.get(b"nemo_init\0").map_err(|_| Error::PluginLoad {
        path: String::new(),
        symbol: "nemo_init",
    })?;
    let event: libloading::Symbol<EventFn> = lib.get(b"nemo_evnt\0").map_err(|_| Error::PluginLoad {
        path: String::new(),
        symbol: "nemo_evnt",
    })?;
    let free: libloading::Symbol<FreeFn> = lib.get(b"nemo_free\0").map_err(|_| Error::PluginLoad {
        path: String::new(),
        symbol: "nemo_free",
    })?;

    // Symbols borrow from `lib`; leaking them here is deliberate since the
    // child process exits as soon as it's done with the plugin, so there
    // is no real "library unload" story to preserve.
    Ok((
        std::mem::transmute::<libloading::Symbol<InitFn>, InitFn>(init),
        std::mem::transmute::<libloading::Symbol<EventFn>, EventFn>(event),
        std::mem::transmute::<libloading::Symbol<FreeFn>, FreeFn>(free),
    ))
}

/// Resolves a plugin's advertised name (for logging) without forking;
/// called by the parent before [`Plugin::spawn`] so a missing-symbol error
/// is attributed to the right path up front.
pub fn probe_name(path: &str) -> Result<String, Error> {
    let lib = unsafe { Library::new(path) }.map_err(|e| Error::Socket {
        step: "dlopen",
        source: std::io::Error::new(std::io::ErrorKind::NotFound, e.to_string()),
    })?;
    let name: libloading::Symbol<NameFn> = unsafe { lib.get(b"nemo_name\0") }.map_err(|_| Error::PluginLoad {
        path: path.to_string(),
        symbol: "nemo_name",
    })?;
    let ptr = unsafe { name() };
    if ptr.is_null() {
        return Ok(path.to_string());
    }
    let cstr = unsafe { CStr::from_ptr(ptr) };
    Ok(cstr.to_string_lossy().into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plugin_states_are_distinct() {
        // Spawning a real plugin requires a built `.so` for this ABI, which
        // this workspace cannot produce without running the toolchain; the
        // fork/pipe/reap mechanics are exercised by hand against
        // `plugins/nemo-plugin-echo` instead of in an automated test here.
        assert_ne!(PluginState::Prepared, PluginState::Running);
        assert_ne!(PluginState::Running, PluginState::Stopped);
    }
}
