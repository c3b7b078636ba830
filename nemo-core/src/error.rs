use std::io;

/// Fatal or initialization-time failures.
///
/// These always propagate to the top level and result in either a clean
/// shutdown (on a fatal signal) or a process exit with status 1 (everything
/// else). Per-datagram problems never produce an `Error`; see
/// [`DatagramError`].
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("socket {step} failed: {source}")]
    Socket {
        step: &'static str,
        #[source]
        source: io::Error,
    },

    #[error("plugin `{path}` is missing required symbol `{symbol}`")]
    PluginLoad { path: String, symbol: &'static str },

    #[error(transparent)]
    Nix(#[from] nix::Error),
}

/// Non-fatal, per-datagram problems.
///
/// Each variant corresponds 1:1 to a [`crate::channel::Channel`] counter
/// that gets bumped when it occurs. Callers decide whether to treat these
/// as fatal (`-e`/`exit_on_error`) or simply drop the datagram and continue.
#[derive(Debug, thiserror::Error, Clone, Copy, PartialEq, Eq)]
pub enum DatagramError {
    #[error("network error while sending or receiving")]
    Network,
    #[error("datagram shorter than the 88-byte base or truncated in transit")]
    Size,
    #[error("bad magic number")]
    Magic,
    #[error("unsupported format version")]
    Version,
    #[error("unexpected message type")]
    Type,
}

/// Non-fatal plugin pipe problems: a short write, a closed pipe, or a
/// `dlopen`/symbol failure scoped to a single plugin. Never aborts
/// processing of the remaining plugins.
#[derive(Debug, thiserror::Error)]
pub enum PluginError {
    #[error("write to plugin `{0}` pipe failed or was short")]
    Io(String),
    #[error("plugin `{0}` exited unexpectedly")]
    Exited(String),
}
