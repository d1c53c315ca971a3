//! The error taxonomy from spec §7, realized as one enum so every surface
//! (return codes, `ERROR` messages, log lines) speaks the same vocabulary.

use crate::handle::Handle;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RuntimeError {
    /// Send payload exceeds `MESSAGE_TYPE_MASK`, a mailbox ring buffer hit
    /// its 2^30 cap, or the socket table is exhausted.
    #[error("capacity exceeded: {0}")]
    Capacity(&'static str),

    /// Destination handle isn't live, a name isn't registered, or a socket
    /// id's generation is stale.
    #[error("unknown destination handle {0}")]
    UnknownDest(Handle),

    #[error("name not registered: {0}")]
    NameUnresolved(String),

    #[error("stale socket id (generation mismatch)")]
    StaleSocketId,

    /// `send` with destination 0 and a non-empty payload.
    #[error("address invalid: destination 0 with non-empty payload")]
    AddressInvalid,

    /// Sending to a socket in a state that doesn't support the requested
    /// operation (e.g. resuming a closed socket, binding an owned fd).
    #[error("invalid socket state for this operation: {0}")]
    State(&'static str),

    /// A syscall failed; carries the OS error text, mirroring the `ERROR`
    /// event's `strerror(errno)` payload.
    #[error("I/O error: {0}")]
    Io(String),

    /// The monitor declared a service's callback stuck. No recovery is
    /// attempted; this only documents the observation.
    #[error("service {0} appears blocked in its callback")]
    Blocked(Handle),

    /// Configuration load, bootstrap launch, or reactor init failed at
    /// startup; the process should exit nonzero.
    #[error("fatal startup error: {0}")]
    Fatal(String),
}

impl From<std::io::Error> for RuntimeError {
    fn from(e: std::io::Error) -> Self {
        RuntimeError::Io(e.to_string())
    }
}

#[cfg(any(target_os = "linux", target_os = "macos", target_os = "freebsd"))]
impl From<nix::Error> for RuntimeError {
    fn from(e: nix::Error) -> Self {
        RuntimeError::Io(e.to_string())
    }
}
