//! Poller abstraction: an event-readiness backend an I/O thread polls for
//! edge-triggered readable/writable/error/eof notifications on raw fds.

use crate::error::RuntimeError;
use std::os::unix::io::RawFd;

/// One notification from [`Poller::wait`]. `token` is whatever opaque value
/// was registered with [`Poller::add`] — the reactor uses the socket slot's
/// table index.
#[derive(Debug, Clone, Copy)]
pub struct PollEvent {
    pub token: usize,
    pub readable: bool,
    pub writable: bool,
    pub error: bool,
    pub eof: bool,
}

/// Platform readiness backend. `EpollPoller` on Linux, `KqueuePoller` on the
/// BSDs/macOS; picked by [`default_poller`].
pub trait Poller: Send {
    /// Registers `fd` for read interest, tagged with `token`.
    fn add(&self, fd: RawFd, token: usize) -> Result<(), RuntimeError>;

    fn remove(&self, fd: RawFd) -> Result<(), RuntimeError>;

    /// Sets `fd`'s registered interest to exactly `readable`/`writable`,
    /// replacing whatever was registered before. Used both for the
    /// write-queue-driven writable toggle and for the `R`/`S`
    /// resume/pause-reads control commands.
    fn set_interest(&self, fd: RawFd, token: usize, readable: bool, writable: bool) -> Result<(), RuntimeError>;

    /// Blocks (up to `timeout_ms`, or indefinitely if `None`) for readiness
    /// events, appending up to `events.capacity()` of them to `events`.
    fn wait(&self, events: &mut Vec<PollEvent>, timeout_ms: Option<i32>) -> Result<(), RuntimeError>;
}

pub const MAX_EVENTS: usize = 64;

#[cfg(target_os = "linux")]
pub fn default_poller() -> Result<Box<dyn Poller>, RuntimeError> {
    Ok(Box::new(super::poller_epoll::EpollPoller::new()?))
}

#[cfg(not(target_os = "linux"))]
pub fn default_poller() -> Result<Box<dyn Poller>, RuntimeError> {
    Ok(Box::new(super::poller_kqueue::KqueuePoller::new()?))
}
