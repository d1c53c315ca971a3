//! BSD/macOS backend for [`Poller`], grounded on the original node's
//! `poller_kqueue.cpp`: one kqueue fd, read interest registered once,
//! write interest toggled via `EV_ADD`/`EV_DELETE` on `EVFILT_WRITE`.

use super::poller::{PollEvent, Poller, MAX_EVENTS};
use crate::error::RuntimeError;
use nix::sys::event::{kevent_ts, kqueue, EventFilter, EventFlag, FilterFlag, KEvent};
use std::os::unix::io::{AsRawFd, OwnedFd, RawFd};

pub struct KqueuePoller {
    kq: OwnedFd,
}

impl KqueuePoller {
    pub fn new() -> Result<Self, RuntimeError> {
        let kq = kqueue()?;
        Ok(KqueuePoller { kq })
    }

    fn apply(&self, changes: &[KEvent]) -> Result<(), RuntimeError> {
        kevent_ts(self.kq.as_raw_fd(), changes, &mut [], None)?;
        Ok(())
    }
}

impl Poller for KqueuePoller {
    fn add(&self, fd: RawFd, token: usize) -> Result<(), RuntimeError> {
        let read_ev = KEvent::new(
            fd as usize,
            EventFilter::EVFILT_READ,
            EventFlag::EV_ADD | EventFlag::EV_CLEAR,
            FilterFlag::empty(),
            0,
            token as isize,
        );
        self.apply(&[read_ev])
    }

    fn remove(&self, fd: RawFd) -> Result<(), RuntimeError> {
        let read_ev = KEvent::new(
            fd as usize,
            EventFilter::EVFILT_READ,
            EventFlag::EV_DELETE,
            FilterFlag::empty(),
            0,
            0,
        );
        let write_ev = KEvent::new(
            fd as usize,
            EventFilter::EVFILT_WRITE,
            EventFlag::EV_DELETE,
            FilterFlag::empty(),
            0,
            0,
        );
        // Deleting a filter that was never added is harmless to attempt and
        // simpler than tracking per-fd write-registration state here.
        let _ = self.apply(&[read_ev, write_ev]);
        Ok(())
    }

    fn set_interest(&self, fd: RawFd, token: usize, readable: bool, writable: bool) -> Result<(), RuntimeError> {
        let read_op = if readable { EventFlag::EV_ENABLE } else { EventFlag::EV_DISABLE };
        let read_ev = KEvent::new(
            fd as usize,
            EventFilter::EVFILT_READ,
            read_op | EventFlag::EV_CLEAR,
            FilterFlag::empty(),
            0,
            token as isize,
        );
        let write_op = if writable { EventFlag::EV_ADD } else { EventFlag::EV_DELETE };
        let write_ev = KEvent::new(
            fd as usize,
            EventFilter::EVFILT_WRITE,
            write_op | EventFlag::EV_CLEAR,
            FilterFlag::empty(),
            0,
            token as isize,
        );
        self.apply(&[read_ev, write_ev])
    }

    fn wait(&self, events: &mut Vec<PollEvent>, timeout_ms: Option<i32>) -> Result<(), RuntimeError> {
        let mut raw = vec![
            KEvent::new(0, EventFilter::EVFILT_READ, EventFlag::empty(), FilterFlag::empty(), 0, 0);
            MAX_EVENTS
        ];
        let timeout = timeout_ms.map(|ms| nix::sys::time::TimeSpec::from(std::time::Duration::from_millis(ms.max(0) as u64)));
        let n = kevent_ts(self.kq.as_raw_fd(), &[], &mut raw, timeout)?;
        events.clear();
        for ev in raw.iter().take(n) {
            let flags = ev.flags();
            events.push(PollEvent {
                token: ev.udata() as usize,
                readable: ev.filter() == Ok(EventFilter::EVFILT_READ),
                writable: ev.filter() == Ok(EventFilter::EVFILT_WRITE),
                error: flags.contains(EventFlag::EV_ERROR),
                eof: flags.contains(EventFlag::EV_EOF),
            });
        }
        Ok(())
    }
}

impl AsRawFd for KqueuePoller {
    fn as_raw_fd(&self) -> RawFd {
        self.kq.as_raw_fd()
    }
}
