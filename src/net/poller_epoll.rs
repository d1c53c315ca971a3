//! Linux backend for [`Poller`], grounded on the original node's
//! `poller_epoll.cpp` (one epoll fd, level-triggered, EPOLLIN always on,
//! EPOLLOUT toggled per-socket).

use super::poller::{PollEvent, Poller, MAX_EVENTS};
use crate::error::RuntimeError;
use nix::sys::epoll::{Epoll, EpollCreateFlags, EpollEvent, EpollFlags};
use std::os::unix::io::{AsRawFd, RawFd};

pub struct EpollPoller {
    epoll: Epoll,
}

impl EpollPoller {
    pub fn new() -> Result<Self, RuntimeError> {
        let epoll = Epoll::new(EpollCreateFlags::empty())?;
        Ok(EpollPoller { epoll })
    }

    fn flags_for(readable: bool, writable: bool) -> EpollFlags {
        let mut flags = EpollFlags::empty();
        if readable {
            flags |= EpollFlags::EPOLLIN;
        }
        if writable {
            flags |= EpollFlags::EPOLLOUT;
        }
        flags
    }
}

impl Poller for EpollPoller {
    fn add(&self, fd: RawFd, token: usize) -> Result<(), RuntimeError> {
        let event = EpollEvent::new(Self::flags_for(true, false), token as u64);
        self.epoll.add(borrow(fd), event)?;
        Ok(())
    }

    fn remove(&self, fd: RawFd) -> Result<(), RuntimeError> {
        self.epoll.delete(borrow(fd))?;
        Ok(())
    }

    fn set_interest(&self, fd: RawFd, token: usize, readable: bool, writable: bool) -> Result<(), RuntimeError> {
        let event = EpollEvent::new(Self::flags_for(readable, writable), token as u64);
        self.epoll.modify(borrow(fd), &event)?;
        Ok(())
    }

    fn wait(&self, events: &mut Vec<PollEvent>, timeout_ms: Option<i32>) -> Result<(), RuntimeError> {
        let mut raw = [EpollEvent::empty(); MAX_EVENTS];
        let timeout = match timeout_ms {
            Some(ms) => nix::sys::epoll::EpollTimeout::try_from(ms).unwrap_or(nix::sys::epoll::EpollTimeout::NONE),
            None => nix::sys::epoll::EpollTimeout::NONE,
        };
        let n = self.epoll.wait(&mut raw, timeout)?;
        events.clear();
        for ev in raw.iter().take(n) {
            let flags = ev.events();
            events.push(PollEvent {
                token: ev.data() as usize,
                readable: flags.contains(EpollFlags::EPOLLIN),
                writable: flags.contains(EpollFlags::EPOLLOUT),
                error: flags.contains(EpollFlags::EPOLLERR),
                eof: flags.contains(EpollFlags::EPOLLHUP) || flags.contains(EpollFlags::EPOLLRDHUP),
            });
        }
        Ok(())
    }
}

/// `Epoll`'s methods borrow an `impl AsFd`; raw fds from the socket table
/// aren't owned by us, so wrap without taking ownership.
fn borrow(fd: RawFd) -> std::os::fd::BorrowedFd<'static> {
    // SAFETY: the fd outlives this borrow — it's owned by the slot table and
    // only ever closed by the reactor thread itself, never concurrently with
    // a poller call on it.
    unsafe { std::os::fd::BorrowedFd::borrow_raw(fd) }
}

impl AsRawFd for EpollPoller {
    fn as_raw_fd(&self) -> RawFd {
        std::os::fd::AsFd::as_fd(&self.epoll).as_raw_fd()
    }
}
