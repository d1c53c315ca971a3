//! The socket reactor (§4.3): one I/O thread, a control pipe workers write
//! one-byte-command + one-byte-length + payload frames into, and a poller
//! that turns kernel readiness into service messages.

use super::poller::{default_poller, PollEvent, Poller};
use super::slot::{Protocol, SlotTable, SocketSlot, SocketStatus, WriteBuf};
use super::udp_addr;
use crate::error::RuntimeError;
use crate::handle::Handle;
use crate::message::{Message, MessageKind, SendFlags};
use crate::registry::Registry;
use byteorder::{BigEndian, ByteOrder};
use nix::sys::socket::{
    accept, bind, connect, listen, recv, recvfrom, send, sendto, socket, AddressFamily, Backlog, MsgFlags,
    SockFlag, SockType, SockaddrIn, SockaddrIn6, SockaddrLike,
};
use nix::unistd::{close, pipe, read as nix_read, write as nix_write};
use std::net::SocketAddr;
use std::os::unix::io::{AsRawFd, OwnedFd, RawFd};
use std::sync::atomic::Ordering;
use std::sync::Arc;

/// One-byte command tags written to the control pipe.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CtrlCmd {
    Listen = b'L',
    ConnectTcp = b'O',
    BindFd = b'B',
    Resume = b'R',
    Pause = b'S',
    Close = b'K',
    Exit = b'X',
    SendHigh = b'D',
    SendLow = b'P',
    EnableWrite = b'W',
    NoDelay = b'T',
    RegisterUdp = b'U',
    SendUdp = b'A',
    SetUdpPeer = b'C',
}

/// Kind tag for the service-facing socket event, prefixed onto the message
/// body the reactor pushes through the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SocketEventKind {
    Data = 0,
    Connect = 1,
    Accept = 2,
    Error = 3,
    Close = 4,
    Warning = 5,
    Udp = 6,
}

const TEXT_CAP: usize = 128;

fn build_socket_message(kind: SocketEventKind, slot_id: u32, ud: i32, body: &[u8]) -> Message {
    let mut buf = Vec::with_capacity(9 + body.len().min(TEXT_CAP + 65536));
    buf.push(kind as u8);
    let mut slot_buf = [0u8; 4];
    BigEndian::write_u32(&mut slot_buf, slot_id);
    buf.extend_from_slice(&slot_buf);
    let mut ud_buf = [0u8; 4];
    BigEndian::write_i32(&mut ud_buf, ud);
    buf.extend_from_slice(&ud_buf);
    buf.extend_from_slice(body);
    Message {
        source: None,
        session: None,
        kind: MessageKind::Socket,
        payload: Some(buf.into_boxed_slice()),
    }
}

/// Owns the poller, the slot table, and the control pipe's read end. The
/// write end is cloned out to every worker thread so `send()` et al. can
/// reach the reactor without touching sockets directly.
pub struct Reactor {
    poller: Box<dyn Poller>,
    slots: SlotTable,
    ctrl_read: OwnedFd,
    ctrl_write: Arc<OwnedFd>,
    registry: Arc<Registry>,
}

impl Reactor {
    pub fn new(registry: Arc<Registry>) -> Result<Self, RuntimeError> {
        let (read_fd, write_fd) = pipe()?;
        let poller = default_poller()?;
        poller.add(read_fd.as_raw_fd(), usize::MAX)?;
        Ok(Reactor {
            poller,
            slots: SlotTable::new(),
            ctrl_read: read_fd,
            ctrl_write: Arc::new(write_fd),
            registry,
        })
    }

    pub fn control_handle(&self) -> ControlHandle {
        ControlHandle {
            fd: self.ctrl_write.clone(),
        }
    }

    /// The I/O thread's run loop: drain one control frame if the pipe is
    /// readable, else poll for readiness events, up to `MAX_EVENTS` at a
    /// time. Returns once an `Exit` control command is processed.
    pub fn run(mut self) {
        let mut events: Vec<PollEvent> = Vec::with_capacity(super::poller::MAX_EVENTS);
        loop {
            if let Err(e) = self.poller.wait(&mut events, Some(100)) {
                log::warn!("reactor poll error: {e}");
                continue;
            }
            let mut exit = false;
            for ev in events.drain(..) {
                if ev.token == usize::MAX {
                    if self.drain_one_control() {
                        exit = true;
                    }
                    continue;
                }
                self.handle_event(ev);
            }
            if exit {
                break;
            }
        }
    }

    /// Reads and executes exactly one control frame. Returns `true` if it
    /// was `Exit`.
    fn drain_one_control(&mut self) -> bool {
        let mut header = [0u8; 2];
        if nix_read(self.ctrl_read.as_raw_fd(), &mut header).unwrap_or(0) < 2 {
            return false;
        }
        let cmd = header[0];
        let len = header[1] as usize;
        let mut payload = vec![0u8; len];
        let mut got = 0;
        while got < len {
            match nix_read(self.ctrl_read.as_raw_fd(), &mut payload[got..]) {
                Ok(0) => break,
                Ok(n) => got += n,
                Err(_) => break,
            }
        }
        self.execute_control(cmd, &payload)
    }

    fn execute_control(&mut self, cmd: u8, payload: &[u8]) -> bool {
        if cmd == CtrlCmd::Exit as u8 {
            return true;
        }
        if cmd == CtrlCmd::Listen as u8 {
            self.do_listen(payload);
        } else if cmd == CtrlCmd::ConnectTcp as u8 {
            self.do_connect(payload);
        } else if cmd == CtrlCmd::Close as u8 {
            self.do_close(payload);
        } else if cmd == CtrlCmd::SendHigh as u8 {
            self.do_send(payload, true);
        } else if cmd == CtrlCmd::SendLow as u8 {
            self.do_send(payload, false);
        } else if cmd == CtrlCmd::EnableWrite as u8 {
            self.do_enable_write(payload);
        } else if cmd == CtrlCmd::RegisterUdp as u8 {
            self.do_register_udp(payload);
        } else if cmd == CtrlCmd::SendUdp as u8 {
            self.do_send_udp(payload);
        } else if cmd == CtrlCmd::BindFd as u8 {
            self.do_bind_fd(payload);
        } else if cmd == CtrlCmd::NoDelay as u8 {
            self.do_nodelay(payload);
        } else if cmd == CtrlCmd::SetUdpPeer as u8 {
            self.do_set_udp_peer(payload);
        } else if cmd == CtrlCmd::Resume as u8 {
            self.do_resume(payload);
        } else if cmd == CtrlCmd::Pause as u8 {
            self.do_pause(payload);
        }
        false
    }

    /// Recomputes a slot's poller interest from its paused flag and current
    /// write-queue occupancy, replacing whatever was registered before.
    fn sync_interest(&self, idx: usize, fd: RawFd, writable: bool) {
        let slot = self.slots.get(idx);
        let readable = !slot.paused.load(Ordering::SeqCst);
        let _ = self.poller.set_interest(fd, idx, readable, writable);
    }

    fn do_resume(&mut self, payload: &[u8]) {
        let Some((idx, slot)) = self.resolve(payload) else { return };
        slot.paused.store(false, Ordering::SeqCst);
        if let Some(fd) = *slot.fd.lock() {
            let writable = !slot.high_queue.lock().is_empty() || !slot.low_queue.lock().is_empty();
            self.sync_interest(idx, fd, writable);
        }
    }

    fn do_pause(&mut self, payload: &[u8]) {
        let Some((idx, slot)) = self.resolve(payload) else { return };
        slot.paused.store(true, Ordering::SeqCst);
        if let Some(fd) = *slot.fd.lock() {
            let writable = !slot.high_queue.lock().is_empty() || !slot.low_queue.lock().is_empty();
            self.sync_interest(idx, fd, writable);
        }
    }

    /// Wraps an externally-owned, already-connected fd (e.g. one accepted
    /// outside this reactor) as a `Connected` TCP slot.
    fn do_bind_fd(&mut self, payload: &[u8]) {
        if payload.len() < 8 {
            return;
        }
        let owner = Handle::new(BigEndian::read_u32(&payload[0..4]));
        let fd = BigEndian::read_i32(&payload[4..8]) as RawFd;
        let _ = nix::fcntl::fcntl(fd, nix::fcntl::FcntlArg::F_SETFL(nix::fcntl::OFlag::O_NONBLOCK));
        if let Some((idx, slot)) = self.slots.alloc() {
            slot.set_status(SocketStatus::Connected);
            *slot.fd.lock() = Some(fd);
            *slot.protocol.lock() = Protocol::Tcp;
            if let Some(owner) = owner {
                slot.owner.store(owner.as_u32(), Ordering::SeqCst);
            }
            let _ = self.poller.add(fd, idx);
        } else {
            let _ = close(fd);
        }
    }

    fn do_nodelay(&mut self, payload: &[u8]) {
        let Some((_, slot)) = self.resolve(payload) else { return };
        if let Some(fd) = *slot.fd.lock() {
            let borrowed = unsafe { std::os::fd::BorrowedFd::borrow_raw(fd) };
            let _ = nix::sys::socket::setsockopt(&borrowed, nix::sys::socket::sockopt::TcpNoDelay, &true);
        }
    }

    /// Remembers a UDP peer on the slot so a later `A` with no address
    /// suffix can still be routed, mirroring a connected-UDP socket.
    fn do_set_udp_peer(&mut self, payload: &[u8]) {
        let Some((_, slot)) = self.resolve(payload) else { return };
        if let Some((peer, _)) = udp_addr::decode(&payload[4..]) {
            *slot.udp_peer.lock() = Some(peer);
        }
    }

    fn do_listen(&mut self, payload: &[u8]) {
        if payload.len() < 6 {
            return;
        }
        let owner = Handle::new(BigEndian::read_u32(&payload[0..4]));
        let port = BigEndian::read_u16(&payload[4..6]);
        let Ok(sock) = socket(AddressFamily::Inet, SockType::Stream, SockFlag::SOCK_NONBLOCK, None) else {
            return;
        };
        let addr = SockaddrIn::from(std::net::SocketAddrV4::new(std::net::Ipv4Addr::UNSPECIFIED, port));
        if bind(sock.as_raw_fd(), &addr).is_err() || listen(&sock, Backlog::new(128).unwrap_or(Backlog::MAXCONN)).is_err() {
            let _ = close(sock.as_raw_fd());
            return;
        }
        if let Some((idx, slot)) = self.slots.alloc() {
            slot.set_status(SocketStatus::Listen);
            *slot.fd.lock() = Some(sock.as_raw_fd());
            *slot.protocol.lock() = Protocol::Tcp;
            if let Some(owner) = owner {
                slot.owner.store(owner.as_u32(), Ordering::SeqCst);
            }
            let _ = self.poller.add(sock.as_raw_fd(), idx);
            std::mem::forget(sock); // ownership now lives in the slot
        } else {
            let _ = close(sock.as_raw_fd());
        }
    }

    fn do_connect(&mut self, payload: &[u8]) {
        if payload.len() < 6 {
            return;
        }
        let owner = Handle::new(BigEndian::read_u32(&payload[0..4]));
        let port = BigEndian::read_u16(&payload[4..6]);
        let Ok(sock) = socket(AddressFamily::Inet, SockType::Stream, SockFlag::SOCK_NONBLOCK, None) else {
            return;
        };
        let addr = SockaddrIn::from(std::net::SocketAddrV4::new(std::net::Ipv4Addr::LOCALHOST, port));
        let in_progress = matches!(connect(sock.as_raw_fd(), &addr), Err(nix::Error::EINPROGRESS) | Ok(()));
        if !in_progress {
            let _ = close(sock.as_raw_fd());
            return;
        }
        if let Some((idx, slot)) = self.slots.alloc() {
            slot.set_status(SocketStatus::Connecting);
            *slot.fd.lock() = Some(sock.as_raw_fd());
            if let Some(owner) = owner {
                slot.owner.store(owner.as_u32(), Ordering::SeqCst);
            }
            let _ = self.poller.add(sock.as_raw_fd(), idx);
            self.sync_interest(idx, sock.as_raw_fd(), true);
            std::mem::forget(sock);
        } else {
            let _ = close(sock.as_raw_fd());
        }
    }

    fn resolve(&self, payload: &[u8]) -> Option<(usize, &SocketSlot)> {
        if payload.len() < 4 {
            return None;
        }
        let id = BigEndian::read_u32(&payload[0..4]);
        let idx = SocketSlot::index_of(id);
        let slot = self.slots.get(idx);
        if slot.id() == id {
            Some((idx, slot))
        } else {
            log::debug!("{}", RuntimeError::StaleSocketId);
            None
        }
    }

    fn do_close(&mut self, payload: &[u8]) {
        let Some((idx, slot)) = self.resolve(payload) else { return };
        let graceful = payload.get(4).copied().unwrap_or(0) == 0;
        let has_pending = !slot.high_queue.lock().is_empty() || !slot.low_queue.lock().is_empty();
        if graceful && has_pending {
            slot.closing.store(true, Ordering::SeqCst);
            self.emit(idx, SocketEventKind::Close, &[]);
        } else {
            self.force_close(idx);
        }
    }

    fn force_close(&mut self, idx: usize) {
        let slot = self.slots.get(idx);
        if let Some(fd) = slot.fd.lock().take() {
            let _ = self.poller.remove(fd);
            let _ = close(fd);
        }
        self.slots.free(idx);
    }

    fn do_send(&mut self, payload: &[u8], high: bool) {
        let Some((idx, _)) = self.resolve(payload) else { return };
        let slot = self.slots.get(idx);
        if payload.len() <= 4 {
            slot.sending.leave();
            return;
        }
        let data = payload[4..].to_vec().into_boxed_slice();
        slot.queued_bytes.fetch_add(data.len(), Ordering::Relaxed);
        let queue = if high { &slot.high_queue } else { &slot.low_queue };
        queue.lock().push_back(WriteBuf { data, offset: 0 });
        if let Some(fd) = *slot.fd.lock() {
            self.sync_interest(idx, fd, true);
        }
        slot.sending.leave();
        self.check_warning(idx);
    }

    fn do_enable_write(&mut self, payload: &[u8]) {
        let Some((idx, slot)) = self.resolve(payload) else { return };
        if let Some(fd) = *slot.fd.lock() {
            self.sync_interest(idx, fd, true);
        }
    }

    fn do_register_udp(&mut self, payload: &[u8]) {
        if payload.len() < 5 {
            return;
        }
        let owner = Handle::new(BigEndian::read_u32(&payload[0..4]));
        let v6 = payload[4] != 0;
        let family = if v6 { AddressFamily::Inet6 } else { AddressFamily::Inet };
        let Ok(sock) = socket(family, SockType::Datagram, SockFlag::SOCK_NONBLOCK, None) else {
            return;
        };
        if let Some((idx, slot)) = self.slots.alloc() {
            slot.set_status(SocketStatus::Connected);
            *slot.fd.lock() = Some(sock.as_raw_fd());
            *slot.protocol.lock() = if v6 { Protocol::UdpV6 } else { Protocol::UdpV4 };
            if let Some(owner) = owner {
                slot.owner.store(owner.as_u32(), Ordering::SeqCst);
            }
            let _ = self.poller.add(sock.as_raw_fd(), idx);
            std::mem::forget(sock);
        } else {
            let _ = close(sock.as_raw_fd());
        }
    }

    fn do_send_udp(&mut self, payload: &[u8]) {
        let Some((idx, slot)) = self.resolve(payload) else { return };
        let (peer, body) = match udp_addr::decode(&payload[4..]) {
            Some((peer, used)) => (Some(peer), &payload[4..payload.len() - used]),
            None => (*slot.udp_peer.lock(), &payload[4..]),
        };
        match (*slot.fd.lock(), peer) {
            (Some(fd), Some(peer)) => {
                let _ = sendto_peer(fd, body, &peer);
            }
            _ => {
                log::debug!("{}", RuntimeError::AddressInvalid);
                self.emit(idx, SocketEventKind::Error, b"address invalid");
            }
        }
        slot.sending.leave();
    }

    fn check_warning(&self, idx: usize) {
        let slot = self.slots.get(idx);
        let queued = slot.queued_bytes.load(Ordering::Relaxed);
        let watermark = slot.warning_watermark.load(Ordering::Relaxed);
        if queued >= watermark {
            slot.warning_watermark.store(watermark * 2, Ordering::Relaxed);
            let kbytes = (queued / 1024) as u32;
            let mut body = [0u8; 4];
            BigEndian::write_u32(&mut body, kbytes);
            self.emit(idx, SocketEventKind::Warning, &body);
        }
    }

    fn emit(&self, idx: usize, kind: SocketEventKind, body: &[u8]) {
        let slot = self.slots.get(idx);
        let owner = slot.owner.load(Ordering::SeqCst);
        let Some(handle) = Handle::new(owner) else { return };
        let msg = build_socket_message(kind, slot.id(), 0, body);
        let _ = self.registry.send(None, handle, msg.kind, None, msg.payload, SendFlags::empty());
    }

    fn handle_event(&mut self, ev: PollEvent) {
        let idx = ev.token;
        if idx >= super::slot::SLOT_COUNT {
            return;
        }
        let status = self.slots.get(idx).status();
        match status {
            SocketStatus::Connecting => self.handle_connecting(idx, ev),
            SocketStatus::Listen => {
                if ev.readable {
                    self.handle_accept(idx);
                }
            }
            SocketStatus::Connected => {
                if ev.error {
                    self.emit(idx, SocketEventKind::Error, b"socket error");
                    self.force_close(idx);
                    return;
                }
                if ev.eof {
                    self.emit(idx, SocketEventKind::Close, &[]);
                    self.force_close(idx);
                    return;
                }
                let protocol = *self.slots.get(idx).protocol.lock();
                if ev.readable {
                    match protocol {
                        Protocol::Tcp => self.handle_readable_tcp(idx),
                        Protocol::UdpV4 | Protocol::UdpV6 => self.handle_readable_udp(idx),
                    }
                }
                if ev.writable {
                    self.handle_writable(idx);
                }
            }
            _ => {}
        }
    }

    fn handle_connecting(&mut self, idx: usize, ev: PollEvent) {
        let fd = match *self.slots.get(idx).fd.lock() {
            Some(fd) => fd,
            None => return,
        };
        if ev.error || socket_has_error(fd) {
            self.emit(idx, SocketEventKind::Error, b"connect failed");
            self.force_close(idx);
            return;
        }
        let slot = self.slots.get(idx);
        slot.set_status(SocketStatus::Connected);
        if slot.high_queue.lock().is_empty() && slot.low_queue.lock().is_empty() {
            self.sync_interest(idx, fd, false);
        }
        self.emit(idx, SocketEventKind::Connect, b"connected");
    }

    fn handle_accept(&mut self, idx: usize) {
        let fd = match *self.slots.get(idx).fd.lock() {
            Some(fd) => fd,
            None => return,
        };
        let owner = self.slots.get(idx).owner.load(Ordering::SeqCst);
        let Ok(client_fd) = accept(fd) else { return };
        let _ = nix::fcntl::fcntl(client_fd, nix::fcntl::FcntlArg::F_SETFL(nix::fcntl::OFlag::O_NONBLOCK));
        if let Some((new_idx, new_slot)) = self.slots.alloc() {
            new_slot.set_status(SocketStatus::PrepareAccept);
            *new_slot.fd.lock() = Some(client_fd);
            new_slot.owner.store(owner, Ordering::SeqCst);
            let _ = self.poller.add(client_fd, new_idx);
            new_slot.set_status(SocketStatus::Connected);
            self.emit(new_idx, SocketEventKind::Accept, b"accepted");
        } else {
            let _ = close(client_fd);
        }
    }

    fn handle_readable_tcp(&mut self, idx: usize) {
        let slot = self.slots.get(idx);
        let fd = match *slot.fd.lock() {
            Some(fd) => fd,
            None => return,
        };
        let mut hint = slot.read_hint();
        let mut collected: Vec<u8> = Vec::new();
        loop {
            let mut chunk = vec![0u8; hint];
            match recv(fd, &mut chunk, MsgFlags::empty()) {
                Ok(0) => {
                    if collected.is_empty() {
                        self.emit(idx, SocketEventKind::Close, &[]);
                        self.force_close(idx);
                        return;
                    }
                    break;
                }
                Ok(n) => {
                    chunk.truncate(n);
                    slot.bytes_received.fetch_add(n as u64, Ordering::Relaxed);
                    collected.extend_from_slice(&chunk);
                    if n < hint {
                        slot.bump_read_hint_down();
                        break;
                    }
                    slot.bump_read_hint_up();
                    hint = slot.read_hint();
                }
                Err(nix::Error::EWOULDBLOCK) => break,
                Err(_) => {
                    self.emit(idx, SocketEventKind::Error, b"read failed");
                    self.force_close(idx);
                    return;
                }
            }
        }
        if !collected.is_empty() {
            self.emit(idx, SocketEventKind::Data, &collected);
        }
    }

    fn handle_readable_udp(&mut self, idx: usize) {
        let slot = self.slots.get(idx);
        let fd = match *slot.fd.lock() {
            Some(fd) => fd,
            None => return,
        };
        let mut buf = vec![0u8; 65535];
        match recvfrom::<nix::sys::socket::SockaddrStorage>(fd, &mut buf) {
            Ok((n, Some(from))) => {
                buf.truncate(n);
                if let Some(addr) = sockaddr_to_std(&from) {
                    udp_addr::encode(&addr, &mut buf);
                }
                self.emit(idx, SocketEventKind::Udp, &buf);
            }
            _ => {}
        }
    }

    fn handle_writable(&mut self, idx: usize) {
        let slot = self.slots.get(idx);
        let fd = match *slot.fd.lock() {
            Some(fd) => fd,
            None => return,
        };
        if let Some(mut staged) = slot.direct.lock().take() {
            slot.high_queue.lock().push_front(staged_to_writebuf(&mut staged));
        }
        for queue in [&slot.high_queue, &slot.low_queue] {
            loop {
                let mut guard = queue.lock();
                let Some(front) = guard.front_mut() else { break };
                match send(fd, front.remaining(), MsgFlags::empty()) {
                    Ok(n) => {
                        front.offset += n;
                        slot.bytes_sent.fetch_add(n as u64, Ordering::Relaxed);
                        slot.queued_bytes.fetch_sub(n.min(slot.queued_bytes.load(Ordering::Relaxed)), Ordering::Relaxed);
                        if front.offset >= front.data.len() {
                            guard.pop_front();
                        } else {
                            break; // partial write; stays at head, interest remains on
                        }
                    }
                    Err(nix::Error::EWOULDBLOCK) => break,
                    Err(_) => {
                        drop(guard);
                        self.emit(idx, SocketEventKind::Error, b"write failed");
                        self.force_close(idx);
                        return;
                    }
                }
            }
        }
        let empty = slot.high_queue.lock().is_empty() && slot.low_queue.lock().is_empty();
        if empty {
            self.sync_interest(idx, fd, false);
            if slot.queued_bytes.load(Ordering::Relaxed) == 0 && slot.warning_watermark.load(Ordering::Relaxed) > (1 << 20) {
                self.emit(idx, SocketEventKind::Warning, &[0, 0, 0, 0]);
                slot.reset_warning_watermark();
            }
            if slot.closing.load(Ordering::SeqCst) {
                self.force_close(idx);
            }
        }
    }
}

fn staged_to_writebuf(staged: &mut WriteBuf) -> WriteBuf {
    WriteBuf {
        data: std::mem::take(&mut staged.data),
        offset: staged.offset,
    }
}

fn socket_has_error(fd: RawFd) -> bool {
    nix::sys::socket::getsockopt(&unsafe { std::os::fd::BorrowedFd::borrow_raw(fd) }, nix::sys::socket::sockopt::SocketError)
        .map(|e| e != 0)
        .unwrap_or(true)
}

fn sendto_peer(fd: RawFd, body: &[u8], peer: &SocketAddr) -> nix::Result<usize> {
    match peer {
        SocketAddr::V4(a) => sendto(fd, body, &SockaddrIn::from(*a), MsgFlags::empty()),
        SocketAddr::V6(a) => sendto(fd, body, &SockaddrIn6::from(*a), MsgFlags::empty()),
    }
}

fn sockaddr_to_std(storage: &nix::sys::socket::SockaddrStorage) -> Option<SocketAddr> {
    if let Some(v4) = storage.as_sockaddr_in() {
        Some(SocketAddr::V4(std::net::SocketAddrV4::new(v4.ip().into(), v4.port())))
    } else {
        storage
            .as_sockaddr_in6()
            .map(|v6| SocketAddr::V6(std::net::SocketAddrV6::new(v6.ip(), v6.port(), 0, 0)))
    }
}

/// Cloneable write end of the control pipe; every worker thread holds one so
/// `send`, `listen`, `connect` etc. can reach the reactor without sharing
/// `&mut Reactor`.
#[derive(Clone)]
pub struct ControlHandle {
    fd: Arc<OwnedFd>,
}

impl ControlHandle {
    pub fn send_frame(&self, cmd: CtrlCmd, payload: &[u8]) -> Result<(), RuntimeError> {
        if payload.len() > 255 {
            return Err(RuntimeError::Capacity("control frame payload exceeds 255 bytes"));
        }
        let header = [cmd as u8, payload.len() as u8];
        nix_write(self.fd.as_raw_fd(), &header)?;
        if !payload.is_empty() {
            nix_write(self.fd.as_raw_fd(), payload)?;
        }
        Ok(())
    }

    pub fn exit(&self) -> Result<(), RuntimeError> {
        self.send_frame(CtrlCmd::Exit, &[])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn socket_message_header_layout() {
        let msg = build_socket_message(SocketEventKind::Data, 0x1234, 0, b"hi");
        let payload = msg.payload.unwrap();
        assert_eq!(payload[0], SocketEventKind::Data as u8);
        assert_eq!(BigEndian::read_u32(&payload[1..5]), 0x1234);
        assert_eq!(&payload[9..], b"hi");
    }
}
