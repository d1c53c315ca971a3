/*!
An arena-indexed mailbox ring buffer and global ready-queue, the primitive
that a two-level actor scheduler dispatches work through.

The intended use is pretty specific:

* Many producers push messages into per-destination mailboxes.
* A small pool of worker threads drains mailboxes that currently hold
  messages, one worker per mailbox at a time.
* A mailbox that has messages is either linked into the global ready-queue
  or is currently being drained by exactly one worker — never both, never
  neither.

This crate only provides that primitive: the ring buffer, its growth policy,
its overload watermark, and the shared ready-list that workers pop from. It
has no notion of services, callbacks or message types — the owning crate
supplies those.

## Design

Rather than an intrusive linked list of mailboxes (the traditional C
approach), mailboxes live in an arena (`Vec<Option<Arc<Mailbox<T>>>>`)
addressed by a stable integer `MailboxId`, and the global ready-queue is a
plain `VecDeque<MailboxId>` guarded by a mutex. A mailbox's `in_queue` flag
is the only invariant-carrying piece of shared state: set the moment a push
transitions the mailbox from empty to non-empty, cleared the moment a pop
drains it to empty. The flag, not the data structure, is what enforces
"linked in the ready-queue or being drained, never both".
*/

use crossbeam_utils::CachePadded;
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// A mailbox's ring buffer never grows past this many slots.
pub const MAX_CAPACITY: usize = 1 << 30;

const DEFAULT_CAPACITY: usize = 64;
const DEFAULT_OVERLOAD_THRESHOLD: usize = 1024;

/// Stable handle into a [`ReadyQueue`]'s mailbox arena. Never aliases two
/// live mailboxes concurrently; the arena slot is only reused after
/// [`ReadyQueue::remove`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MailboxId(usize);

#[derive(Debug, thiserror::Error)]
pub enum PushError {
    #[error("mailbox ring buffer has reached its {0}-slot cap")]
    Full(usize),
    #[error("mailbox is release-pending and no longer accepts messages")]
    ReleasePending,
}

/// The ring buffer backing one mailbox. Not exposed directly; all access
/// goes through [`Mailbox`]'s locked methods.
struct Ring<T> {
    buf: Vec<Option<T>>,
    head: usize,
    tail: usize,
    cap: usize,
    len: usize,
    overload_threshold: usize,
}

impl<T> Ring<T> {
    fn new() -> Self {
        let mut buf = Vec::with_capacity(DEFAULT_CAPACITY);
        buf.resize_with(DEFAULT_CAPACITY, || None);
        Ring {
            buf,
            head: 0,
            tail: 0,
            cap: DEFAULT_CAPACITY,
            len: 0,
            overload_threshold: DEFAULT_OVERLOAD_THRESHOLD,
        }
    }

    fn push(&mut self, msg: T) -> Result<(), PushError> {
        self.buf[self.tail] = Some(msg);
        self.tail = (self.tail + 1) % self.cap;
        self.len += 1;
        if self.head == self.tail {
            self.grow()?;
        }
        Ok(())
    }

    /// Doubles capacity, copying existing entries back into ring order
    /// starting at index 0. Only called when the ring is completely full.
    fn grow(&mut self) -> Result<(), PushError> {
        if self.cap >= MAX_CAPACITY {
            return Err(PushError::Full(self.cap));
        }
        let old_cap = self.cap;
        let new_cap = old_cap * 2;
        let mut new_buf = Vec::with_capacity(new_cap);
        for i in 0..old_cap {
            new_buf.push(self.buf[(self.head + i) % old_cap].take());
        }
        new_buf.resize_with(new_cap, || None);
        self.buf = new_buf;
        self.head = 0;
        self.tail = old_cap;
        self.cap = new_cap;
        Ok(())
    }

    fn pop(&mut self) -> Option<T> {
        if self.len == 0 {
            return None;
        }
        let msg = self.buf[self.head].take();
        self.head = (self.head + 1) % self.cap;
        self.len -= 1;
        msg
    }
}

/// A per-destination FIFO ring buffer of pending messages, with an overload
/// watermark for diagnostics and a release-pending flag for teardown.
pub struct Mailbox<T> {
    owner: u32,
    ring: Mutex<Ring<T>>,
    in_queue: AtomicBool,
    release_pending: AtomicBool,
    overload_peak: CachePadded<AtomicUsize>,
}

impl<T> Mailbox<T> {
    fn new(owner: u32) -> Self {
        Mailbox {
            owner,
            ring: Mutex::new(Ring::new()),
            in_queue: AtomicBool::new(false),
            release_pending: AtomicBool::new(false),
            overload_peak: CachePadded::new(AtomicUsize::new(0)),
        }
    }

    /// The opaque owner tag this mailbox was created with (a service handle,
    /// in the owning crate's terms).
    pub fn owner(&self) -> u32 {
        self.owner
    }

    /// Push a message. Returns `Ok(true)` if the mailbox transitioned from
    /// not-in-queue to in-queue and must be linked into the ready-queue by
    /// the caller; `Ok(false)` if it was already linked (or being drained).
    fn push(&self, msg: T) -> Result<bool, PushError> {
        if self.release_pending.load(Ordering::SeqCst) {
            return Err(PushError::ReleasePending);
        }
        {
            let mut ring = self.ring.lock();
            ring.push(msg)?;
        }
        Ok(!self.in_queue.swap(true, Ordering::SeqCst))
    }

    /// Pop one message. When this drains the mailbox to empty, clears the
    /// in-queue flag and resets the overload watermark to its floor.
    pub fn pop(&self) -> Option<T> {
        let mut ring = self.ring.lock();
        let msg = ring.pop();
        if ring.len == 0 {
            ring.overload_threshold = DEFAULT_OVERLOAD_THRESHOLD;
            drop(ring);
            self.in_queue.store(false, Ordering::SeqCst);
        } else {
            while ring.len > ring.overload_threshold {
                ring.overload_threshold *= 2;
                self.overload_peak
                    .fetch_max(ring.overload_threshold, Ordering::Relaxed);
            }
        }
        msg
    }

    /// Current queue length.
    pub fn len(&self) -> usize {
        self.ring.lock().len
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Peak overload watermark observed since the last full drain.
    pub fn overload(&self) -> usize {
        self.overload_peak.load(Ordering::Relaxed)
    }

    pub fn is_in_queue(&self) -> bool {
        self.in_queue.load(Ordering::SeqCst)
    }

    /// Marks this mailbox release-pending. Idempotent. Future pushes are
    /// rejected with [`PushError::ReleasePending`]; the owning crate is
    /// responsible for draining and bouncing any messages already queued.
    pub fn mark_release(&self) {
        self.release_pending.store(true, Ordering::SeqCst);
    }

    pub fn is_release_pending(&self) -> bool {
        self.release_pending.load(Ordering::SeqCst)
    }

    /// Drains every remaining message, invoking `f` for each. Used to bounce
    /// in-flight messages as `ERROR` replies when a mailbox is torn down.
    pub fn drain_all(&self, mut f: impl FnMut(T)) {
        while let Some(msg) = self.pop() {
            f(msg);
        }
    }
}

/// The arena + ready-list shared by a scheduler's worker threads.
pub struct ReadyQueue<T> {
    arena: Mutex<Vec<Option<Arc<Mailbox<T>>>>>,
    free: Mutex<Vec<usize>>,
    ready: Mutex<VecDeque<MailboxId>>,
    condvar: Condvar,
    shutdown: AtomicBool,
}

impl<T> Default for ReadyQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> ReadyQueue<T> {
    pub fn new() -> Self {
        ReadyQueue {
            arena: Mutex::new(Vec::new()),
            free: Mutex::new(Vec::new()),
            ready: Mutex::new(VecDeque::new()),
            condvar: Condvar::new(),
            shutdown: AtomicBool::new(false),
        }
    }

    /// Allocate a new mailbox for `owner`, returning its stable id.
    pub fn insert(&self, owner: u32) -> MailboxId {
        let mailbox = Arc::new(Mailbox::new(owner));
        let mut arena = self.arena.lock();
        let mut free = self.free.lock();
        if let Some(idx) = free.pop() {
            arena[idx] = Some(mailbox);
            MailboxId(idx)
        } else {
            arena.push(Some(mailbox));
            MailboxId(arena.len() - 1)
        }
    }

    /// Free an arena slot. Only valid once the mailbox has been drained and
    /// its owner retired; the slot may be handed out again afterward.
    pub fn remove(&self, id: MailboxId) {
        let mut arena = self.arena.lock();
        if arena[id.0].take().is_some() {
            self.free.lock().push(id.0);
        }
    }

    pub fn mailbox(&self, id: MailboxId) -> Option<Arc<Mailbox<T>>> {
        self.arena.lock().get(id.0).and_then(|slot| slot.clone())
    }

    /// Push a message to `id`'s mailbox, linking it into the ready-queue and
    /// waking one sleeping worker if this was the push that made it
    /// non-empty.
    pub fn push(&self, id: MailboxId, msg: T) -> Result<(), PushError> {
        let mailbox = self.mailbox(id).ok_or(PushError::ReleasePending)?;
        if mailbox.push(msg)? {
            self.link(id);
        }
        Ok(())
    }

    fn link(&self, id: MailboxId) {
        self.ready.lock().push_back(id);
        self.condvar.notify_one();
    }

    /// Re-link a mailbox a worker is re-queuing after a partial drain (step
    /// 6 of the worker loop: push the mailbox back onto the tail so other
    /// mailboxes get a turn).
    pub fn relink(&self, id: MailboxId) {
        self.link(id);
    }

    /// Non-blocking pop from the ready-list.
    pub fn pop_ready(&self) -> Option<MailboxId> {
        self.ready.lock().pop_front()
    }

    /// Block until a mailbox is ready, the timeout elapses, or the queue is
    /// shut down (in which case `None` is returned and the caller should
    /// exit its worker loop).
    pub fn wait_for_ready(&self, timeout: Option<Duration>) -> Option<MailboxId> {
        let mut ready = self.ready.lock();
        loop {
            if let Some(id) = ready.pop_front() {
                return Some(id);
            }
            if self.shutdown.load(Ordering::SeqCst) {
                return None;
            }
            match timeout {
                Some(d) => {
                    let result = self.condvar.wait_for(&mut ready, d);
                    if result.timed_out() && ready.is_empty() {
                        return None;
                    }
                }
                None => self.condvar.wait(&mut ready),
            }
            if self.shutdown.load(Ordering::SeqCst) && ready.is_empty() {
                return None;
            }
        }
    }

    /// Number of mailboxes currently linked into the ready-list (diagnostic).
    pub fn ready_len(&self) -> usize {
        self.ready.lock().len()
    }

    /// Wake every sleeping worker and make future waits return immediately.
    /// Used by the coordinator during shutdown.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
        self.condvar.notify_all();
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Barrier;
    use std::thread;

    #[test]
    fn push_pop_fifo() {
        let q: ReadyQueue<u32> = ReadyQueue::new();
        let id = q.insert(1);
        for i in 0..10 {
            q.push(id, i).unwrap();
        }
        let mailbox = q.mailbox(id).unwrap();
        for i in 0..10 {
            assert_eq!(mailbox.pop(), Some(i));
        }
        assert_eq!(mailbox.pop(), None);
    }

    #[test]
    fn ring_grows_past_default_capacity() {
        let q: ReadyQueue<u32> = ReadyQueue::new();
        let id = q.insert(1);
        for i in 0..500 {
            q.push(id, i).unwrap();
        }
        let mailbox = q.mailbox(id).unwrap();
        for i in 0..500 {
            assert_eq!(mailbox.pop(), Some(i));
        }
    }

    #[test]
    fn overload_watermark_doubles_and_resets() {
        let q: ReadyQueue<u32> = ReadyQueue::new();
        let id = q.insert(1);
        for i in 0..2048 {
            q.push(id, i).unwrap();
        }
        let mailbox = q.mailbox(id).unwrap();
        assert!(mailbox.overload() >= 1024);
        mailbox.drain_all(|_| {});
        // A fresh burst should start from the default threshold again.
        for i in 0..10 {
            q.push(id, i).unwrap();
        }
        assert_eq!(mailbox.overload(), 0);
    }

    #[test]
    fn in_queue_flag_tracks_membership() {
        let q: ReadyQueue<u32> = ReadyQueue::new();
        let id = q.insert(1);
        let mailbox = q.mailbox(id).unwrap();
        assert!(!mailbox.is_in_queue());
        q.push(id, 42).unwrap();
        assert!(mailbox.is_in_queue());
        assert_eq!(q.pop_ready(), Some(id));
        assert_eq!(mailbox.pop(), Some(42));
        assert!(!mailbox.is_in_queue());
    }

    #[test]
    fn release_pending_rejects_new_pushes() {
        let q: ReadyQueue<u32> = ReadyQueue::new();
        let id = q.insert(1);
        let mailbox = q.mailbox(id).unwrap();
        mailbox.mark_release();
        assert!(matches!(q.push(id, 1), Err(PushError::ReleasePending)));
    }

    #[test]
    fn wakes_a_blocked_waiter() {
        let q: Arc<ReadyQueue<u32>> = Arc::new(ReadyQueue::new());
        let id = q.insert(7);
        let barrier = Arc::new(Barrier::new(2));

        let q2 = q.clone();
        let b2 = barrier.clone();
        let worker = thread::spawn(move || {
            b2.wait();
            q2.wait_for_ready(Some(Duration::from_secs(5)))
        });

        barrier.wait();
        thread::sleep(Duration::from_millis(20));
        q.push(id, 99).unwrap();

        assert_eq!(worker.join().unwrap(), Some(id));
    }

    #[test]
    fn shutdown_unblocks_all_waiters() {
        let q: Arc<ReadyQueue<u32>> = Arc::new(ReadyQueue::new());
        let barrier = Arc::new(Barrier::new(2));
        let q2 = q.clone();
        let b2 = barrier.clone();
        let worker = thread::spawn(move || {
            b2.wait();
            q2.wait_for_ready(None)
        });
        barrier.wait();
        thread::sleep(Duration::from_millis(20));
        q.shutdown();
        assert_eq!(worker.join().unwrap(), None);
    }

    #[test]
    fn arena_slots_are_reused_after_remove() {
        let q: ReadyQueue<u32> = ReadyQueue::new();
        let id1 = q.insert(1);
        q.remove(id1);
        let id2 = q.insert(2);
        assert_eq!(id1, id2);
        assert_eq!(q.mailbox(id2).unwrap().owner(), 2);
    }
}
