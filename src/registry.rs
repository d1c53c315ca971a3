//! The service registry (§4.1): handle allocation, name aliasing, and the
//! send primitive.

use crate::error::RuntimeError;
use crate::handle::{Handle, HANDLE_MASK};
use crate::message::{Message, MessageKind, SendFlags, Session, MAX_PAYLOAD};
use crate::service::{DynServiceModule, Service};
use parking_lot::RwLock;
use ready_queue::{Mailbox, MailboxId, ReadyQueue};
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;

struct Slot {
    service: Option<Arc<Service>>,
}

struct Inner {
    slots: Vec<Slot>,
    /// (name, handle) sorted by name for binary search, per §3.
    aliases: Vec<(String, Handle)>,
}

/// Maps service handles to service objects and names to handles. Lookups
/// take the reader lock; insertion, retirement and alias edits take the
/// writer lock, per §4.1's concurrency discipline.
pub struct Registry {
    inner: RwLock<Inner>,
    next_handle_seed: AtomicU32,
    live_count: AtomicUsize,
    ready_queue: Arc<ReadyQueue<Message>>,
}

const DEFAULT_SLOTS: usize = 4;
const MAX_SLOTS: usize = 1 << 30;

impl Registry {
    pub fn new(ready_queue: Arc<ReadyQueue<Message>>) -> Self {
        let mut slots = Vec::with_capacity(DEFAULT_SLOTS);
        slots.resize_with(DEFAULT_SLOTS, || Slot { service: None });
        Registry {
            inner: RwLock::new(Inner {
                slots,
                aliases: Vec::new(),
            }),
            next_handle_seed: AtomicU32::new(1),
            live_count: AtomicUsize::new(0),
            ready_queue,
        }
    }

    /// Next candidate handle value: the rolling counter wraps past 24 bits
    /// back to 1, never yielding the reserved 0.
    fn next_raw_handle(&self) -> u32 {
        loop {
            let raw = self.next_handle_seed.fetch_add(1, Ordering::SeqCst) & HANDLE_MASK;
            if raw != 0 {
                return raw;
            }
        }
    }

    pub fn count(&self) -> usize {
        self.live_count.load(Ordering::SeqCst)
    }

    /// Allocates a handle and a mailbox for a not-yet-initialized service,
    /// inserting `module` into the registry. The caller (the coordinator) is
    /// responsible for running the init-hook and either marking the service
    /// initialized or unregistering it on failure.
    pub fn insert(&self, module: Box<dyn DynServiceModule>, profiling: bool) -> Handle {
        let mut inner = self.inner.write();
        loop {
            let capacity = inner.slots.len();
            let mut probes = 0;
            loop {
                let raw = self.next_raw_handle();
                let idx = (raw as usize) % capacity;
                if inner.slots[idx].service.is_none() {
                    let handle = Handle::new(raw).expect("raw masked to nonzero 24 bits");
                    let mailbox_id = self.ready_queue.insert(handle.as_u32());
                    let service = Arc::new(Service::new(handle, mailbox_id, module, profiling));
                    inner.slots[idx].service = Some(service);
                    self.live_count.fetch_add(1, Ordering::SeqCst);
                    return handle;
                }
                probes += 1;
                if probes >= capacity {
                    break;
                }
            }
            // All slots occupied after a full sweep: grow and retry.
            let new_capacity = (capacity * 2).min(MAX_SLOTS);
            if new_capacity == capacity {
                panic!("service registry exhausted at {} slots", MAX_SLOTS);
            }
            let mut new_slots = Vec::with_capacity(new_capacity);
            new_slots.resize_with(new_capacity, || Slot { service: None });
            // Re-seat existing services at their handle's position mod the
            // new capacity.
            for slot in inner.slots.drain(..) {
                if let Some(service) = slot.service {
                    let idx = (service.handle.as_u32() as usize) % new_capacity;
                    new_slots[idx].service = Some(service);
                }
            }
            inner.slots = new_slots;
        }
    }

    /// Unregisters a partially-constructed service whose init-hook failed.
    /// Does not touch the live-service count, since `insert` already bumped
    /// it and teardown happens through the same path as a normal retire.
    pub fn abort_construction(&self, handle: Handle) {
        self.retire(handle);
    }

    pub fn mark_initialized(&self, handle: Handle) {
        if let Some(service) = self.lookup(handle) {
            service.initialized.store(true, Ordering::SeqCst);
        }
    }

    fn lookup(&self, handle: Handle) -> Option<Arc<Service>> {
        let inner = self.inner.read();
        let capacity = inner.slots.len();
        let idx = (handle.as_u32() as usize) % capacity;
        inner.slots[idx]
            .service
            .as_ref()
            .filter(|s| s.handle == handle)
            .cloned()
    }

    /// Atomically verifies the slot still holds a service with this exact
    /// handle and returns a strong reference to it.
    pub fn grab(&self, handle: Handle) -> Option<Arc<Service>> {
        self.lookup(handle)
    }

    /// Symmetric with `grab`; dropping the `Arc` releases the reference.
    /// Kept as an explicit call so call sites read the same as the spec's
    /// grab/release pairing, even though the actual decrement happens via
    /// `Arc`'s own drop glue.
    pub fn release(&self, service: Arc<Service>) {
        drop(service);
    }

    pub fn set_name(&self, name: &str, handle: Handle) {
        let mut inner = self.inner.write();
        match inner.aliases.binary_search_by(|(n, _)| n.as_str().cmp(name)) {
            Ok(i) => inner.aliases[i].1 = handle,
            Err(i) => inner.aliases.insert(i, (name.to_string(), handle)),
        }
    }

    pub fn find_by_name(&self, name: &str) -> Option<Handle> {
        let inner = self.inner.read();
        inner
            .aliases
            .binary_search_by(|(n, _)| n.as_str().cmp(name))
            .ok()
            .map(|i| inner.aliases[i].1)
    }

    /// Two-phase teardown (§4.1): clears the slot, drops aliases pointing at
    /// it, releases the registry's own reference, and marks the mailbox
    /// release-pending. The actual drain-and-bounce of in-flight messages,
    /// and freeing of the mailbox's arena slot, happens the next time a
    /// worker's scheduler loop touches this mailbox (see
    /// [`crate::scheduler`]) — not here, so `retire` never blocks on
    /// draining. Idempotent: a second call on an already-retired handle is
    /// a no-op, matching "calling retire(h) twice has the same effect as
    /// calling it once".
    pub fn retire(&self, handle: Handle) -> bool {
        let removed = {
            let mut inner = self.inner.write();
            let capacity = inner.slots.len();
            let idx = (handle.as_u32() as usize) % capacity;
            let matches = inner.slots[idx]
                .service
                .as_ref()
                .is_some_and(|s| s.handle == handle);
            if !matches {
                None
            } else {
                inner.aliases.retain(|(_, h)| *h != handle);
                inner.slots[idx].service.take()
            }
        };
        match removed {
            Some(service) => {
                self.live_count.fetch_sub(1, Ordering::SeqCst);
                if let Some(mailbox) = self.ready_queue.mailbox(service.mailbox_id) {
                    mailbox.mark_release();
                    if !mailbox.is_in_queue() && !mailbox.is_empty() {
                        // Messages are queued but the mailbox isn't linked
                        // (can't happen under the push/pop invariant, but
                        // if a send races the retire exactly at this point
                        // we still want it picked up) — link it so a
                        // worker drains and bounces it.
                        self.ready_queue.relink(service.mailbox_id);
                    }
                }
                // Registry's own strong reference drops here; the service
                // is freed once every `grab`'d reference does the same.
                drop(service);
                true
            }
            None => false,
        }
    }

    pub fn retire_all(&self) {
        let handles: Vec<Handle> = {
            let inner = self.inner.read();
            inner
                .slots
                .iter()
                .filter_map(|s| s.service.as_ref().map(|s| s.handle))
                .collect()
        };
        for h in handles {
            self.retire(h);
        }
    }

    /// Drains a release-pending mailbox, bouncing every in-flight message
    /// back to its sender as `ERROR`. Called by the scheduler (never
    /// directly by `retire`) once it observes the owning service is no
    /// longer live.
    pub fn bounce_and_forget(&self, mailbox: &Mailbox<Message>, mailbox_id: MailboxId, dying: Handle) {
        mailbox.drain_all(|msg| {
            if let Some(src) = msg.source {
                if let Some(target) = self.grab(src) {
                    let _ = self.push_message(&target, Message::error(dying));
                    self.release(target);
                }
            }
        });
        self.ready_queue.remove(mailbox_id);
    }

    fn push_message(&self, target: &Arc<Service>, msg: Message) -> Result<(), RuntimeError> {
        self.ready_queue
            .push(target.mailbox_id, msg)
            .map_err(|_| RuntimeError::Capacity("mailbox ring buffer full"))
    }

    pub fn mailbox(&self, service: &Service) -> Option<Arc<Mailbox<Message>>> {
        self.ready_queue.mailbox(service.mailbox_id)
    }

    pub fn mailbox_id_for(&self, handle: Handle) -> Option<MailboxId> {
        self.lookup(handle).map(|s| s.mailbox_id)
    }

    /// The send primitive (§4.1/§6). `src = None` means "self" is resolved
    /// by the caller before reaching here (the coordinator fills in the
    /// calling service's own handle).
    pub fn send(
        &self,
        src: Option<Handle>,
        dst: Handle,
        kind: MessageKind,
        session_arg: Option<Session>,
        payload: Option<Box<[u8]>>,
        flags: SendFlags,
    ) -> Result<Option<Session>, RuntimeError> {
        if let Some(p) = &payload {
            if p.len() > MAX_PAYLOAD {
                return Err(RuntimeError::Capacity("payload exceeds MESSAGE_TYPE_MASK"));
            }
        }
        let target = self.grab(dst).ok_or(RuntimeError::UnknownDest(dst))?;

        let session = if flags.contains(SendFlags::ALLOC_SESSION) {
            // Allocated from the sender's own counter when the sender is a
            // live service; falls back to the destination's counter for
            // sends with no resolvable sender (e.g. the bootstrap launch).
            match src.and_then(|h| self.grab(h)) {
                Some(sender) => {
                    let session = sender.alloc_session();
                    self.release(sender);
                    Some(session)
                }
                None => Some(target.alloc_session()),
            }
        } else {
            session_arg
        };

        let copied = if flags.contains(SendFlags::DONT_COPY) {
            payload
        } else {
            payload.map(|p| p.to_vec().into_boxed_slice())
        };

        let msg = Message {
            source: src,
            session,
            kind,
            payload: copied,
        };

        let result = self.push_message(&target, msg);
        self.release(target);
        result.map(|_| session)
    }

    pub fn send_by_name(
        &self,
        src: Option<Handle>,
        name: &str,
        kind: MessageKind,
        session_arg: Option<Session>,
        payload: Option<Box<[u8]>>,
        flags: SendFlags,
    ) -> Result<Option<Session>, RuntimeError> {
        let dst = self
            .find_by_name(name)
            .or_else(|| crate::handle::parse_numeric_address(name))
            .ok_or_else(|| RuntimeError::NameUnresolved(name.to_string()))?;
        self.send(src, dst, kind, session_arg, payload, flags)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::Disposition;

    struct Echo {
        ping_count: u32,
    }
    impl crate::service::ServiceModule for Echo {
        fn create(_args: &str) -> Result<Box<Self>, RuntimeError> {
            Ok(Box::new(Echo { ping_count: 0 }))
        }
        fn handle(&mut self, _ctx: &crate::service::ServiceContext, _msg: Message) -> Disposition {
            self.ping_count += 1;
            Disposition::Consumed
        }
    }

    fn new_registry() -> Registry {
        Registry::new(Arc::new(ReadyQueue::new()))
    }

    #[test]
    fn insert_assigns_nonzero_handles() {
        let reg = new_registry();
        let h1 = reg.insert(Box::new(Echo { ping_count: 0 }), false);
        let h2 = reg.insert(Box::new(Echo { ping_count: 0 }), false);
        assert_ne!(h1, h2);
        assert_eq!(reg.count(), 2);
    }

    #[test]
    fn retire_is_idempotent() {
        let reg = new_registry();
        let h = reg.insert(Box::new(Echo { ping_count: 0 }), false);
        assert!(reg.retire(h));
        assert!(!reg.retire(h));
    }

    #[test]
    fn unknown_dest_errors() {
        let reg = new_registry();
        let h = reg.insert(Box::new(Echo { ping_count: 0 }), false);
        reg.retire(h);
        let err = reg.send(None, h, MessageKind::Text, None, None, SendFlags::empty());
        assert!(matches!(err, Err(RuntimeError::UnknownDest(_))));
    }

    #[test]
    fn name_resolution_round_trips() {
        let reg = new_registry();
        let h = reg.insert(Box::new(Echo { ping_count: 0 }), false);
        reg.set_name("echo", h);
        assert_eq!(reg.find_by_name("echo"), Some(h));
        assert_eq!(reg.find_by_name("nope"), None);
    }

    #[test]
    fn alloc_session_produces_positive_session() {
        let reg = new_registry();
        let sender = reg.insert(Box::new(Echo { ping_count: 0 }), false);
        let dest = reg.insert(Box::new(Echo { ping_count: 0 }), false);
        let session = reg
            .send(
                Some(sender),
                dest,
                MessageKind::Text,
                None,
                Some(b"ping".to_vec().into_boxed_slice()),
                SendFlags::ALLOC_SESSION,
            )
            .unwrap();
        assert!(session.is_some());
    }
}
