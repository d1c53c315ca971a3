//! The worker loop (§4.2): pop a ready mailbox, drain a weight-determined
//! batch from it, record heartbeats around each callback, and decide
//! whether to keep the mailbox for another turn or cycle to the next one.

use crate::coordinator::Runtime;
use crate::handle::Handle;
use crate::service::ServiceContext;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Per-worker heartbeat the monitor thread samples: a version counter
/// bumped on callback entry and exit, plus the (sender, dest) of whatever
/// callback is in flight.
#[derive(Default)]
pub struct Heartbeat {
    pub version: AtomicU64,
    pub sender: AtomicU32,
    pub dest: AtomicU32,
}

impl Heartbeat {
    pub(crate) fn enter(&self, sender: Option<Handle>, dest: Handle) {
        self.sender.store(sender.map(Handle::as_u32).unwrap_or(0), Ordering::SeqCst);
        self.dest.store(dest.as_u32(), Ordering::SeqCst);
        self.version.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn leave(&self) {
        self.version.fetch_add(1, Ordering::SeqCst);
        self.dest.store(0, Ordering::SeqCst);
    }
}

/// Weight stripes from low-latency (small fixed batches) to bulk-drain
/// (halved by 2^k), matching the rationale in §4.2: four threads at -1,
/// four at 0, and the rest ramping 1..=3.
pub fn weight_for(index: usize, total: usize) -> i32 {
    if total <= 1 {
        return 0;
    }
    match index {
        0..=3 => -1,
        4..=7 => 0,
        _ => (((index - 8) % 3) + 1) as i32,
    }
}

fn batch_size(weight: i32, queue_len: usize) -> usize {
    if queue_len == 0 {
        return 0;
    }
    match weight {
        w if w < 0 => 1,
        0 => queue_len,
        w => (queue_len >> w).max(1),
    }
}

pub fn worker_loop(runtime: Arc<Runtime>, heartbeat: Arc<Heartbeat>, quit: Arc<AtomicBool>, weight: i32) {
    let mut held: Option<ready_queue::MailboxId> = None;
    loop {
        if quit.load(Ordering::SeqCst) && held.is_none() {
            return;
        }

        let mailbox_id = match held.take() {
            Some(id) => id,
            None => match runtime.ready_queue.wait_for_ready(Some(Duration::from_millis(200))) {
                Some(id) => id,
                None => {
                    if quit.load(Ordering::SeqCst) {
                        return;
                    }
                    continue;
                }
            },
        };

        let Some(mailbox) = runtime.ready_queue.mailbox(mailbox_id) else {
            continue;
        };
        let owner = Handle::new(mailbox.owner());
        let owner = match owner {
            Some(h) => h,
            None => continue,
        };

        let service = match runtime.registry.grab(owner) {
            Some(s) if s.mailbox_id == mailbox_id => s,
            _ => {
                runtime.registry.bounce_and_forget(&mailbox, mailbox_id, owner);
                continue;
            }
        };

        let n = batch_size(weight, mailbox.len());
        let ctx = ServiceContext::new(owner, &runtime);
        let mut drained_to_empty = false;
        for _ in 0..n {
            let Some(msg) = mailbox.pop() else {
                drained_to_empty = true;
                break;
            };
            heartbeat.enter(msg.source, owner);
            if service.profiling {
                service.cpu.enter();
            }
            let disposition = service.module.lock().handle(&ctx, msg);
            if service.profiling {
                service.cpu.leave();
            }
            let _ = disposition; // Reserved vs Consumed only matters to the payload's allocator, not the scheduler
            service.message_count.fetch_add(1, Ordering::Relaxed);
            heartbeat.leave();
            if mailbox.is_empty() {
                drained_to_empty = true;
                break;
            }
        }

        if drained_to_empty || mailbox.is_empty() {
            runtime.registry.release(service);
            held = None;
            continue;
        }

        match runtime.ready_queue.pop_ready() {
            Some(next) => {
                runtime.ready_queue.relink(mailbox_id);
                held = Some(next);
            }
            None => {
                held = Some(mailbox_id);
            }
        }
        runtime.registry.release(service);
    }
}
