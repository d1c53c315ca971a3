//! Hand-rolled throughput bench for the registry's send/drain path — run
//! with `cargo bench --bench bench_dispatch` (no harness; just prints).

use actor_rt::registry::Registry;
use actor_rt::service::{Disposition, ServiceContext, ServiceModule};
use actor_rt::{Message, MessageKind, RuntimeError, SendFlags};
use ready_queue::ReadyQueue;
use std::sync::Arc;
use std::time::Instant;

const MESSAGES: u64 = 200_000;

struct Counter(u64);

impl ServiceModule for Counter {
    fn create(_args: &str) -> Result<Box<Self>, RuntimeError> {
        Ok(Box::new(Counter(0)))
    }

    fn handle(&mut self, _ctx: &ServiceContext, _msg: Message) -> Disposition {
        self.0 += 1;
        Disposition::Consumed
    }
}

fn main() {
    let registry = Registry::new(Arc::new(ReadyQueue::new()));
    let handle = registry.insert(Box::new(Counter(0)), false);

    let start = Instant::now();
    for _ in 0..MESSAGES {
        registry
            .send(None, handle, MessageKind::Text, None, None, SendFlags::empty())
            .unwrap();
    }
    let sent_in = start.elapsed();

    let service = registry.grab(handle).unwrap();
    let mailbox = registry.mailbox(&service).unwrap();
    let drain_start = Instant::now();
    let mut drained = 0u64;
    while mailbox.pop().is_some() {
        drained += 1;
    }
    let drained_in = drain_start.elapsed();
    registry.release(service);

    println!(
        "sent {MESSAGES} msgs in {:?} ({:.0} msg/s); drained {drained} in {:?} ({:.0} msg/s)",
        sent_in,
        MESSAGES as f64 / sent_in.as_secs_f64(),
        drained_in,
        drained as f64 / drained_in.as_secs_f64().max(1e-9),
    );
}
