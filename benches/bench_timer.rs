//! Hand-rolled bench for timing-wheel insertion + cascading dispatch — run
//! with `cargo bench --bench bench_timer` (no harness; just prints).

use actor_rt::registry::Registry;
use actor_rt::service::{Disposition, ServiceContext, ServiceModule};
use actor_rt::{Message, RuntimeError};
use ready_queue::ReadyQueue;
use std::sync::Arc;
use std::time::Instant;

const TIMERS: u32 = 100_000;

struct Sink;
impl ServiceModule for Sink {
    fn create(_args: &str) -> Result<Box<Self>, RuntimeError> {
        Ok(Box::new(Sink))
    }
    fn handle(&mut self, _ctx: &ServiceContext, _msg: Message) -> Disposition {
        Disposition::Consumed
    }
}

fn main() {
    let registry = Registry::new(Arc::new(ReadyQueue::new()));
    let handle = registry.insert(Box::new(Sink), false);
    let wheel = actor_rt::timer::TimingWheel::new();

    let insert_start = Instant::now();
    for i in 0..TIMERS {
        let session = actor_rt::Session::new(i + 1).unwrap();
        // Spread across the near ring and all four far levels.
        wheel.timeout(handle, (i % 500_000) as i64 + 1, session, &registry);
    }
    let insert_elapsed = insert_start.elapsed();

    let advance_start = Instant::now();
    wheel.advance(500_001, &registry);
    let advance_elapsed = advance_start.elapsed();

    println!(
        "inserted {TIMERS} timers in {:?} ({:.0}/s); advanced 500001 ticks in {:?}",
        insert_elapsed,
        TIMERS as f64 / insert_elapsed.as_secs_f64(),
        advance_elapsed,
    );
}
