//! The hierarchical timing wheel (§4.4), grounded on the original node's
//! `timer.cpp`/`timer_manager.cpp` (near ring + four cascading far levels,
//! amortized O(1) migration on carry).

use crate::handle::Handle;
use crate::message::{Message, MessageKind, Session};
use crate::registry::Registry;
use parking_lot::Mutex;

const TIME_NEAR_SHIFT: u32 = 8;
const TIME_NEAR: usize = 1 << TIME_NEAR_SHIFT; // 256
const TIME_NEAR_MASK: u32 = (TIME_NEAR - 1) as u32;
const TIME_LEVEL_SHIFT: u32 = 6;
const TIME_LEVEL: usize = 1 << TIME_LEVEL_SHIFT; // 64
const TIME_LEVEL_MASK: u32 = (TIME_LEVEL - 1) as u32;
const FAR_LEVELS: usize = 4;

#[derive(Clone, Copy)]
struct TimerNode {
    expire: u32,
    handle: Handle,
    session: Session,
}

struct WheelInner {
    near: Vec<Vec<TimerNode>>,
    far: [Vec<Vec<TimerNode>>; FAR_LEVELS],
    current: u32,
}

impl WheelInner {
    fn new() -> Self {
        WheelInner {
            near: (0..TIME_NEAR).map(|_| Vec::new()).collect(),
            far: std::array::from_fn(|_| (0..TIME_LEVEL).map(|_| Vec::new()).collect()),
            current: 0,
        }
    }

    fn add_node(&mut self, node: TimerNode) {
        let time = node.expire;
        let current = self.current;
        if (time ^ current) >> TIME_NEAR_SHIFT == 0 {
            self.near[(time & TIME_NEAR_MASK) as usize].push(node);
            return;
        }
        let mut mask: u32 = (TIME_NEAR as u32) << TIME_LEVEL_SHIFT;
        let mut i = 0usize;
        while i < FAR_LEVELS - 1 {
            if (time ^ current) & !(mask - 1) == 0 {
                break;
            }
            mask <<= TIME_LEVEL_SHIFT;
            i += 1;
        }
        let idx = ((time >> (TIME_NEAR_SHIFT + i as u32 * TIME_LEVEL_SHIFT)) & TIME_LEVEL_MASK) as usize;
        self.far[i][idx].push(node);
    }

    fn move_list(&mut self, level: usize, idx: usize) {
        let nodes = std::mem::take(&mut self.far[level][idx]);
        for node in nodes {
            self.add_node(node);
        }
    }

    /// Advances the wheel by exactly one tick, migrating cascaded buckets as
    /// needed, and returns the nodes now due.
    fn advance_one(&mut self) -> Vec<TimerNode> {
        let ct = self.current.wrapping_add(1);
        self.current = ct;
        if ct == 0 {
            self.move_list(FAR_LEVELS - 1, 0);
        } else {
            let mut mask: u32 = TIME_NEAR as u32;
            let mut time = ct >> TIME_NEAR_SHIFT;
            let mut i = 0usize;
            while ct & (mask - 1) == 0 {
                let idx = (time & TIME_LEVEL_MASK) as usize;
                if idx != 0 {
                    self.move_list(i, idx);
                    break;
                }
                mask <<= TIME_LEVEL_SHIFT;
                time >>= TIME_LEVEL_SHIFT;
                i += 1;
                if i >= FAR_LEVELS {
                    break;
                }
            }
        }
        let idx = (self.current & TIME_NEAR_MASK) as usize;
        std::mem::take(&mut self.near[idx])
    }
}

/// The wheel plus the mutex guarding it, shared by all services.
pub struct TimingWheel {
    inner: Mutex<WheelInner>,
}

impl TimingWheel {
    pub fn new() -> Self {
        TimingWheel {
            inner: Mutex::new(WheelInner::new()),
        }
    }

    /// `timeout(h, ticks, session)`. `ticks <= 0` is a shortcut that sends
    /// the response message immediately instead of creating a timer node.
    pub fn timeout(&self, handle: Handle, ticks: i64, session: Session, registry: &Registry) {
        if ticks <= 0 {
            let _ = registry.send(
                None,
                handle,
                MessageKind::Response,
                Some(session),
                None,
                crate::message::SendFlags::empty(),
            );
            return;
        }
        let mut inner = self.inner.lock();
        let expire = inner.current.wrapping_add(ticks as u32);
        inner.add_node(TimerNode {
            expire,
            handle,
            session,
        });
    }

    /// Advances the wheel by `steps` ticks (the timer thread computes this
    /// from elapsed wall time) and dispatches every node that became due,
    /// releasing the lock before sending so a service's callback can call
    /// `timeout` again without recursive locking.
    pub fn advance(&self, steps: u64, registry: &Registry) {
        for _ in 0..steps {
            let due = {
                let mut inner = self.inner.lock();
                inner.advance_one()
            };
            for node in due {
                let _ = registry.send(
                    None,
                    node.handle,
                    MessageKind::Response,
                    Some(node.session),
                    None,
                    crate::message::SendFlags::empty(),
                );
            }
        }
    }

    pub fn current_tick(&self) -> u32 {
        self.inner.lock().current
    }
}

impl Default for TimingWheel {
    fn default() -> Self {
        Self::new()
    }
}

pub fn response_message(session: Session) -> Message {
    Message::response(session)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::{Disposition, ServiceModule};
    use ready_queue::ReadyQueue;
    use std::sync::Arc;

    struct Noop;
    impl ServiceModule for Noop {
        fn create(_args: &str) -> Result<Box<Self>, crate::error::RuntimeError> {
            Ok(Box::new(Noop))
        }
        fn handle(&mut self, _ctx: &crate::service::ServiceContext, _msg: Message) -> Disposition {
            Disposition::Consumed
        }
    }

    fn registry() -> Registry {
        Registry::new(Arc::new(ReadyQueue::new()))
    }

    #[test]
    fn timer_fires_no_earlier_than_requested_ticks() {
        let reg = registry();
        let h = reg.insert(Box::new(Noop), false);
        let wheel = TimingWheel::new();
        let session = Session::new(42).unwrap();
        wheel.timeout(h, 5, session, &reg);

        wheel.advance(4, &reg);
        let svc = reg.grab(h).unwrap();
        let mailbox = reg.mailbox(&svc).unwrap();
        assert_eq!(mailbox.len(), 0, "must not fire before its tick");
        reg.release(svc);

        wheel.advance(1, &reg);
        let svc = reg.grab(h).unwrap();
        let mailbox = reg.mailbox(&svc).unwrap();
        assert_eq!(mailbox.len(), 1);
        let msg = mailbox.pop().unwrap();
        assert_eq!(msg.session, Some(session));
        reg.release(svc);
    }

    #[test]
    fn nonpositive_ticks_fire_immediately() {
        let reg = registry();
        let h = reg.insert(Box::new(Noop), false);
        let wheel = TimingWheel::new();
        let session = Session::new(7).unwrap();
        wheel.timeout(h, 0, session, &reg);
        let svc = reg.grab(h).unwrap();
        let mailbox = reg.mailbox(&svc).unwrap();
        assert_eq!(mailbox.len(), 1);
        reg.release(svc);
    }

    #[test]
    fn multiple_timers_fire_in_insertion_order_within_a_tick() {
        let reg = registry();
        let h = reg.insert(Box::new(Noop), false);
        let wheel = TimingWheel::new();
        let s100 = Session::new(100).unwrap();
        let s101 = Session::new(101).unwrap();
        let s102 = Session::new(102).unwrap();
        wheel.timeout(h, 5, s100, &reg);
        wheel.timeout(h, 5, s101, &reg);
        wheel.timeout(h, 3, s102, &reg);

        wheel.advance(3, &reg);
        let svc = reg.grab(h).unwrap();
        let mailbox = reg.mailbox(&svc).unwrap();
        assert_eq!(mailbox.len(), 1);
        assert_eq!(mailbox.pop().unwrap().session, Some(s102));
        reg.release(svc);

        wheel.advance(2, &reg);
        let svc = reg.grab(h).unwrap();
        let mailbox = reg.mailbox(&svc).unwrap();
        assert_eq!(mailbox.pop().unwrap().session, Some(s100));
        assert_eq!(mailbox.pop().unwrap().session, Some(s101));
        reg.release(svc);
    }

    #[test]
    fn far_level_timer_migrates_down_into_range() {
        let reg = registry();
        let h = reg.insert(Box::new(Noop), false);
        let wheel = TimingWheel::new();
        let session = Session::new(9).unwrap();
        // Past the near ring's 256-tick horizon, so this starts in a far
        // level and must cascade down correctly.
        wheel.timeout(h, 1000, session, &reg);
        wheel.advance(999, &reg);
        let svc = reg.grab(h).unwrap();
        let mailbox = reg.mailbox(&svc).unwrap();
        assert_eq!(mailbox.len(), 0);
        reg.release(svc);

        wheel.advance(1, &reg);
        let svc = reg.grab(h).unwrap();
        let mailbox = reg.mailbox(&svc).unwrap();
        assert_eq!(mailbox.pop().unwrap().session, Some(session));
        reg.release(svc);
    }
}
