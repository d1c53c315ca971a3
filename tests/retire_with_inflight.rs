//! End-to-end: messages already queued for a retired service are bounced
//! back to their senders as `ERROR`, and the service is freed exactly once.

use actor_rt::config::Config;
use actor_rt::service::{Disposition, ServiceContext, ServiceModule};
use actor_rt::{Message, MessageKind, RuntimeError, SendFlags};

struct Noop;
impl ServiceModule for Noop {
    fn create(_args: &str) -> Result<Box<Self>, RuntimeError> {
        Ok(Box::new(Noop))
    }
    fn handle(&mut self, _ctx: &ServiceContext, _msg: Message) -> Disposition {
        Disposition::Consumed
    }
}

#[test]
fn retired_mailbox_bounces_every_in_flight_message() {
    let runtime = actor_rt::Runtime::new(Config::default());
    let a = runtime.registry.insert(Box::new(Noop), false);
    let x = runtime.registry.insert(Box::new(Noop), false);
    let before = runtime.registry.count();

    let mailbox_id = runtime.registry.mailbox_id_for(a).unwrap();
    for _ in 0..3 {
        runtime
            .registry
            .send(Some(x), a, MessageKind::Text, None, None, SendFlags::empty())
            .unwrap();
    }

    assert!(runtime.registry.retire(a));
    assert_eq!(runtime.registry.count(), before - 1);
    assert!(!runtime.registry.retire(a), "second retire must report not-found");
    assert!(runtime.registry.grab(a).is_none());

    // In the running system this is the scheduler's job, triggered the
    // next time it pops the dying mailbox off the ready-queue.
    let mailbox = runtime.ready_queue.mailbox(mailbox_id).unwrap();
    runtime.registry.bounce_and_forget(&mailbox, mailbox_id, a);

    let x_service = runtime.registry.grab(x).unwrap();
    let x_mailbox = runtime.registry.mailbox(&x_service).unwrap();
    assert_eq!(x_mailbox.len(), 3);
    for _ in 0..3 {
        let err = x_mailbox.pop().unwrap();
        assert_eq!(err.kind, MessageKind::Error);
        assert_eq!(err.source, Some(a));
        assert!(err.payload.is_none());
    }
    runtime.registry.release(x_service);
}
