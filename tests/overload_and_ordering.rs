//! End-to-end coverage for two of the quantified invariants (§8): the
//! overload watermark as observed through the registry's own send path, and
//! per-sender FIFO ordering across interleaved senders.

use actor_rt::config::Config;
use actor_rt::service::{Disposition, ServiceContext, ServiceModule};
use actor_rt::{Message, MessageKind, RuntimeError, SendFlags};

struct Sink;
impl ServiceModule for Sink {
    fn create(_args: &str) -> Result<Box<Self>, RuntimeError> {
        Ok(Box::new(Sink))
    }
    fn handle(&mut self, _ctx: &ServiceContext, _msg: Message) -> Disposition {
        Disposition::Consumed
    }
}

#[test]
fn overload_watermark_rises_then_resets_on_full_drain() {
    let runtime = actor_rt::Runtime::new(Config::default());
    let dest = runtime.registry.insert(Box::new(Sink), false);
    let service = runtime.registry.grab(dest).unwrap();
    let mailbox = runtime.registry.mailbox(&service).unwrap();
    runtime.registry.release(service);

    for _ in 0..2048 {
        runtime
            .registry
            .send(None, dest, MessageKind::Text, None, None, SendFlags::empty())
            .unwrap();
    }
    assert!(mailbox.overload() >= 1024);

    mailbox.drain_all(|_| {});
    assert_eq!(mailbox.overload(), 0);
}

#[test]
fn messages_from_the_same_sender_arrive_in_send_order() {
    let runtime = actor_rt::Runtime::new(Config::default());
    let dest = runtime.registry.insert(Box::new(Sink), false);
    let sender_a = runtime.registry.insert(Box::new(Sink), false);
    let sender_b = runtime.registry.insert(Box::new(Sink), false);

    // Interleave two senders' sends; each sender's own messages must come
    // out in the order it sent them, though the two streams may interleave.
    for i in 0..50u32 {
        let payload_a = i.to_be_bytes().to_vec().into_boxed_slice();
        runtime
            .registry
            .send(
                Some(sender_a),
                dest,
                MessageKind::Text,
                None,
                Some(payload_a),
                SendFlags::empty(),
            )
            .unwrap();
        let payload_b = (i + 1000).to_be_bytes().to_vec().into_boxed_slice();
        runtime
            .registry
            .send(
                Some(sender_b),
                dest,
                MessageKind::Text,
                None,
                Some(payload_b),
                SendFlags::empty(),
            )
            .unwrap();
    }

    let service = runtime.registry.grab(dest).unwrap();
    let mailbox = runtime.registry.mailbox(&service).unwrap();
    runtime.registry.release(service);

    let mut from_a = Vec::new();
    let mut from_b = Vec::new();
    while let Some(msg) = mailbox.pop() {
        let value = u32::from_be_bytes(msg.payload.as_deref().unwrap().try_into().unwrap());
        if msg.source == Some(sender_a) {
            from_a.push(value);
        } else if msg.source == Some(sender_b) {
            from_b.push(value - 1000);
        }
    }
    assert_eq!(from_a, (0..50).collect::<Vec<_>>());
    assert_eq!(from_b, (0..50).collect::<Vec<_>>());
}
