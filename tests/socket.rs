//! End-to-end: a service issues a socket control command through
//! `ServiceContext::socket`, the reactor thread carries it out against a
//! real OS socket, and the resulting event lands back in the service's
//! own mailbox.

use actor_rt::config::Config;
use actor_rt::net::{CtrlCmd, Reactor, SocketEventKind};
use actor_rt::service::{Disposition, ServiceContext, ServiceModule};
use actor_rt::{Message, MessageKind, RuntimeError};
use byteorder::{BigEndian, ByteOrder};
use std::net::TcpStream;
use std::time::{Duration, Instant};

const TEST_PORT: u16 = 18_733;

struct Listener;

impl ServiceModule for Listener {
    fn create(_args: &str) -> Result<Box<Self>, RuntimeError> {
        Ok(Box::new(Listener))
    }

    fn init(&mut self, ctx: &ServiceContext) -> Result<(), RuntimeError> {
        let mut payload = [0u8; 6];
        BigEndian::write_u32(&mut payload[0..4], ctx.handle.as_u32());
        BigEndian::write_u16(&mut payload[4..6], TEST_PORT);
        ctx.socket(CtrlCmd::Listen, &payload)
    }

    fn handle(&mut self, _ctx: &ServiceContext, _msg: Message) -> Disposition {
        Disposition::Consumed
    }
}

fn wait_until(mut poll: impl FnMut() -> bool, timeout: Duration) -> bool {
    let start = Instant::now();
    while start.elapsed() < timeout {
        if poll() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    false
}

#[test]
fn service_listen_command_accepts_a_real_connection() {
    let runtime = actor_rt::Runtime::new(Config::default());
    let reactor = Reactor::new(runtime.registry.clone()).unwrap();
    runtime.set_control_handle(reactor.control_handle());
    let reactor_join = std::thread::spawn(move || reactor.run());

    runtime.register_module("listener", |_args| Ok(Box::new(Listener)));
    let handle = runtime.launch("listener", "").unwrap();

    // The Listen control frame is processed asynchronously by the reactor
    // thread; poll for the port to come up instead of a fixed sleep.
    let connected = wait_until(
        || TcpStream::connect(("127.0.0.1", TEST_PORT)).is_ok(),
        Duration::from_secs(2),
    );
    assert!(connected, "listener never came up on port {TEST_PORT}");

    let service = runtime.registry.grab(handle).unwrap();
    let mailbox = runtime.registry.mailbox(&service).unwrap();
    let got = wait_until(|| !mailbox.is_empty(), Duration::from_secs(2));
    assert!(got, "service never received a socket event for the accepted connection");

    let msg = mailbox.pop().unwrap();
    assert_eq!(msg.kind, MessageKind::Socket);
    let payload = msg.payload.unwrap();
    assert_eq!(payload[0], SocketEventKind::Accept as u8);
    runtime.registry.release(service);

    runtime.control_handle().unwrap().send_frame(CtrlCmd::Exit, &[]).unwrap();
    reactor_join.join().unwrap();
}
