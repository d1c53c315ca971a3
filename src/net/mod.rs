//! The socket reactor subsystem (§4.3): poller backends, the fixed slot
//! table, UDP peer-address framing, and the reactor's I/O thread.

pub mod poller;
#[cfg(target_os = "linux")]
pub mod poller_epoll;
#[cfg(not(target_os = "linux"))]
pub mod poller_kqueue;
pub mod reactor;
pub mod slot;
pub mod udp_addr;

pub use poller::{PollEvent, Poller};
pub use reactor::{ControlHandle, CtrlCmd, Reactor, SocketEventKind};
pub use slot::{Protocol, SlotTable, SocketStatus};
