/*!
A multi-threaded actor runtime: a fixed pool of worker threads multiplexes
a large population of isolated, message-passing services, backed by a
service registry, a hierarchical timing wheel, and a non-blocking socket
reactor.

Services are isolated units of private state plus a single callback
([`service::ServiceModule`]); they never share memory and communicate only
by sending typed messages through the [`registry::Registry`]. A
[`coordinator::Coordinator`] brings the whole thing up: N worker threads
plus a monitor, timer and reactor thread, and blocks until the live-service
count decays to zero.
*/

pub mod clock;
pub mod command;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod handle;
pub mod message;
pub mod monitor;
pub mod net;
pub mod registry;
pub mod scheduler;
pub mod service;
pub mod timer;

pub use coordinator::{Coordinator, Runtime};
pub use error::RuntimeError;
pub use handle::Handle;
pub use message::{Message, MessageKind, SendFlags, Session};
pub use service::{Disposition, ServiceContext, ServiceModule};
