//! The service-callback contract (§6) and the runtime-owned bookkeeping
//! that wraps one service (§3).

use crate::command::Command;
use crate::error::RuntimeError;
use crate::handle::Handle;
use crate::message::Message;
use parking_lot::Mutex;
use ready_queue::MailboxId;
use std::num::Wrapping;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Instant;

/// What a service's callback does with the payload it was handed: mirrors
/// the §6 "0 vs non-zero" return convention as a typed enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// The runtime owns the payload buffer afterward (frees it).
    Consumed,
    /// The callback has reserved the payload buffer for itself.
    Reserved,
}

/// Context handed to a service's callback: its own handle and a way to talk
/// back to the runtime (send, set a timeout, run a command) without each
/// service holding its own copy of the whole [`crate::coordinator::Runtime`].
pub struct ServiceContext<'a> {
    pub handle: Handle,
    runtime: &'a crate::coordinator::Runtime,
}

impl<'a> ServiceContext<'a> {
    pub fn new(handle: Handle, runtime: &'a crate::coordinator::Runtime) -> Self {
        ServiceContext { handle, runtime }
    }

    pub fn send(
        &self,
        dst: Handle,
        kind: crate::message::MessageKind,
        session: Option<crate::message::Session>,
        payload: Option<Box<[u8]>>,
        flags: crate::message::SendFlags,
    ) -> Result<Option<crate::message::Session>, RuntimeError> {
        self.runtime
            .send(Some(self.handle), dst, kind, session, payload, flags)
    }

    pub fn timeout(&self, ticks: i64, session: crate::message::Session) {
        self.runtime.timer.timeout(self.handle, ticks, session, &self.runtime.registry)
    }

    pub fn run_command(&self, cmd: Command) -> String {
        crate::command::execute(cmd, self.handle, self.runtime)
    }

    /// Issues a control-pipe command to the socket reactor (§4.3): `listen`,
    /// `connect`, `send`, `close` and the rest never touch an OS socket on
    /// the calling thread, only write a framed command for the reactor
    /// thread to execute.
    pub fn socket(&self, cmd: crate::net::reactor::CtrlCmd, payload: &[u8]) -> Result<(), RuntimeError> {
        let ctrl = self
            .runtime
            .control_handle()
            .ok_or(RuntimeError::State("socket reactor is not running"))?;
        ctrl.send_frame(cmd, payload)
    }
}

/// A user-supplied service implementation: private state plus the four
/// lifecycle hooks. Analogous to skynet's dynamically-loaded module, but
/// realized here as a trait object registered at process startup (§4.5).
pub trait ServiceModule: Send {
    /// Construct the service's private state from its launch arguments.
    fn create(args: &str) -> Result<Box<Self>, RuntimeError>
    where
        Self: Sized;

    /// Runs after the service is registered but before any message is
    /// dispatched to it. Failure here unregisters the service atomically.
    fn init(&mut self, ctx: &ServiceContext) -> Result<(), RuntimeError> {
        let _ = ctx;
        Ok(())
    }

    /// Handle one message. Runs to completion on whichever worker drained
    /// it; never re-entered concurrently for the same service.
    fn handle(&mut self, ctx: &ServiceContext, msg: Message) -> Disposition;

    /// Out-of-band signal delivered by `SIGNAL :handle [n]`.
    fn signal(&mut self, _value: i32) {}
}

/// Object-safe wrapper so the registry can hold a dynamically typed module
/// without requiring `create` (which has no `self`) in the trait object.
pub trait DynServiceModule: Send {
    fn init(&mut self, ctx: &ServiceContext) -> Result<(), RuntimeError>;
    fn handle(&mut self, ctx: &ServiceContext, msg: Message) -> Disposition;
    fn signal(&mut self, value: i32);
}

impl<T: ServiceModule> DynServiceModule for T {
    fn init(&mut self, ctx: &ServiceContext) -> Result<(), RuntimeError> {
        ServiceModule::init(self, ctx)
    }
    fn handle(&mut self, ctx: &ServiceContext, msg: Message) -> Disposition {
        ServiceModule::handle(self, ctx, msg)
    }
    fn signal(&mut self, value: i32) {
        ServiceModule::signal(self, value)
    }
}

/// CPU-time accounting: start timestamp of the in-progress callback (if
/// any) plus a running total. Optional per §3 and the `profile` config key.
#[derive(Default)]
pub struct CpuAccumulator {
    start: Mutex<Option<Instant>>,
    total_micros: AtomicU64,
}

impl CpuAccumulator {
    pub fn enter(&self) {
        *self.start.lock() = Some(Instant::now());
    }

    pub fn leave(&self) {
        if let Some(start) = self.start.lock().take() {
            self.total_micros
                .fetch_add(start.elapsed().as_micros() as u64, Ordering::Relaxed);
        }
    }

    pub fn total_micros(&self) -> u64 {
        self.total_micros.load(Ordering::Relaxed)
    }
}

/// Runtime-owned bookkeeping for one service: the module, its mailbox, and
/// the fields listed in §3 that the registry and scheduler need directly
/// (as opposed to the module's own private state).
pub struct Service {
    pub handle: Handle,
    pub mailbox_id: MailboxId,
    pub module: Mutex<Box<dyn DynServiceModule>>,
    pub initialized: AtomicBool,
    pub blocked: AtomicBool,
    /// Toggled by `LOG_ON`/`LOG_OFF` (§6); §6.2's BuiltinLogger-style
    /// callers can consult this to decide whether to mirror this service's
    /// traffic to a log, mirroring the original's per-service `log_fd_`.
    pub logging: AtomicBool,
    pub message_count: AtomicU64,
    pub cpu: CpuAccumulator,
    pub profiling: bool,
    next_session: Mutex<Wrapping<u32>>,
}

impl Service {
    pub fn new(handle: Handle, mailbox_id: MailboxId, module: Box<dyn DynServiceModule>, profiling: bool) -> Self {
        Service {
            handle,
            mailbox_id,
            module: Mutex::new(module),
            initialized: AtomicBool::new(false),
            blocked: AtomicBool::new(false),
            logging: AtomicBool::new(false),
            message_count: AtomicU64::new(0),
            cpu: CpuAccumulator::default(),
            profiling,
            next_session: Mutex::new(Wrapping(1)),
        }
    }

    /// Allocates the next positive session id for this service, wrapping
    /// back to 1 (never 0) on overflow, as §3 specifies.
    pub fn alloc_session(&self) -> crate::message::Session {
        let mut guard = self.next_session.lock();
        let current = guard.0;
        let mut next = *guard + Wrapping(1);
        if next.0 == 0 {
            next = Wrapping(1);
        }
        *guard = next;
        crate::message::Session::new(current).expect("session counter never yields 0")
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    pub fn is_blocked(&self) -> bool {
        self.blocked.load(Ordering::SeqCst)
    }

    pub fn is_logging(&self) -> bool {
        self.logging.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_counter_wraps_past_zero_to_one() {
        let svc_next = Mutex::new(Wrapping(u32::MAX));
        let mut guard = svc_next.lock();
        let current = guard.0;
        let mut next = *guard + Wrapping(1);
        if next.0 == 0 {
            next = Wrapping(1);
        }
        *guard = next;
        assert_eq!(current, u32::MAX);
        assert_eq!(guard.0, 1);
    }
}
