//! The runtime-wide shared state (§4.5) and the coordinator that brings
//! the worker pool, monitor, timer and reactor threads up and down around
//! it.

use crate::clock::Clock;
use crate::config::Config;
use crate::error::RuntimeError;
use crate::handle::Handle;
use crate::message::{Message, MessageKind, SendFlags, Session};
use crate::monitor;
use crate::net::reactor::{ControlHandle, Reactor};
use crate::registry::Registry;
use crate::scheduler;
use crate::service::{Disposition, DynServiceModule, ServiceContext, ServiceModule};
use crate::timer::TimingWheel;
use nix::sys::signal::{sigaction, SaFlags, SigAction, SigHandler, SigSet, Signal};
use nix::unistd::{pipe, read as nix_read, write as nix_write};
use parking_lot::{Mutex, RwLock};
use ready_queue::ReadyQueue;
use std::collections::HashMap;
use std::io::Write;
use std::os::unix::io::AsRawFd;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

type ModuleFactory = Box<dyn Fn(&str) -> Result<Box<dyn DynServiceModule>, RuntimeError> + Send + Sync>;

/// Everything a running service needs to reach the rest of the system: the
/// registry, its backing ready-queue, the clock, the timing wheel,
/// configuration, the per-key environment table, and the module table
/// `LAUNCH` consults. Process-wide for the lifetime of one [`Coordinator`]
/// run — see the Design Notes on global mutable state.
pub struct Runtime {
    pub registry: Arc<Registry>,
    pub ready_queue: Arc<ReadyQueue<Message>>,
    pub clock: Clock,
    pub timer: TimingWheel,
    pub config: Config,
    pub env: RwLock<HashMap<String, String>>,
    modules: RwLock<HashMap<String, ModuleFactory>>,
    reactor_ctrl: RwLock<Option<ControlHandle>>,
    /// The service registered via `MONITOR :handle` (§6) to be told about
    /// services the monitor thread declares blocked; `None` until set.
    monitor_handle: RwLock<Option<Handle>>,
    quit: AtomicBool,
}

impl Runtime {
    pub fn new(config: Config) -> Arc<Self> {
        let ready_queue = Arc::new(ReadyQueue::new());
        let registry = Arc::new(Registry::new(ready_queue.clone()));
        Arc::new(Runtime {
            registry,
            ready_queue,
            clock: Clock::new(),
            timer: TimingWheel::new(),
            config,
            env: RwLock::new(HashMap::new()),
            modules: RwLock::new(HashMap::new()),
            reactor_ctrl: RwLock::new(None),
            monitor_handle: RwLock::new(None),
            quit: AtomicBool::new(false),
        })
    }

    /// Registers a service module under `name` so `LAUNCH name args` (and
    /// bootstrap) can construct it.
    pub fn register_module<F>(&self, name: impl Into<String>, factory: F)
    where
        F: Fn(&str) -> Result<Box<dyn DynServiceModule>, RuntimeError> + Send + Sync + 'static,
    {
        self.modules.write().insert(name.into(), Box::new(factory));
    }

    pub fn control_handle(&self) -> Option<ControlHandle> {
        self.reactor_ctrl.read().clone()
    }

    /// Attaches a running reactor's control handle so `ServiceContext::socket`
    /// and the coordinator's shutdown path can reach it. Normally called
    /// once by [`Coordinator::run`]; exposed so tests and alternate bring-up
    /// code can wire a reactor up without the full coordinator.
    pub fn set_control_handle(&self, handle: ControlHandle) {
        *self.reactor_ctrl.write() = Some(handle);
    }

    pub fn monitor_handle(&self) -> Option<Handle> {
        *self.monitor_handle.read()
    }

    pub fn set_monitor_handle(&self, handle: Handle) {
        *self.monitor_handle.write() = Some(handle);
    }

    pub fn send(
        &self,
        src: Option<Handle>,
        dst: Handle,
        kind: MessageKind,
        session: Option<Session>,
        payload: Option<Box<[u8]>>,
        flags: SendFlags,
    ) -> Result<Option<Session>, RuntimeError> {
        self.registry.send(src, dst, kind, session, payload, flags)
    }

    /// Constructs and registers a service of module `name`, running its
    /// init-hook before returning the handle. On init failure the
    /// partially-constructed service is unregistered atomically, matching
    /// the registry's `create` contract.
    pub fn launch(&self, name: &str, args: &str) -> Result<Handle, RuntimeError> {
        let module = {
            let modules = self.modules.read();
            let factory = modules
                .get(name)
                .ok_or_else(|| RuntimeError::Fatal(format!("unknown module: {name}")))?;
            factory(args)?
        };
        let handle = self.registry.insert(module, self.config.profile);
        let ctx = ServiceContext::new(handle, self);
        let service = self
            .registry
            .grab(handle)
            .ok_or_else(|| RuntimeError::Fatal("service vanished immediately after insert".into()))?;
        let init_result = service.module.lock().init(&ctx);
        match init_result {
            Ok(()) => {
                self.registry.mark_initialized(handle);
                self.registry.release(service);
                Ok(handle)
            }
            Err(e) => {
                self.registry.release(service);
                self.registry.abort_construction(handle);
                Err(e)
            }
        }
    }

    pub fn live_count(&self) -> usize {
        self.registry.count()
    }

    pub fn request_quit(&self) {
        self.quit.store(true, Ordering::SeqCst);
    }

    pub fn should_quit(&self) -> bool {
        self.quit.load(Ordering::SeqCst)
    }
}

/// The builtin "logger" service. Writes to `path` if configured, falling
/// back to the `log` facade otherwise; a `SIGNAL :handle 1` (what the
/// coordinator's SIGHUP handler sends) closes and reopens the file so an
/// external log-rotation tool can rename the old one out from under it.
struct BuiltinLogger {
    path: Option<String>,
    file: Mutex<Option<std::fs::File>>,
}

impl BuiltinLogger {
    fn new(path: Option<String>) -> Self {
        BuiltinLogger {
            path,
            file: Mutex::new(None),
        }
    }

    fn reopen(&self) {
        let Some(path) = &self.path else { return };
        let file = std::fs::OpenOptions::new().create(true).append(true).open(path).ok();
        *self.file.lock() = file;
    }

    fn write_line(&self, line: &str) {
        let mut guard = self.file.lock();
        match guard.as_mut() {
            Some(file) => {
                let _ = writeln!(file, "{line}");
            }
            None => log::info!("{line}"),
        }
    }
}

impl ServiceModule for BuiltinLogger {
    fn create(_args: &str) -> Result<Box<Self>, RuntimeError> {
        Ok(Box::new(BuiltinLogger::new(None)))
    }

    fn init(&mut self, _ctx: &ServiceContext) -> Result<(), RuntimeError> {
        self.reopen();
        Ok(())
    }

    fn handle(&mut self, _ctx: &ServiceContext, msg: Message) -> Disposition {
        if let Some(payload) = &msg.payload {
            self.write_line(&String::from_utf8_lossy(payload));
        }
        Disposition::Consumed
    }

    fn signal(&mut self, value: i32) {
        if value == 1 {
            self.reopen();
        }
    }
}

/// Write end of the self-pipe a `SIGHUP` handler wakes; `-1` while no
/// coordinator is running. Async-signal-safe: the handler only stores to
/// and loads from this atomic and calls `write(2)`.
static SIGHUP_WRITE_FD: AtomicI32 = AtomicI32::new(-1);

extern "C" fn deliver_sighup(_signo: i32) {
    let fd = SIGHUP_WRITE_FD.load(Ordering::SeqCst);
    if fd >= 0 {
        let _ = nix_write(unsafe { std::os::fd::BorrowedFd::borrow_raw(fd) }, &[1]);
    }
}

/// Orchestrates the N+3 long-lived threads described in §5: owns the
/// [`Runtime`] and everything needed to bring them up and join them back
/// down on shutdown.
pub struct Coordinator {
    runtime: Arc<Runtime>,
}

impl Coordinator {
    pub fn new(config: Config) -> Self {
        Coordinator {
            runtime: Runtime::new(config),
        }
    }

    pub fn runtime(&self) -> &Arc<Runtime> {
        &self.runtime
    }

    /// Registers a module factory before `run` constructs the bootstrap
    /// service. Must be called before [`Coordinator::run`].
    pub fn register_module<F>(&self, name: impl Into<String>, factory: F)
    where
        F: Fn(&str) -> Result<Box<dyn DynServiceModule>, RuntimeError> + Send + Sync + 'static,
    {
        self.runtime.register_module(name, factory);
    }

    /// Brings up the builtin logger, the bootstrap service, and the N+3
    /// auxiliary/worker threads, then blocks until live-service count
    /// decays to zero, shutting everything down in the order §4.5
    /// specifies.
    pub fn run(&self) -> Result<i32, RuntimeError> {
        let log_file = self.runtime.config.log_file.clone();
        self.runtime
            .register_module("logger", move |_args| Ok(Box::new(BuiltinLogger::new(log_file.clone()))));
        let logger_handle = self.runtime.launch("logger", "")?;
        self.runtime.registry.set_name(&self.runtime.config.log_service, logger_handle);

        let reactor = Reactor::new(self.runtime.registry.clone())
            .map_err(|e| RuntimeError::Fatal(format!("reactor init failed: {e}")))?;
        self.runtime.set_control_handle(reactor.control_handle());
        let reactor_join = std::thread::spawn(move || reactor.run());

        let (sighup_read, sighup_write) = pipe().map_err(|e| RuntimeError::Fatal(format!("signal pipe failed: {e}")))?;
        SIGHUP_WRITE_FD.store(sighup_write.as_raw_fd(), Ordering::SeqCst);
        unsafe {
            sigaction(
                Signal::SIGHUP,
                &SigAction::new(SigHandler::Handler(deliver_sighup), SaFlags::SA_RESTART, SigSet::empty()),
            )
            .map_err(|e| RuntimeError::Fatal(format!("sigaction(SIGHUP) failed: {e}")))?;
        }
        let sighup_registry = self.runtime.registry.clone();
        let sighup_log_service = self.runtime.config.log_service.clone();
        let sighup_join = std::thread::spawn(move || {
            let mut buf = [0u8; 1];
            loop {
                match nix_read(sighup_read.as_raw_fd(), &mut buf) {
                    Ok(0) | Err(_) => break,
                    Ok(_) => {
                        if let Some(handle) = sighup_registry.find_by_name(&sighup_log_service) {
                            if let Some(service) = sighup_registry.grab(handle) {
                                service.module.lock().signal(1);
                                sighup_registry.release(service);
                            }
                        }
                    }
                }
            }
        });

        let bootstrap_line = self.runtime.config.bootstrap.clone();
        let mut parts = bootstrap_line.splitn(2, char::is_whitespace);
        let module = parts.next().unwrap_or("").to_string();
        let args = parts.next().unwrap_or("").to_string();
        self.runtime
            .launch(&module, &args)
            .map_err(|e| RuntimeError::Fatal(format!("bootstrap failed: {e}")))?;

        let quit = Arc::new(AtomicBool::new(false));
        let n = self.runtime.config.thread.max(1);
        let heartbeats: Vec<Arc<scheduler::Heartbeat>> =
            (0..n).map(|_| Arc::new(scheduler::Heartbeat::default())).collect();

        let mut workers: Vec<JoinHandle<()>> = Vec::with_capacity(n);
        for (i, hb) in heartbeats.iter().enumerate() {
            let rt = self.runtime.clone();
            let hb = hb.clone();
            let q = quit.clone();
            let weight = scheduler::weight_for(i, n);
            workers.push(std::thread::spawn(move || scheduler::worker_loop(rt, hb, q, weight)));
        }

        let monitor_rt = self.runtime.clone();
        let monitor_hbs = heartbeats.clone();
        let monitor_quit = quit.clone();
        let monitor_join = std::thread::spawn(move || monitor::monitor_loop(monitor_rt, monitor_hbs, monitor_quit));

        let timer_rt = self.runtime.clone();
        let timer_quit = quit.clone();
        let timer_reactor_ctrl = self.runtime.control_handle();
        let timer_join = std::thread::spawn(move || {
            let mut last_wall = timer_rt.clock.wall_ticks();
            loop {
                std::thread::sleep(Duration::from_micros(2500));
                let wall = timer_rt.clock.wall_ticks();
                let steps = wall.saturating_sub(last_wall);
                last_wall = wall;
                if steps > 0 {
                    for _ in 0..steps {
                        timer_rt.clock.advance();
                    }
                    timer_rt.timer.advance(steps, &timer_rt.registry);
                }
                if timer_rt.live_count() == 0 || timer_rt.should_quit() {
                    if let Some(ctrl) = &timer_reactor_ctrl {
                        let _ = ctrl.exit();
                    }
                    timer_quit.store(true, Ordering::SeqCst);
                    timer_rt.ready_queue.shutdown();
                    break;
                }
            }
        });

        let _ = timer_join.join();
        for w in workers {
            let _ = w.join();
        }
        let _ = monitor_join.join();
        let _ = reactor_join.join();

        SIGHUP_WRITE_FD.store(-1, Ordering::SeqCst);
        drop(sighup_write); // closes the write end, waking the reader thread with EOF
        let _ = sighup_join.join();

        Ok(0)
    }
}
