//! The text command channel (§6): a small line-oriented protocol services
//! use to ask the runtime for things that aren't plain message sends.

use crate::coordinator::Runtime;
use crate::error::RuntimeError;
use crate::handle::{parse_numeric_address, Handle};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatKind {
    MqLen,
    IsBlocked,
    Cpu,
    Time,
    Message,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Timeout(i64),
    Register(String),
    Query(String),
    Name(String, Handle),
    Exit,
    Kill(Handle),
    Launch(String, String),
    GetEnv(String),
    SetEnv(String, String),
    StartTime,
    Abort,
    Monitor(Option<Handle>),
    Stat(StatKind),
    LogOn(Handle),
    LogOff(Handle),
    Signal(Handle, i32),
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Timeout(t) => write!(f, "TIMEOUT {}", t),
            Command::Register(n) => write!(f, "REGISTER {}", n),
            Command::Query(n) => write!(f, "QUERY {}", n),
            Command::Name(n, h) => write!(f, "NAME {} :{:x}", n, h),
            Command::Exit => write!(f, "EXIT"),
            Command::Kill(h) => write!(f, "KILL :{:x}", h),
            Command::Launch(m, a) => write!(f, "LAUNCH {} {}", m, a),
            Command::GetEnv(k) => write!(f, "GET_ENV {}", k),
            Command::SetEnv(k, v) => write!(f, "SET_ENV {} {}", k, v),
            Command::StartTime => write!(f, "START_TIME"),
            Command::Abort => write!(f, "ABORT"),
            Command::Monitor(Some(h)) => write!(f, "MONITOR :{:x}", h),
            Command::Monitor(None) => write!(f, "MONITOR"),
            Command::Stat(k) => write!(f, "STAT {}", k),
            Command::LogOn(h) => write!(f, "LOG_ON :{:x}", h),
            Command::LogOff(h) => write!(f, "LOG_OFF :{:x}", h),
            Command::Signal(h, n) => write!(f, "SIGNAL :{:x} {}", h, n),
        }
    }
}

impl fmt::Display for StatKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StatKind::MqLen => "mqlen",
            StatKind::IsBlocked => "is_blocked",
            StatKind::Cpu => "cpu",
            StatKind::Time => "time",
            StatKind::Message => "message",
        };
        f.write_str(s)
    }
}

fn parse_handle_arg(arg: &str) -> Result<Handle, RuntimeError> {
    parse_numeric_address(arg).ok_or_else(|| RuntimeError::State("expected :handle argument"))
}

/// Parses one line of the command channel. Unrecognized verbs and malformed
/// arguments both surface as [`RuntimeError::State`], matching the way a
/// bad command only affects the caller, never the runtime.
pub fn parse_command(line: &str) -> Result<Command, RuntimeError> {
    let line = line.trim();
    let mut parts = line.splitn(2, char::is_whitespace);
    let verb = parts.next().unwrap_or("");
    let rest = parts.next().unwrap_or("").trim();

    match verb {
        "TIMEOUT" => {
            let ticks: i64 = rest
                .parse()
                .map_err(|_| RuntimeError::State("TIMEOUT requires an integer tick count"))?;
            Ok(Command::Timeout(ticks))
        }
        "REGISTER" => Ok(Command::Register(rest.to_string())),
        "QUERY" => Ok(Command::Query(rest.to_string())),
        "NAME" => {
            let mut it = rest.splitn(2, char::is_whitespace);
            let name = it
                .next()
                .filter(|s| !s.is_empty())
                .ok_or_else(|| RuntimeError::State("NAME requires a name and a handle"))?;
            let handle_str = it
                .next()
                .ok_or_else(|| RuntimeError::State("NAME requires a name and a handle"))?;
            Ok(Command::Name(name.to_string(), parse_handle_arg(handle_str.trim())?))
        }
        "EXIT" => Ok(Command::Exit),
        "KILL" => Ok(Command::Kill(parse_handle_arg(rest)?)),
        "LAUNCH" => {
            let mut it = rest.splitn(2, char::is_whitespace);
            let module = it
                .next()
                .filter(|s| !s.is_empty())
                .ok_or_else(|| RuntimeError::State("LAUNCH requires a module name"))?;
            let args = it.next().unwrap_or("").to_string();
            Ok(Command::Launch(module.to_string(), args))
        }
        "GET_ENV" => Ok(Command::GetEnv(rest.to_string())),
        "SET_ENV" => {
            let mut it = rest.splitn(2, char::is_whitespace);
            let key = it
                .next()
                .filter(|s| !s.is_empty())
                .ok_or_else(|| RuntimeError::State("SET_ENV requires a key and a value"))?;
            let value = it.next().unwrap_or("").to_string();
            Ok(Command::SetEnv(key.to_string(), value))
        }
        "START_TIME" => Ok(Command::StartTime),
        "ABORT" => Ok(Command::Abort),
        "MONITOR" => {
            if rest.is_empty() {
                Ok(Command::Monitor(None))
            } else {
                Ok(Command::Monitor(Some(parse_handle_arg(rest)?)))
            }
        }
        "STAT" => {
            let kind = match rest {
                "mqlen" => StatKind::MqLen,
                "is_blocked" => StatKind::IsBlocked,
                "cpu" => StatKind::Cpu,
                "time" => StatKind::Time,
                "message" => StatKind::Message,
                other => return Err(RuntimeError::State(unknown_stat_kind(other))),
            };
            Ok(Command::Stat(kind))
        }
        "LOG_ON" => Ok(Command::LogOn(parse_handle_arg(rest)?)),
        "LOG_OFF" => Ok(Command::LogOff(parse_handle_arg(rest)?)),
        "SIGNAL" => {
            let mut it = rest.splitn(2, char::is_whitespace);
            let handle = parse_handle_arg(it.next().unwrap_or(""))?;
            let value: i32 = it.next().unwrap_or("0").trim().parse().unwrap_or(0);
            Ok(Command::Signal(handle, value))
        }
        _ => Err(RuntimeError::State("unrecognized command verb")),
    }
}

fn unknown_stat_kind(_s: &str) -> &'static str {
    "STAT requires one of mqlen|is_blocked|cpu|time|message"
}

/// Executes a parsed command on behalf of `caller` and renders the result
/// into the per-service scratch buffer as text, matching the channel's
/// text-in-text-out contract.
pub fn execute(cmd: Command, caller: Handle, runtime: &Runtime) -> String {
    match cmd {
        Command::Timeout(ticks) => {
            let session = runtime.registry.grab(caller).map(|s| s.alloc_session());
            if let Some(session) = session {
                runtime.timer.timeout(caller, ticks, session, &runtime.registry);
                session.as_u32().to_string()
            } else {
                String::new()
            }
        }
        Command::Register(name) => {
            runtime.registry.set_name(&name, caller);
            name
        }
        Command::Query(name) => runtime
            .registry
            .find_by_name(&name)
            .map(|h| format!(":{:x}", h))
            .unwrap_or_default(),
        Command::Name(name, handle) => {
            runtime.registry.set_name(&name, handle);
            String::new()
        }
        Command::Exit => {
            runtime.registry.retire(caller);
            String::new()
        }
        Command::Kill(handle) => {
            runtime.registry.retire(handle);
            String::new()
        }
        Command::Launch(module, args) => match runtime.launch(&module, &args) {
            Ok(handle) => format!(":{:x}", handle),
            Err(_) => String::new(),
        },
        Command::GetEnv(key) => runtime.env.read().get(&key).cloned().unwrap_or_default(),
        Command::SetEnv(key, value) => {
            runtime.env.write().insert(key, value);
            String::new()
        }
        Command::StartTime => runtime.clock.start_seconds().to_string(),
        Command::Abort => {
            runtime.registry.retire_all();
            String::new()
        }
        Command::Monitor(None) => runtime.monitor_handle().map(|h| format!(":{:x}", h)).unwrap_or_default(),
        Command::Monitor(Some(handle)) => {
            runtime.set_monitor_handle(handle);
            String::new()
        }
        Command::Stat(kind) => {
            let Some(service) = runtime.registry.grab(caller) else {
                return String::new();
            };
            let result = match kind {
                StatKind::MqLen => runtime
                    .registry
                    .mailbox(&service)
                    .map(|m| m.len())
                    .unwrap_or(0)
                    .to_string(),
                StatKind::IsBlocked => (service.is_blocked() as u8).to_string(),
                StatKind::Cpu => service.cpu.total_micros().to_string(),
                StatKind::Time => runtime.clock.now_ticks().to_string(),
                StatKind::Message => service.message_count.load(std::sync::atomic::Ordering::Relaxed).to_string(),
            };
            runtime.registry.release(service);
            result
        }
        Command::LogOn(handle) => {
            if let Some(service) = runtime.registry.grab(handle) {
                service.logging.store(true, std::sync::atomic::Ordering::SeqCst);
                runtime.registry.release(service);
            }
            String::new()
        }
        Command::LogOff(handle) => {
            if let Some(service) = runtime.registry.grab(handle) {
                service.logging.store(false, std::sync::atomic::Ordering::SeqCst);
                runtime.registry.release(service);
            }
            String::new()
        }
        Command::Signal(handle, value) => {
            if let Some(service) = runtime.registry.grab(handle) {
                service.module.lock().signal(value);
                runtime.registry.release(service);
            }
            String::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_timeout() {
        assert_eq!(parse_command("TIMEOUT 50").unwrap(), Command::Timeout(50));
    }

    #[test]
    fn parses_name_with_numeric_handle() {
        let cmd = parse_command("NAME foo :1").unwrap();
        assert_eq!(cmd, Command::Name("foo".to_string(), Handle::new(1).unwrap()));
    }

    #[test]
    fn parses_stat_kinds() {
        assert_eq!(parse_command("STAT mqlen").unwrap(), Command::Stat(StatKind::MqLen));
        assert!(parse_command("STAT nonsense").is_err());
    }

    #[test]
    fn parses_signal_with_default_value() {
        let cmd = parse_command("SIGNAL :1").unwrap();
        assert_eq!(cmd, Command::Signal(Handle::new(1).unwrap(), 0));
    }

    #[test]
    fn unrecognized_verb_errors() {
        assert!(parse_command("BOGUS foo").is_err());
    }

    #[test]
    fn display_round_trips_verb() {
        let cmd = Command::Register("echo".to_string());
        assert_eq!(cmd.to_string(), "REGISTER echo");
    }

    struct Noop;
    impl crate::service::ServiceModule for Noop {
        fn create(_args: &str) -> Result<Box<Self>, RuntimeError> {
            Ok(Box::new(Noop))
        }
        fn handle(&mut self, _ctx: &crate::service::ServiceContext, _msg: crate::message::Message) -> crate::service::Disposition {
            crate::service::Disposition::Consumed
        }
    }

    #[test]
    fn monitor_sets_then_reports_the_registered_handle() {
        let runtime = Runtime::new(crate::config::Config::default());
        let watcher = runtime.registry.insert(Box::new(Noop), false);
        let caller = runtime.registry.insert(Box::new(Noop), false);

        assert_eq!(execute(Command::Monitor(None), caller, &runtime), "");
        execute(Command::Monitor(Some(watcher)), caller, &runtime);
        assert_eq!(execute(Command::Monitor(None), caller, &runtime), format!(":{:x}", watcher));
    }

    #[test]
    fn log_on_and_off_toggle_the_services_logging_flag() {
        let runtime = Runtime::new(crate::config::Config::default());
        let handle = runtime.registry.insert(Box::new(Noop), false);

        execute(Command::LogOn(handle), handle, &runtime);
        let service = runtime.registry.grab(handle).unwrap();
        assert!(service.is_logging());
        runtime.registry.release(service);

        execute(Command::LogOff(handle), handle, &runtime);
        let service = runtime.registry.grab(handle).unwrap();
        assert!(!service.is_logging());
        runtime.registry.release(service);
    }
}
