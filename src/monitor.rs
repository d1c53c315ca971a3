//! The service monitor thread (§4.2): wakes every 5s, and for each worker
//! whose heartbeat hasn't moved since the last check, declares its
//! in-flight destination service blocked.

use crate::coordinator::Runtime;
use crate::handle::Handle;
use crate::scheduler::Heartbeat;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

const CHECK_INTERVAL: Duration = Duration::from_secs(5);
const SLEEP_QUANTUM: Duration = Duration::from_secs(1);

pub fn monitor_loop(runtime: Arc<Runtime>, heartbeats: Vec<Arc<Heartbeat>>, quit: Arc<AtomicBool>) {
    let mut last_versions: Vec<u64> = heartbeats.iter().map(|_| 0).collect();
    let mut waited = Duration::ZERO;
    while !quit.load(Ordering::SeqCst) {
        std::thread::sleep(SLEEP_QUANTUM);
        waited += SLEEP_QUANTUM;
        if waited < CHECK_INTERVAL {
            continue;
        }
        waited = Duration::ZERO;

        for (hb, last) in heartbeats.iter().zip(last_versions.iter_mut()) {
            let version = hb.version.load(Ordering::SeqCst);
            let dest = hb.dest.load(Ordering::SeqCst);
            if version == *last && dest != 0 {
                if let Some(handle) = Handle::new(dest) {
                    declare_blocked(&runtime, handle);
                }
            } else {
                *last = version;
            }
        }
    }
}

fn declare_blocked(runtime: &Runtime, handle: Handle) {
    if let Some(service) = runtime.registry.grab(handle) {
        service.blocked.store(true, Ordering::SeqCst);
        log::warn!("service {handle} appears blocked in its callback");
        runtime.registry.release(service);
        notify_monitor(runtime, handle);
    }
}

/// Tells the service registered via `MONITOR :handle` (if any) which
/// service was just declared blocked, as a four-byte big-endian handle.
fn notify_monitor(runtime: &Runtime, blocked: Handle) {
    let Some(monitor) = runtime.monitor_handle() else { return };
    let payload = blocked.as_u32().to_be_bytes();
    let _ = runtime.send(
        None,
        monitor,
        crate::message::MessageKind::Error,
        None,
        Some(Box::new(payload)),
        crate::message::SendFlags::empty(),
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unmoved_heartbeat_with_nonzero_dest_is_detected() {
        let hb = Heartbeat::default();
        hb.enter(Handle::new(1), Handle::new(2).unwrap());
        let version_before = hb.version.load(Ordering::SeqCst);
        // Simulate a second check with no further enter/leave: version is
        // unchanged and dest is still nonzero, so the monitor would flag it.
        assert_eq!(hb.version.load(Ordering::SeqCst), version_before);
        assert_ne!(hb.dest.load(Ordering::SeqCst), 0);
    }
}
