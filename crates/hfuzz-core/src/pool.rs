//! Thread pool & lifecycle (§4.6, §5): spawns the worker pool, tracks the
//! global mutation cap, and drives the signal-aware main wait loop.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU64, Ordering};
use std::sync::{Condvar, Mutex};
use std::thread;
use std::time::Duration;

use tracing::info;

/// Lock-free counters shared across every worker and the main thread (§3
/// Global counters). No lock is needed; readers tolerate eventual
/// consistency.
#[derive(Debug, Default)]
pub struct GlobalCounters {
    pub mutations_done: AtomicU64,
    pub crashes: AtomicU64,
    pub unique_crashes: AtomicU64,
    pub verified_crashes: AtomicU64,
    pub blacklisted_crashes: AtomicU64,
    pub timeouts: AtomicU64,
    pub workers_finished: AtomicU64,
    /// Stack hashes of crashes already surfaced, for `save_unique`
    /// deduplication (§3: "the stack hash for uniqueness deduplication").
    seen_stack_hashes: Mutex<HashSet<u64>>,
}

impl GlobalCounters {
    /// Records `stack_hash` as seen; returns `true` the first time a given
    /// hash is observed, `false` on every subsequent occurrence.
    pub fn record_stack_hash(&self, stack_hash: u64) -> bool {
        self.seen_stack_hashes
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(stack_hash)
    }

    pub fn snapshot_line(&self) -> String {
        format!(
            "mutations={} crashes={} unique={} verified={} blacklisted={} timeouts={}",
            self.mutations_done.load(Ordering::Relaxed),
            self.crashes.load(Ordering::Relaxed),
            self.unique_crashes.load(Ordering::Relaxed),
            self.verified_crashes.load(Ordering::Relaxed),
            self.blacklisted_crashes.load(Ordering::Relaxed),
            self.timeouts.load(Ordering::Relaxed),
        )
    }
}

/// Process-wide flag set by the (async-signal-safe) signal handler. The only
/// work the handler itself performs is an atomic store; everything else
/// happens on the main thread once its wait returns (§9 signal-handler
/// constraints).
static SIGNAL_RECEIVED: AtomicI32 = AtomicI32::new(0);

extern "C" fn handle_signal(signum: i32) {
    SIGNAL_RECEIVED.store(signum, Ordering::SeqCst);
}

/// Installs handlers for SIGINT/SIGTERM/SIGQUIT that only set
/// [`SIGNAL_RECEIVED`]. Must be called once, before the worker pool starts.
pub fn install_signal_handlers() -> nix::Result<()> {
    use nix::sys::signal::{SaFlags, SigAction, SigHandler, SigSet, Signal, sigaction};

    let action = SigAction::new(
        SigHandler::Handler(handle_signal),
        SaFlags::empty(),
        SigSet::empty(),
    );
    unsafe {
        sigaction(Signal::SIGINT, &action)?;
        sigaction(Signal::SIGTERM, &action)?;
        sigaction(Signal::SIGQUIT, &action)?;
    }
    Ok(())
}

/// Returns the signal number observed by the handler, if any, since the last
/// check. Does not clear the flag (termination is intended to be sticky).
pub fn signal_received() -> Option<i32> {
    match SIGNAL_RECEIVED.load(Ordering::SeqCst) {
        0 => None,
        signum => Some(signum),
    }
}

/// Coordinates worker completion with the main thread, standing in for the
/// source's self-directed `SIGALRM` wakeup (§4.6): a worker that hits the
/// mutation cap increments `workers_finished` and notifies this condvar
/// instead of signalling its own process.
#[derive(Debug, Default)]
pub struct WakeGate {
    mutex: Mutex<()>,
    condvar: Condvar,
}

impl WakeGate {
    pub fn notify(&self) {
        self.condvar.notify_all();
    }

    /// Waits up to `tick` for a notification; always returns (used so the
    /// main thread can redraw status even with no workers finishing).
    pub fn wait_tick(&self, tick: Duration) {
        let guard = self.mutex.lock().unwrap_or_else(|e| e.into_inner());
        let _ = self.condvar.wait_timeout(guard, tick).unwrap();
    }
}

/// Drives the main wait loop: spawns `threads_max` workers running `worker`,
/// then blocks (polling on a tick so status can be logged) until every
/// worker has finished or a termination signal arrives.
///
/// `worker` receives the zero-based worker index and must loop internally,
/// checking `mutations_max` against `counters.mutations_done` itself and
/// returning once its iteration is done or the cap is reached.
pub fn run_pool<F>(threads_max: usize, status_tick: Duration, counters: Arc<GlobalCounters>, worker: F)
where
    F: Fn(usize, &AtomicBool, &WakeGate) + Send + Sync + 'static,
{
    let worker = Arc::new(worker);
    let gate = Arc::new(WakeGate::default());
    let stop = Arc::new(AtomicBool::new(false));

    let handles: Vec<_> = (0..threads_max)
        .map(|idx| {
            let worker = Arc::clone(&worker);
            let gate = Arc::clone(&gate);
            let stop = Arc::clone(&stop);
            let counters = Arc::clone(&counters);
            thread::Builder::new()
                .name(format!("hfuzz-worker-{idx}"))
                .spawn(move || {
                    worker(idx, &stop, &gate);
                    counters.workers_finished.fetch_add(1, Ordering::AcqRel);
                    gate.notify();
                })
                .expect("failed to spawn worker thread")
        })
        .collect();

    loop {
        if let Some(signum) = signal_received() {
            info!(signum, "termination signal received, stopping workers");
            stop.store(true, Ordering::SeqCst);
            break;
        }
        if counters.workers_finished.load(Ordering::Acquire) as usize >= threads_max {
            break;
        }
        gate.wait_tick(status_tick);
        info!(status = %counters.snapshot_line(), "status");
    }

    for handle in handles {
        let _ = handle.join();
    }
    info!(status = %counters.snapshot_line(), "fuzzing run complete");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_stack_hash_is_true_only_on_first_occurrence() {
        let counters = GlobalCounters::default();
        assert!(counters.record_stack_hash(0xdead));
        assert!(!counters.record_stack_hash(0xdead));
        assert!(counters.record_stack_hash(0xbeef));
    }
}
