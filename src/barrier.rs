//! Multi-phase rendezvous barrier.
//!
//! One benchmark run passes every worker through five gates in order:
//! Ready, StartupComplete, Start (release), Stop (drain), End (drain).
//! All gate state lives behind a single mutex with one condition variable
//! per transition; the lock is held only across counter updates and
//! signaling, never across workload calls.
//!
//! Workers signal gates with [`PhaseBarrier::arrive`] (never blocks) and
//! block only at the Start gate via [`PhaseBarrier::wait_for_release`].
//! The coordinator blocks in [`PhaseBarrier::await_all`] and opens the
//! Start gate for everyone at once with [`PhaseBarrier::release`].
//!
//! A worker that never signals a gate will stall the coordinator
//! indefinitely; there is no timeout. That is an accepted limitation for a
//! controlled benchmark environment, not a condition this type recovers
//! from.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard};
use thiserror::Error;
use tracing::warn;

/// Signal-only checkpoints in the run lifecycle.
///
/// The Start transition is not a counted gate: it is the
/// [`PhaseBarrier::release`] / [`PhaseBarrier::wait_for_release`] pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Gate {
    /// Worker is alive and about to begin setup.
    Ready,
    /// Worker finished (or failed) setup; it is signaled even on setup
    /// failure so the coordinator is never starved.
    StartupComplete,
    /// Worker returned from its timed run phase.
    Stop,
    /// Worker completed teardown.
    End,
}

/// Coordinator-side barrier failures. These are process-terminating: if
/// the coordinator's own lock or wait breaks, the run cannot produce a
/// trustworthy measurement.
#[derive(Debug, Error)]
pub enum BarrierError {
    #[error("barrier mutex poisoned while coordinating the {0:?} gate")]
    Poisoned(Gate),

    #[error("barrier mutex poisoned while releasing the Start gate")]
    PoisonedRelease,
}

/// Counter state shared by every participant, guarded by one mutex.
///
/// Each counter moves only toward its terminal value for the run: the
/// arrival counters climb to the participant count, the remaining
/// counters drain to zero, and `cleared_to_start` latches true once.
#[derive(Debug)]
struct GateCounts {
    ready: usize,
    startup_complete: usize,
    cleared_to_start: bool,
    active_remaining: usize,
    stop_remaining: usize,
}

/// N-participant, five-gate rendezvous for one benchmark run.
///
/// Constructed by the driver immediately before spawning, shared with every
/// worker by `Arc`, and dropped after the final join. The embedded failure
/// flag is a best-effort signal: its only contract is that if any thread
/// observed a failure, the flag is eventually true.
pub struct PhaseBarrier {
    participants: usize,
    counts: Mutex<GateCounts>,
    ready_cv: Condvar,
    startup_cv: Condvar,
    start_cv: Condvar,
    stop_cv: Condvar,
    end_cv: Condvar,
    failure: AtomicBool,
}

impl PhaseBarrier {
    pub fn new(participants: usize) -> Self {
        Self {
            participants,
            counts: Mutex::new(GateCounts {
                ready: 0,
                startup_complete: 0,
                cleared_to_start: false,
                active_remaining: participants,
                stop_remaining: participants,
            }),
            ready_cv: Condvar::new(),
            startup_cv: Condvar::new(),
            start_cv: Condvar::new(),
            stop_cv: Condvar::new(),
            end_cv: Condvar::new(),
            failure: AtomicBool::new(false),
        }
    }

    pub fn participants(&self) -> usize {
        self.participants
    }

    /// Record that some participant observed a failure. Best-effort; exact
    /// attribution is not part of the contract.
    pub fn mark_failure(&self) {
        self.failure.store(true, Ordering::Relaxed);
    }

    pub fn failed(&self) -> bool {
        self.failure.load(Ordering::Relaxed)
    }

    /// Lock the shared counters, recovering from poisoning.
    ///
    /// A poisoned mutex means some participant panicked while signaling.
    /// The counters themselves are still structurally valid (each update is
    /// a single increment or decrement), so the guard is recovered and the
    /// shared failure flag is set instead of propagating the panic; a
    /// participant-side primitive error must not deadlock the others.
    fn lock_counts(&self) -> (MutexGuard<'_, GateCounts>, bool) {
        match self.counts.lock() {
            Ok(guard) => (guard, true),
            Err(poisoned) => {
                self.mark_failure();
                (poisoned.into_inner(), false)
            }
        }
    }

    /// Worker-side gate signal. Updates the gate counter and wakes the
    /// coordinator; never blocks the caller.
    ///
    /// Returns `false` if the synchronization primitive was found broken,
    /// in which case the shared failure flag has already been set and the
    /// caller should treat the run as locally aborted.
    pub fn arrive(&self, gate: Gate) -> bool {
        let (mut counts, clean) = self.lock_counts();
        match gate {
            Gate::Ready => {
                counts.ready += 1;
                self.ready_cv.notify_all();
            }
            Gate::StartupComplete => {
                counts.startup_complete += 1;
                self.startup_cv.notify_all();
            }
            Gate::Stop => {
                counts.active_remaining = counts.active_remaining.saturating_sub(1);
                self.stop_cv.notify_all();
            }
            Gate::End => {
                counts.stop_remaining = counts.stop_remaining.saturating_sub(1);
                self.end_cv.notify_all();
            }
        }
        clean
    }

    /// Worker-side Start gate: block until the coordinator releases the
    /// run. Every participant blocked here unblocks together.
    ///
    /// Returns `false` on a primitive error (failure flag already set); the
    /// caller still holds its obligations toward the later gates.
    pub fn wait_for_release(&self) -> bool {
        let (mut counts, mut clean) = self.lock_counts();
        while !counts.cleared_to_start {
            counts = match self.start_cv.wait(counts) {
                Ok(guard) => guard,
                Err(poisoned) => {
                    self.mark_failure();
                    clean = false;
                    poisoned.into_inner()
                }
            };
        }
        clean
    }

    /// Coordinator-side wait for a gate to complete: arrival gates until
    /// the counter reaches the participant count, drain gates until the
    /// remaining count reaches zero.
    pub fn await_all(&self, gate: Gate) -> Result<(), BarrierError> {
        let mut counts = self.counts.lock().map_err(|_| BarrierError::Poisoned(gate))?;
        loop {
            let (done, cv) = match gate {
                Gate::Ready => (counts.ready >= self.participants, &self.ready_cv),
                Gate::StartupComplete => {
                    (counts.startup_complete >= self.participants, &self.startup_cv)
                }
                Gate::Stop => (counts.active_remaining == 0, &self.stop_cv),
                Gate::End => (counts.stop_remaining == 0, &self.end_cv),
            };
            if done {
                return Ok(());
            }
            counts = cv.wait(counts).map_err(|_| BarrierError::Poisoned(gate))?;
        }
    }

    /// Open the Start gate: latch `cleared_to_start` and broadcast so every
    /// blocked participant unblocks together. Must be called only after
    /// `await_all(Gate::StartupComplete)` has returned; the coordinator
    /// samples its timing instruments immediately before this call.
    pub fn release(&self) -> Result<(), BarrierError> {
        let mut counts = self.counts.lock().map_err(|_| {
            warn!("barrier mutex poisoned at release; run is compromised");
            BarrierError::PoisonedRelease
        })?;
        counts.cleared_to_start = true;
        self.start_cv.notify_all();
        Ok(())
    }
}
