//! CPU affinity planning and binding.
//!
//! When affinity is requested, thread `i` is pinned to core `i mod K` for
//! a configured core count `K`, and the binding is read back to confirm it
//! took effect. Binding failure is fatal to the whole run: unpinned
//! execution would invalidate a user-requested measurement methodology, so
//! the process terminates rather than silently running unpinned.

use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum AffinityError {
    #[error("could not enumerate CPU cores on this system")]
    Enumeration,

    #[error("core count must be at least 1 when affinity is enabled")]
    ZeroCores,

    #[error("core count {requested} exceeds the {available} cores present")]
    TooManyCores { requested: usize, available: usize },

    #[error("failed to bind thread {thread} to core {core}")]
    Bind { thread: usize, core: usize },

    #[error("binding of thread {thread} to core {core} did not take effect")]
    Confirm { thread: usize, core: usize },
}

/// Deterministic thread-to-core assignment, round-robin over the
/// configured core count.
///
/// Constructed once by the driver; validated against the cores actually
/// present so an impossible plan is rejected before any thread spawns.
#[derive(Debug, Clone)]
pub struct AffinityPlanner {
    enabled: bool,
    core_count: usize,
}

impl AffinityPlanner {
    /// A disabled planner: threads run wherever the scheduler puts them.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            core_count: 0,
        }
    }

    /// Plan round-robin bindings over `core_count` cores.
    pub fn new(core_count: usize) -> Result<Self, AffinityError> {
        if core_count == 0 {
            return Err(AffinityError::ZeroCores);
        }
        let available = core_affinity::get_core_ids().ok_or(AffinityError::Enumeration)?;
        if core_count > available.len() {
            return Err(AffinityError::TooManyCores {
                requested: core_count,
                available: available.len(),
            });
        }
        Ok(Self {
            enabled: true,
            core_count,
        })
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Core assigned to `thread_index`, or `None` when affinity is off.
    pub fn core_for(&self, thread_index: usize) -> Option<usize> {
        if self.enabled {
            Some(thread_index % self.core_count)
        } else {
            None
        }
    }

    /// Apply the planned binding to the calling thread and read it back.
    ///
    /// Returns the bound core id, or `None` when affinity is disabled.
    /// Must be called on the worker thread itself, before it signals the
    /// Ready gate, so a failed bind is observed before any timed work.
    pub fn bind_current(&self, thread_index: usize) -> Result<Option<usize>, AffinityError> {
        let core = match self.core_for(thread_index) {
            Some(core) => core,
            None => return Ok(None),
        };

        if !core_affinity::set_for_current(core_affinity::CoreId { id: core }) {
            return Err(AffinityError::Bind {
                thread: thread_index,
                core,
            });
        }

        if !confirm_current_binding(core) {
            return Err(AffinityError::Confirm {
                thread: thread_index,
                core,
            });
        }

        info!("Thread {} assigned to CPU core {}", thread_index, core);
        Ok(Some(core))
    }
}

/// Read back the calling thread's affinity mask and check the target core
/// is set.
#[cfg(target_os = "linux")]
fn confirm_current_binding(core: usize) -> bool {
    unsafe {
        let mut set: libc::cpu_set_t = std::mem::zeroed();
        let rc = libc::sched_getaffinity(0, std::mem::size_of::<libc::cpu_set_t>(), &mut set);
        rc == 0 && libc::CPU_ISSET(core, &set)
    }
}

/// Off Linux there is no portable read-back; trust the bind result.
#[cfg(not(target_os = "linux"))]
fn confirm_current_binding(core: usize) -> bool {
    tracing::debug!("no affinity read-back on this platform; trusting bind for core {core}");
    true
}
