#![deny(unreachable_pub)]
#![deny(missing_docs)]

//! Best-effort CPU pinning and priority bias for worker threads.
//!
//! Both operations are optional per the engine's runtime contract:
//! unsupported platforms and permission failures are logged at debug and
//! ignored. This leaf crate is the only place in the workspace that touches
//! raw OS calls; the engine crate forbids `unsafe` outright.

use tracing::debug;

/// Logical CPU ids usable for pinning, in OS order. Empty when enumeration
/// is unsupported.
pub fn host_core_ids() -> Vec<usize> {
    core_affinity::get_core_ids()
        .map(|cores| cores.into_iter().map(|core| core.id).collect())
        .unwrap_or_default()
}

/// Pin the calling thread to `cpu_id`.
pub fn pin_current_thread(cpu_id: usize) {
    let pinned = core_affinity::set_for_current(core_affinity::CoreId { id: cpu_id });
    if !pinned {
        debug!(cpu_id, "cpu pinning unavailable, continuing unpinned");
    }
}

/// Apply `nice_level` to the calling thread. Positive values lower priority.
#[cfg(target_os = "linux")]
pub fn renice_current_thread(nice_level: i32) {
    if nice_level == 0 {
        return;
    }
    // SAFETY: gettid has no preconditions; setpriority with PRIO_PROCESS and
    // a thread id adjusts only the calling thread on Linux.
    let rc = unsafe {
        let tid = libc::syscall(libc::SYS_gettid) as libc::id_t;
        libc::setpriority(libc::PRIO_PROCESS, tid, nice_level)
    };
    if rc != 0 {
        debug!(nice_level, "renice failed, continuing at current priority");
    }
}

/// Niceness is a no-op off Linux.
#[cfg(not(target_os = "linux"))]
pub fn renice_current_thread(_nice_level: i32) {}
