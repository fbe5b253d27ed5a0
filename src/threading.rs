//! Scheduling priority and CPU affinity for looper threads.
use serde::{Deserialize, Serialize};
use std::io;

/// Scheduling class of a looper thread, expressed as a nice value.
///
/// The mapping follows the usual interactive-system ladder: background work yields to the
/// default class, which in turn yields to display-critical loopers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThreadPriority {
    Lowest,
    Background,
    #[default]
    Default,
    Foreground,
    Display,
    UrgentDisplay,
}

impl ThreadPriority {
    /// Nice value applied to the thread.
    ///
    /// # Mapping
    /// - `Lowest` → 19
    /// - `Background` → 10
    /// - `Default` → 0
    /// - `Foreground` → -2
    /// - `Display` → -4
    /// - `UrgentDisplay` → -8
    pub const fn nice(self) -> i32 {
        match self {
            ThreadPriority::Lowest => 19,
            ThreadPriority::Background => 10,
            ThreadPriority::Default => 0,
            ThreadPriority::Foreground => -2,
            ThreadPriority::Display => -4,
            ThreadPriority::UrgentDisplay => -8,
        }
    }
}

/// Apply `priority` to the calling thread.
///
/// # Platform Support
/// - **Linux**: `setpriority(PRIO_PROCESS, gettid(), nice)`; on Linux the nice value is per
///   thread. Raising priority (negative nice) needs `CAP_SYS_NICE` and fails otherwise.
/// - **Other platforms**: No-op (returns `Ok(())`)
pub fn set_thread_priority(priority: ThreadPriority) -> io::Result<()> {
    #[cfg(target_os = "linux")]
    {
        use libc::{setpriority, syscall, SYS_gettid, PRIO_PROCESS};

        let rc = unsafe {
            let tid = syscall(SYS_gettid) as libc::id_t;
            setpriority(PRIO_PROCESS, tid, priority.nice())
        };
        if rc != 0 {
            return Err(io::Error::last_os_error());
        }
    }
    #[cfg(not(target_os = "linux"))]
    {
        let _ = priority;
    }
    Ok(())
}

/// Pin the calling thread to `core_id`.
///
/// # Platform Support
/// - **Linux**: `pthread_setaffinity_np` with a single-core mask
/// - **Other platforms**: No-op (returns `Ok(())`)
pub fn pin_to_core(core_id: usize) -> io::Result<()> {
    #[cfg(target_os = "linux")]
    {
        use libc::{cpu_set_t, pthread_self, pthread_setaffinity_np, CPU_SET, CPU_SETSIZE, CPU_ZERO};

        if core_id >= CPU_SETSIZE as usize {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("core {core_id} exceeds CPU_SETSIZE"),
            ));
        }
        let rc = unsafe {
            let mut set: cpu_set_t = std::mem::zeroed();
            CPU_ZERO(&mut set);
            CPU_SET(core_id, &mut set);
            pthread_setaffinity_np(pthread_self(), std::mem::size_of::<cpu_set_t>(), &set)
        };
        if rc != 0 {
            return Err(io::Error::from_raw_os_error(rc));
        }
    }
    #[cfg(not(target_os = "linux"))]
    {
        let _ = core_id;
    }
    Ok(())
}
