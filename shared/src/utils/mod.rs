//! Utility functions and helpers

pub mod time;

/// OS thread id of the calling thread.
///
/// Records carry the id of the thread the append call was made from, so this
/// must match what external tools report for the process.
#[cfg(target_os = "linux")]
pub fn current_thread_id() -> u32 {
    // SAFETY: gettid has no preconditions and cannot fail.
    (unsafe { libc::gettid() }) as u32
}

#[cfg(not(target_os = "linux"))]
pub fn current_thread_id() -> u32 {
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};

    let mut hasher = DefaultHasher::new();
    std::thread::current().id().hash(&mut hasher);
    hasher.finish() as u32
}
