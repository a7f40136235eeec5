//! Real-time helpers for the consumer thread.

use std::io;

/// Default SCHED_FIFO priority for the consumer thread.
pub const DEFAULT_RT_PRIORITY: i32 = 80;

/// Moves the calling thread to SCHED_FIFO at `priority`.
#[cfg(target_os = "linux")]
pub fn promote_current_thread(priority: i32) -> io::Result<()> {
    let param = libc::sched_param {
        sched_priority: priority,
    };
    // Safety: pthread_self is always a valid handle for the calling thread.
    let result =
        unsafe { libc::pthread_setschedparam(libc::pthread_self(), libc::SCHED_FIFO, &param) };
    if result != 0 {
        return Err(io::Error::from_raw_os_error(result));
    }
    tracing::debug!(priority, "consumer thread promoted to SCHED_FIFO");
    Ok(())
}

#[cfg(not(target_os = "linux"))]
pub fn promote_current_thread(priority: i32) -> io::Result<()> {
    tracing::debug!(priority, "real-time scheduling not supported on this platform");
    Ok(())
}

/// Locks current and future pages of the process into RAM.
///
/// Missing privileges (EPERM) are not an error: the stream still runs, it
/// just may page fault.
#[cfg(target_os = "linux")]
pub fn lock_memory() -> io::Result<()> {
    // Safety: plain syscall with constant flags.
    let result = unsafe { libc::mlockall(libc::MCL_CURRENT | libc::MCL_FUTURE) };
    if result != 0 {
        let err = io::Error::last_os_error();
        if err.raw_os_error() != Some(libc::EPERM) {
            return Err(err);
        }
        tracing::warn!("mlockall not permitted; continuing without locked memory");
    }
    Ok(())
}

#[cfg(not(target_os = "linux"))]
pub fn lock_memory() -> io::Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn promotion_failure_is_reported_not_fatal() {
        // Unprivileged test runners get EPERM; either outcome is acceptable
        // as long as nothing panics.
        let result = std::thread::spawn(|| promote_current_thread(1))
            .join()
            .unwrap();
        if let Err(err) = result {
            assert!(err.raw_os_error().is_some());
        }
    }
}
