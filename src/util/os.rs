//! Per-thread virtual time.

/// The CPU time consumed by the calling thread, in seconds.
#[cfg(unix)]
pub fn thread_cpu_time_seconds() -> f64 {
    let mut ts = libc::timespec {
        tv_sec: 0,
        tv_nsec: 0,
    };
    let ret = unsafe { libc::clock_gettime(libc::CLOCK_THREAD_CPUTIME_ID, &mut ts) };
    if ret != 0 {
        // Virtual time is only used for statistics.
        debug!(
            "clock_gettime(CLOCK_THREAD_CPUTIME_ID) failed: {}",
            std::io::Error::last_os_error()
        );
        return 0.0;
    }
    ts.tv_sec as f64 + ts.tv_nsec as f64 / 1e9
}

#[cfg(not(unix))]
pub fn thread_cpu_time_seconds() -> f64 {
    0.0
}

/// Is [`thread_cpu_time_seconds`] meaningful on this platform?
pub const fn supports_vtime() -> bool {
    cfg!(unix)
}
