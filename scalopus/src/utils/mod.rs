/// Returns the OS thread id of the calling thread.
///
/// This is the same id that shows up in `/proc/<pid>/task`, so the ids in the
/// trace stream line up with what external tools report for this process.
#[inline]
pub fn current_tid() -> u64 {
  // gettid(2) cannot fail.
  unsafe { libc::gettid() as u64 }
}

/// Monotonic timestamp in nanoseconds.
///
/// CLOCK_MONOTONIC is shared by all processes on the host, which keeps
/// timestamps from different traced processes on one comparable axis.
#[inline]
pub fn now_ns() -> u64 {
  let mut ts = libc::timespec { tv_sec: 0, tv_nsec: 0 };
  unsafe {
    libc::clock_gettime(libc::CLOCK_MONOTONIC, &mut ts);
  }
  (ts.tv_sec as u64) * 1_000_000_000 + (ts.tv_nsec as u64)
}
