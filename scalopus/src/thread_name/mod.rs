//! Process-local map of OS thread id to thread name, served by the
//! `process_info` endpoint so viewers can label the per-thread tracks.

mod __test__;

use std::collections::HashMap;
use std::sync::{Mutex, OnceLock};

use crate::utils::current_tid;

#[derive(Debug, Default)]
pub struct ThreadNameTracker {
  map: Mutex<HashMap<u64, String>>,
}

impl ThreadNameTracker {
  pub fn new() -> Self {
    Self {
      map: Mutex::new(HashMap::new()),
    }
  }

  pub fn global() -> &'static ThreadNameTracker {
    static INSTANCE: OnceLock<ThreadNameTracker> = OnceLock::new();
    INSTANCE.get_or_init(ThreadNameTracker::new)
  }

  pub fn set_name(&self, tid: u64, name: &str) {
    self.map.lock().unwrap().insert(tid, name.to_string());
  }

  /// Names the calling thread.
  pub fn set_current_thread_name(&self, name: &str) {
    self.set_name(current_tid(), name);
  }

  pub fn map(&self) -> HashMap<u64, String> {
    self.map.lock().unwrap().clone()
  }
}

/// Names the calling thread in the global tracker.
#[macro_export]
macro_rules! trace_thread_name {
  ($name:expr) => {
    $crate::thread_name::ThreadNameTracker::global().set_current_thread_name($name)
  };
}
