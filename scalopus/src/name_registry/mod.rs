//! Process-local map of trace id to human-readable scope name.
//!
//! Tracepoint macros register their name here the first time each macro site
//! executes; the `scope_tracing` endpoint serves the snapshot to peers that
//! need to resolve ids back into names. The emit path never reads this map,
//! it only carries the 32-bit ids.

mod __test__;

use std::collections::HashMap;
use std::sync::{Mutex, OnceLock};

#[derive(Debug, Default)]
pub struct StaticStringTracker {
  map: Mutex<HashMap<u32, String>>,
}

impl StaticStringTracker {
  pub fn new() -> Self {
    Self {
      map: Mutex::new(HashMap::new()),
    }
  }

  /// The process-wide tracker fed by the tracepoint macros.
  pub fn global() -> &'static StaticStringTracker {
    static INSTANCE: OnceLock<StaticStringTracker> = OnceLock::new();
    INSTANCE.get_or_init(StaticStringTracker::new)
  }

  /// Registers `name` for `trace_id`. Last registration wins; two macro
  /// sites hashing to the same id is the caller's collision to resolve.
  pub fn insert(&self, trace_id: u32, name: &str) {
    self.map.lock().unwrap().insert(trace_id, name.to_string());
  }

  pub fn get(&self, trace_id: u32) -> Option<String> {
    self.map.lock().unwrap().get(&trace_id).cloned()
  }

  /// Snapshot of the whole mapping.
  pub fn map(&self) -> HashMap<u32, String> {
    self.map.lock().unwrap().clone()
  }

  pub fn len(&self) -> usize {
    self.map.lock().unwrap().len()
  }

  pub fn is_empty(&self) -> bool {
    self.map.lock().unwrap().is_empty()
  }
}
