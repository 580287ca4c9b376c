//! # Trace Configuration
//!
//! Process-wide and per-thread enable flags for tracepoint emission. An
//! event is emitted iff both the process flag and the emitting thread's flag
//! are `true` at the moment of the check. The emit path reads the flags with
//! relaxed ordering, so a flip is observed by future emissions in bounded
//! time but an event racing with the flip may still go either way.
//!
//! Every flag is an `Arc<AtomicBool>` so the hot path can cache the handle
//! in thread-local storage and never touch the map mutex again.

mod __test__;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock};

use crate::utils::current_tid;

/// Shared handle to an enable flag.
pub type StateHandle = Arc<AtomicBool>;

#[derive(Debug)]
pub struct TraceConfigurator {
  /// Master switch for the whole process.
  process_state: StateHandle,
  /// Value assigned to the flag of every thread seen for the first time.
  new_thread_state: StateHandle,
  /// Per-thread flags, keyed by OS thread id.
  thread_state: Mutex<HashMap<u64, StateHandle>>,
}

impl TraceConfigurator {
  /// All flags default to enabled.
  pub fn new() -> Self {
    Self {
      process_state: Arc::new(AtomicBool::new(true)),
      new_thread_state: Arc::new(AtomicBool::new(true)),
      thread_state: Mutex::new(HashMap::new()),
    }
  }

  /// The process-wide configurator used by the emit path and the
  /// `trace_configurator` endpoint.
  pub fn global() -> &'static TraceConfigurator {
    static INSTANCE: OnceLock<TraceConfigurator> = OnceLock::new();
    INSTANCE.get_or_init(TraceConfigurator::new)
  }

  pub fn process_state_handle(&self) -> StateHandle {
    Arc::clone(&self.process_state)
  }

  pub fn process_state(&self) -> bool {
    self.process_state.load(Ordering::Relaxed)
  }

  /// Sets the process flag, returning the previous value.
  pub fn set_process_state(&self, enabled: bool) -> bool {
    self.process_state.swap(enabled, Ordering::Relaxed)
  }

  pub fn new_thread_state_handle(&self) -> StateHandle {
    Arc::clone(&self.new_thread_state)
  }

  pub fn new_thread_state(&self) -> bool {
    self.new_thread_state.load(Ordering::Relaxed)
  }

  /// Sets the default for threads not seen yet, returning the previous value.
  pub fn set_new_thread_state(&self, enabled: bool) -> bool {
    self.new_thread_state.swap(enabled, Ordering::Relaxed)
  }

  /// Returns the flag of thread `tid`, creating it with the new-thread
  /// default if this is the first time the thread shows up.
  pub fn thread_state_handle(&self, tid: u64) -> StateHandle {
    let mut threads = self.thread_state.lock().unwrap();
    let handle = threads
      .entry(tid)
      .or_insert_with(|| Arc::new(AtomicBool::new(self.new_thread_state())));
    Arc::clone(handle)
  }

  pub fn current_thread_state_handle(&self) -> StateHandle {
    self.thread_state_handle(current_tid())
  }

  pub fn thread_state(&self, tid: u64) -> bool {
    self.thread_state_handle(tid).load(Ordering::Relaxed)
  }

  /// Sets the flag of thread `tid`, returning the previous value.
  pub fn set_thread_state(&self, tid: u64, enabled: bool) -> bool {
    self.thread_state_handle(tid).swap(enabled, Ordering::Relaxed)
  }

  /// Drops the entry of a terminated thread. Called from the emitter's
  /// thread-exit hook.
  pub fn remove_thread(&self, tid: u64) {
    self.thread_state.lock().unwrap().remove(&tid);
  }

  /// Snapshot of all known per-thread flags.
  pub fn thread_map(&self) -> HashMap<u64, StateHandle> {
    self.thread_state.lock().unwrap().clone()
  }
}

impl Default for TraceConfigurator {
  fn default() -> Self {
    Self::new()
  }
}

/// Sets the calling thread's flag for the lifetime of the guard and restores
/// the previous value on drop.
#[derive(Debug)]
pub struct ThreadStateGuard {
  tid: u64,
  previous: bool,
}

impl ThreadStateGuard {
  pub fn set(enabled: bool) -> Self {
    let tid = current_tid();
    let previous = TraceConfigurator::global().set_thread_state(tid, enabled);
    Self { tid, previous }
  }
}

impl Drop for ThreadStateGuard {
  fn drop(&mut self) {
    TraceConfigurator::global().set_thread_state(self.tid, self.previous);
  }
}

/// Sets the process flag for the lifetime of the guard and restores the
/// previous value on drop.
#[derive(Debug)]
pub struct ProcessStateGuard {
  previous: bool,
}

impl ProcessStateGuard {
  pub fn set(enabled: bool) -> Self {
    let previous = TraceConfigurator::global().set_process_state(enabled);
    Self { previous }
  }
}

impl Drop for ProcessStateGuard {
  fn drop(&mut self) {
    TraceConfigurator::global().set_process_state(self.previous);
  }
}
