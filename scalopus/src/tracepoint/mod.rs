//! # Tracepoint Emitter
//!
//! The fast path of the whole system. Emitting an event is two relaxed
//! atomic loads (process flag, thread flag), a monotonic clock read and one
//! push into the calling thread's SPSC ringbuffer. It never blocks, never
//! allocates after the first emit of a thread, and never reports failure:
//! a full buffer silently drops the event and bumps the collector's drop
//! counter.
//!
//! The first emit of a thread builds a [`ThreadContext`] in thread-local
//! storage. The context caches the configuration flag handles and the
//! ringbuffer, so the central mutexes are only touched once per thread.
//! When the thread exits, the context's drop moves the buffer into the
//! collector's orphan list and removes the thread's configuration entry.
//!
//! ## Trace ids
//!
//! Macro sites derive their 32-bit trace id at compile time with a CRC32:
//! scope-RAII sites hash file and line, named sites (start/end pairs, marks
//! and counters) hash file and name so paired macros agree on one id. The
//! first execution of each site registers the id → name mapping in the
//! [`StaticStringTracker`](crate::name_registry::StaticStringTracker).

mod __test__;

use std::cell::OnceCell;
use std::marker::PhantomData;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use crate::collector::{EventBuffer, EventKind, TraceEvent, TracepointCollector};
use crate::trace_config::{StateHandle, TraceConfigurator};
use crate::utils::{current_tid, now_ns};

/// Per-thread emitter state, created on the first emit of a thread.
#[derive(Debug)]
struct ThreadContext {
  tid: u64,
  process_state: StateHandle,
  thread_state: StateHandle,
  buffer: Arc<EventBuffer>,
}

impl ThreadContext {
  fn register() -> Self {
    let tid = current_tid();
    let configurator = TraceConfigurator::global();
    Self {
      tid,
      process_state: configurator.process_state_handle(),
      thread_state: configurator.thread_state_handle(tid),
      buffer: TracepointCollector::global().buffer_for(tid),
    }
  }
}

impl Drop for ThreadContext {
  fn drop(&mut self) {
    // Thread exit: retire the buffer and forget the per-thread flag. The
    // buffer may still hold events; the drain thread picks them up from the
    // orphan list.
    TracepointCollector::global().orphan(self.tid);
    TraceConfigurator::global().remove_thread(self.tid);
  }
}

thread_local! {
  static CONTEXT: OnceCell<ThreadContext> = const { OnceCell::new() };
}

#[inline]
fn emit(trace_id: u32, kind: EventKind, value: i64) {
  // try_with: emits from other thread-locals' destructors during thread
  // teardown must not panic, they are simply dropped.
  let _ = CONTEXT.try_with(|cell| {
    let context = cell.get_or_init(ThreadContext::register);

    if !context.process_state.load(Ordering::Relaxed)
      || !context.thread_state.load(Ordering::Relaxed)
    {
      return;
    }

    let event = TraceEvent {
      timestamp_ns: now_ns(),
      trace_id,
      kind,
      value,
    };
    if !context.buffer.push(event) {
      TracepointCollector::global().note_dropped();
    }
  });
}

/// Emits a scope entry event for `trace_id`.
#[inline]
pub fn scope_entry(trace_id: u32) {
  emit(trace_id, EventKind::ScopeEntry, 0);
}

/// Emits a scope exit event for `trace_id`.
#[inline]
pub fn scope_exit(trace_id: u32) {
  emit(trace_id, EventKind::ScopeExit, 0);
}

/// Scope of an instant marker event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkLevel {
  Global,
  Process,
  Thread,
}

/// Emits an instant marker event for `trace_id`.
#[inline]
pub fn mark(trace_id: u32, level: MarkLevel) {
  let kind = match level {
    MarkLevel::Global => EventKind::MarkGlobal,
    MarkLevel::Process => EventKind::MarkProcess,
    MarkLevel::Thread => EventKind::MarkThread,
  };
  emit(trace_id, kind, 0);
}

/// Emits a counter sample for `trace_id`.
#[inline]
pub fn count(trace_id: u32, value: i64) {
  emit(trace_id, EventKind::Counter, value);
}

/// Emits entry on construction and the matching exit on drop.
///
/// The guard is `!Send`, pinning the entry/exit pair to one thread even
/// across early returns and unwinding.
#[derive(Debug)]
pub struct ScopeGuard {
  trace_id: u32,
  _not_send: PhantomData<*const ()>,
}

impl ScopeGuard {
  pub fn new(trace_id: u32) -> Self {
    scope_entry(trace_id);
    Self {
      trace_id,
      _not_send: PhantomData,
    }
  }
}

impl Drop for ScopeGuard {
  fn drop(&mut self) {
    scope_exit(self.trace_id);
  }
}

const CRC32_POLYNOMIAL: u32 = 0xEDB8_8320;

const fn crc32_feed(mut crc: u32, bytes: &[u8]) -> u32 {
  let mut i = 0;
  while i < bytes.len() {
    crc ^= bytes[i] as u32;
    let mut bit = 0;
    while bit < 8 {
      let mask = (crc & 1).wrapping_neg();
      crc = (crc >> 1) ^ (CRC32_POLYNOMIAL & mask);
      bit += 1;
    }
    i += 1;
  }
  crc
}

/// Trace id of an anonymous macro site: CRC32 over file path and line.
pub const fn site_id(file: &str, line: u32) -> u32 {
  let crc = crc32_feed(0xFFFF_FFFF, file.as_bytes());
  let crc = crc32_feed(crc, &line.to_le_bytes());
  !crc
}

/// Trace id of a named macro site: CRC32 over file path and name, so two
/// sites in the same file using the same name (a start/end pair) share one
/// id regardless of their line numbers.
pub const fn named_id(file: &str, name: &str) -> u32 {
  let crc = crc32_feed(0xFFFF_FFFF, file.as_bytes());
  let crc = crc32_feed(crc, name.as_bytes());
  !crc
}

/// Registers a tracepoint name the first time the site executes.
#[doc(hidden)]
#[macro_export]
macro_rules! __scalopus_register_site {
  ($id:expr, $name:expr) => {{
    static REGISTERED: ::std::sync::Once = ::std::sync::Once::new();
    REGISTERED.call_once(|| {
      $crate::name_registry::StaticStringTracker::global().insert($id, $name);
    });
  }};
}

/// Traces the enclosing scope: entry now, exit when the scope unwinds.
///
/// ```ignore
/// fn frobnicate() {
///   trace_scope_raii!("frobnicate");
///   // traced until the end of the function
/// }
/// ```
#[macro_export]
macro_rules! trace_scope_raii {
  ($name:expr) => {
    let _scalopus_scope_guard = {
      const TRACE_ID: u32 = $crate::tracepoint::site_id(::core::file!(), ::core::line!());
      $crate::__scalopus_register_site!(TRACE_ID, $name);
      $crate::tracepoint::ScopeGuard::new(TRACE_ID)
    };
  };
}

/// Like [`trace_scope_raii!`] but named after the enclosing function.
#[macro_export]
macro_rules! trace_function {
  () => {
    let _scalopus_scope_guard = {
      const TRACE_ID: u32 = $crate::tracepoint::site_id(::core::file!(), ::core::line!());
      static REGISTERED: ::std::sync::Once = ::std::sync::Once::new();
      REGISTERED.call_once(|| {
        fn type_name_of<T>(_: T) -> &'static str {
          ::std::any::type_name::<T>()
        }
        fn here() {}
        let name = type_name_of(here);
        let name = name.strip_suffix("::here").unwrap_or(name);
        $crate::name_registry::StaticStringTracker::global().insert(TRACE_ID, name);
      });
      $crate::tracepoint::ScopeGuard::new(TRACE_ID)
    };
  };
}

/// Emits an explicit scope entry. Pair with [`trace_scope_end!`] using the
/// same name in the same file; mismatched pairs are the caller's bug.
#[macro_export]
macro_rules! trace_scope_start {
  ($name:literal) => {{
    const TRACE_ID: u32 = $crate::tracepoint::named_id(::core::file!(), $name);
    $crate::__scalopus_register_site!(TRACE_ID, $name);
    $crate::tracepoint::scope_entry(TRACE_ID);
  }};
}

/// Emits the scope exit matching a [`trace_scope_start!`] of the same name.
#[macro_export]
macro_rules! trace_scope_end {
  ($name:literal) => {{
    const TRACE_ID: u32 = $crate::tracepoint::named_id(::core::file!(), $name);
    $crate::__scalopus_register_site!(TRACE_ID, $name);
    $crate::tracepoint::scope_exit(TRACE_ID);
  }};
}

/// Emits an instant marker shown across all processes in the viewer.
#[macro_export]
macro_rules! trace_mark_global {
  ($name:literal) => {{
    const TRACE_ID: u32 = $crate::tracepoint::named_id(::core::file!(), $name);
    $crate::__scalopus_register_site!(TRACE_ID, $name);
    $crate::tracepoint::mark(TRACE_ID, $crate::tracepoint::MarkLevel::Global);
  }};
}

/// Emits an instant marker scoped to this process.
#[macro_export]
macro_rules! trace_mark_process {
  ($name:literal) => {{
    const TRACE_ID: u32 = $crate::tracepoint::named_id(::core::file!(), $name);
    $crate::__scalopus_register_site!(TRACE_ID, $name);
    $crate::tracepoint::mark(TRACE_ID, $crate::tracepoint::MarkLevel::Process);
  }};
}

/// Emits an instant marker scoped to the calling thread.
#[macro_export]
macro_rules! trace_mark_thread {
  ($name:literal) => {{
    const TRACE_ID: u32 = $crate::tracepoint::named_id(::core::file!(), $name);
    $crate::__scalopus_register_site!(TRACE_ID, $name);
    $crate::tracepoint::mark(TRACE_ID, $crate::tracepoint::MarkLevel::Thread);
  }};
}

/// Samples a single-series counter; the series is named like the counter.
#[macro_export]
macro_rules! trace_counter {
  ($name:literal, $value:expr) => {{
    const TRACE_ID: u32 = $crate::tracepoint::named_id(::core::file!(), $name);
    $crate::__scalopus_register_site!(TRACE_ID, $name);
    $crate::tracepoint::count(TRACE_ID, $value as i64);
  }};
}

/// Samples one series of a multi-series counter. All series of one counter
/// share the `$name` and show up as one stacked chart in the viewer.
#[macro_export]
macro_rules! trace_counter_series {
  ($name:literal, $series:literal, $value:expr) => {{
    const TRACKED_NAME: &str = ::core::concat!($name, "_", $series);
    const TRACE_ID: u32 = $crate::tracepoint::named_id(::core::file!(), TRACKED_NAME);
    $crate::__scalopus_register_site!(TRACE_ID, TRACKED_NAME);
    $crate::tracepoint::count(TRACE_ID, $value as i64);
  }};
}
