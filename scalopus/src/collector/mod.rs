//! # Tracepoint Collector
//!
//! Owns the per-thread event ringbuffers. Every traced thread gets its own
//! single-producer/single-consumer buffer on first emit; the sender's drain
//! thread is the one consumer for all of them.
//!
//! When a traced thread exits, its buffer moves from the active map into the
//! orphan queue in one step under the map lock. No new events are ever
//! appended to an orphan; the next drain pass visits active buffers first
//! and then empties and drops the orphans, so events emitted right before
//! thread exit still make it out.


use crossbeam_queue::SegQueue;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock};

use crate::ringbuffer::SpscRingBuffer;

/// What a trace event records.
///
/// The values double as the on-wire tag, so they are fixed.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
  ScopeEntry = 1,
  ScopeExit = 2,
  MarkGlobal = 3,
  MarkProcess = 4,
  MarkThread = 5,
  Counter = 6,
}

impl EventKind {
  pub fn from_u8(kind: u8) -> Option<EventKind> {
    match kind {
      1 => Some(EventKind::ScopeEntry),
      2 => Some(EventKind::ScopeExit),
      3 => Some(EventKind::MarkGlobal),
      4 => Some(EventKind::MarkProcess),
      5 => Some(EventKind::MarkThread),
      6 => Some(EventKind::Counter),
      _ => None,
    }
  }
}

/// A single tracepoint record as it sits in a thread's ringbuffer.
///
/// `value` is only meaningful for [`EventKind::Counter`]; it stays zero for
/// every other kind so the record has one fixed shape on the hot path.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TraceEvent {
  pub timestamp_ns: u64,
  pub trace_id: u32,
  pub kind: EventKind,
  pub value: i64,
}

/// The ringbuffer type backing each thread.
pub type EventBuffer = SpscRingBuffer<TraceEvent>;

/// Default capacity of each thread's ringbuffer. If a thread produces
/// events faster than the drain thread collects them this determines how
/// many events are lost.
pub const DEFAULT_BUFFER_CAPACITY: usize = 10_000;

#[derive(Debug)]
pub struct TracepointCollector {
  /// Buffers of live threads, keyed by OS thread id.
  active: Mutex<HashMap<u64, Arc<EventBuffer>>>,
  /// Buffers whose producer thread has exited but which may still hold
  /// events. Lock-free so a dying thread can hand its buffer off cheaply.
  orphans: SegQueue<(u64, Arc<EventBuffer>)>,
  /// Capacity used for buffers created after this point.
  buffer_capacity: AtomicUsize,
  /// Events rejected because a buffer was full.
  dropped: AtomicU64,
}

impl TracepointCollector {
  pub fn new() -> Self {
    Self {
      active: Mutex::new(HashMap::new()),
      orphans: SegQueue::new(),
      buffer_capacity: AtomicUsize::new(DEFAULT_BUFFER_CAPACITY),
      dropped: AtomicU64::new(0),
    }
  }

  /// The process-wide collector used by the emitter and the sender endpoint.
  pub fn global() -> &'static TracepointCollector {
    static INSTANCE: OnceLock<TracepointCollector> = OnceLock::new();
    INSTANCE.get_or_init(TracepointCollector::new)
  }

  /// Sets the capacity for ringbuffers created from now on. Buffers that
  /// already exist keep their size.
  pub fn set_buffer_capacity(&self, capacity: usize) {
    self.buffer_capacity.store(capacity, Ordering::Relaxed);
  }

  /// Returns the buffer of thread `tid`, creating it on first use.
  ///
  /// The same buffer is returned for the same thread until [`Self::orphan`]
  /// retires it.
  pub fn buffer_for(&self, tid: u64) -> Arc<EventBuffer> {
    let mut active = self.active.lock().unwrap();
    let buffer = active.entry(tid).or_insert_with(|| {
      SpscRingBuffer::new_shared(self.buffer_capacity.load(Ordering::Relaxed))
    });
    Arc::clone(buffer)
  }

  /// Snapshot of all live-thread buffers.
  pub fn active_buffers(&self) -> HashMap<u64, Arc<EventBuffer>> {
    self.active.lock().unwrap().clone()
  }

  /// Retires the buffer of an exited thread.
  ///
  /// The buffer leaves the active map and enters the orphan queue in one
  /// step, so a concurrent drain pass sees it on exactly one side.
  pub fn orphan(&self, tid: u64) {
    let mut active = self.active.lock().unwrap();
    if let Some(buffer) = active.remove(&tid) {
      self.orphans.push((tid, buffer));
    }
  }

  /// Takes all orphaned buffers, clearing the internal list. Each orphan is
  /// returned by exactly one call; the caller drains them to empty and then
  /// drops them.
  pub fn drain_orphans(&self) -> Vec<(u64, Arc<EventBuffer>)> {
    let mut orphans = Vec::new();
    while let Some(entry) = self.orphans.pop() {
      orphans.push(entry);
    }
    orphans
  }

  /// Records one event lost to a full buffer.
  #[inline]
  pub fn note_dropped(&self) {
    self.dropped.fetch_add(1, Ordering::Relaxed);
  }

  /// Total number of events dropped on full buffers so far.
  pub fn dropped_events(&self) -> u64 {
    self.dropped.load(Ordering::Relaxed)
  }
}

impl Default for TracepointCollector {
  fn default() -> Self {
    Self::new()
  }
}
