//! # SPSC Ringbuffer
//!
//! A single producer - single consumer ringbuffer backing each traced
//! thread's event buffer. One slot is kept empty to tell a full buffer from
//! an empty one, so a buffer constructed with capacity `n` allocates `n + 1`
//! slots and holds at most `n` values.
//!
//! The producer and the consumer each own one index. The producer reads its
//! own `write_idx` relaxed, checks the consumer's `read_idx` with acquire
//! ordering, writes the slot, and publishes with a release store. The
//! consumer mirrors this with the roles swapped, so a popped value is always
//! fully written before it becomes visible.
//!
//! ## Contract
//!
//! Exactly one thread pushes and exactly one thread pops. The type is `Sync`
//! so both sides can share it through an `Arc`, but nothing checks the
//! single-producer/single-consumer property at runtime; the owner of the
//! buffer has to guarantee it.


use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

#[derive(Debug)]
pub struct SpscRingBuffer<T> {
  /// Slot storage, one more than the usable capacity.
  slots: Box<[UnsafeCell<Option<T>>]>,
  /// Next slot the producer writes. Owned by the producer.
  write_idx: AtomicUsize,
  /// Next slot the consumer reads. Owned by the consumer.
  read_idx: AtomicUsize,
}

// The buffer hands values across threads; the SPSC contract (documented on
// the module) makes the unsynchronised slot accesses sound.
unsafe impl<T: Send> Sync for SpscRingBuffer<T> {}
unsafe impl<T: Send> Send for SpscRingBuffer<T> {}

impl<T> SpscRingBuffer<T> {
  /// Creates a buffer that can hold `capacity` values.
  ///
  /// # Panics
  /// Panics if `capacity` is zero.
  pub fn new(capacity: usize) -> Self {
    if capacity == 0 {
      panic!("ringbuffer capacity may not be zero");
    }

    let mut slots = Vec::with_capacity(capacity + 1);
    slots.resize_with(capacity + 1, || UnsafeCell::new(None));

    Self {
      slots: slots.into_boxed_slice(),
      write_idx: AtomicUsize::new(0),
      read_idx: AtomicUsize::new(0),
    }
  }

  pub fn new_shared(capacity: usize) -> Arc<Self> {
    Arc::new(Self::new(capacity))
  }

  /// Moves a value into the buffer.
  ///
  /// Returns `false` if the buffer is full; the value is dropped in that
  /// case. Only the producer thread may call this.
  #[inline]
  pub fn push(&self, value: T) -> bool {
    let write = self.write_idx.load(Ordering::Relaxed);
    let next = (write + 1) % self.slots.len();

    if next == self.read_idx.load(Ordering::Acquire) {
      return false;
    }

    // Safety: the slot at `write` is outside the readable window, so the
    // consumer does not touch it until the release store below.
    unsafe {
      *self.slots[write].get() = Some(value);
    }

    self.write_idx.store(next, Ordering::Release);
    true
  }

  /// Pops the oldest value, or `None` when the buffer is empty.
  ///
  /// Only the consumer thread may call this.
  #[inline]
  pub fn pop(&self) -> Option<T> {
    let write = self.write_idx.load(Ordering::Acquire);
    let read = self.read_idx.load(Ordering::Relaxed);

    if write == read {
      return None;
    }

    // Safety: the slot at `read` is inside the readable window published by
    // the producer's release store, which the acquire load above observed.
    let value = unsafe { (*self.slots[read].get()).take() };

    self.read_idx.store((read + 1) % self.slots.len(), Ordering::Release);
    value
  }

  /// Drains up to `max` values into `sink`, returning how many were moved.
  ///
  /// This is repeated single pops; the consumer bounds the drain work
  /// through `max` so a fast producer cannot pin it in this loop.
  pub fn pop_into(&self, sink: &mut Vec<T>, max: usize) -> usize {
    let mut moved = 0;
    while moved < max {
      match self.pop() {
        Some(value) => {
          sink.push(value);
          moved += 1;
        },
        None => break,
      }
    }
    moved
  }

  /// Approximate number of buffered values.
  ///
  /// Exact when called from the producer or the consumer; from anywhere else
  /// it is a snapshot that may be stale by the time it is used.
  pub fn len(&self) -> usize {
    let write = self.write_idx.load(Ordering::Relaxed);
    let read = self.read_idx.load(Ordering::Relaxed);
    (write + self.slots.len() - read) % self.slots.len()
  }

  pub fn is_empty(&self) -> bool {
    self.write_idx.load(Ordering::Relaxed) == self.read_idx.load(Ordering::Relaxed)
  }

  /// Number of values the buffer can hold.
  pub fn capacity(&self) -> usize {
    self.slots.len() - 1
  }
}
