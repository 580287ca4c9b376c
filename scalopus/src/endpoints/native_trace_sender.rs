//! The `native_trace_sender` endpoint owns the drain thread of the traced
//! process. Every tick it empties the per-thread ringbuffers (active first,
//! then orphans), packs the events into one CBOR chunk and broadcasts it to
//! the `native_trace_receiver` endpoint of every connected consumer.

use serde::{Deserialize, Serialize};
use std::any::Any;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, warn};

use crate::collector::{TraceEvent, TracepointCollector};
use crate::endpoints::{Endpoint, EndpointName, EndpointNativeTraceReceiver, TransportHandle};
use crate::transport::Transport;

/// One event as it travels inside a broadcast chunk:
/// `(timestamp_ns, trace_id, kind, value)`.
pub type WireEvent = (u64, u32, u8, i64);

/// One broadcast payload: every event drained in one tick, grouped by the
/// emitting thread.
#[derive(Debug, Serialize, Deserialize)]
pub struct TraceChunk {
  pub pid: u32,
  pub events: Vec<(u64, Vec<WireEvent>)>,
}

/// Flattens an in-memory event into its wire tuple.
pub fn wire_event(event: TraceEvent) -> WireEvent {
  (
    event.timestamp_ns,
    event.trace_id,
    event.kind as u8,
    event.value,
  )
}

/// Drain cadence; also bounds how stale a broadcast chunk can be.
const DRAIN_TICK: Duration = Duration::from_millis(10);

/// Upper bound of events taken from one active buffer per tick, so one loud
/// thread cannot starve the others. Orphans are always drained to empty.
const MAX_EVENTS_PER_BUFFER: usize = 4096;

pub struct EndpointNativeTraceSender {
  transport: TransportHandle,
  stop_tx: crossbeam_channel::Sender<()>,
  worker: Mutex<Option<JoinHandle<()>>>,
}

impl EndpointNativeTraceSender {
  /// Starts the drain thread. It runs until the endpoint is dropped.
  pub fn new() -> Self {
    let transport = TransportHandle::default();
    let (stop_tx, stop_rx) = crossbeam_channel::bounded::<()>(1);

    let worker_transport = transport.clone();
    let worker = thread::Builder::new()
      .name("scalopus-trace-sender".to_string())
      .spawn(move || drain_loop(worker_transport, stop_rx))
      .ok();
    if worker.is_none() {
      warn!("could not spawn trace sender drain thread");
    }

    Self {
      transport,
      stop_tx,
      worker: Mutex::new(worker),
    }
  }
}

impl Default for EndpointNativeTraceSender {
  fn default() -> Self {
    Self::new()
  }
}

impl Drop for EndpointNativeTraceSender {
  fn drop(&mut self) {
    let _ = self.stop_tx.send(());
    if let Some(worker) = self.worker.lock().unwrap().take() {
      let _ = worker.join();
    }
  }
}

fn drain_loop(transport: TransportHandle, stop_rx: crossbeam_channel::Receiver<()>) {
  let collector = TracepointCollector::global();

  loop {
    match stop_rx.recv_timeout(DRAIN_TICK) {
      Err(crossbeam_channel::RecvTimeoutError::Timeout) => {},
      Ok(()) | Err(crossbeam_channel::RecvTimeoutError::Disconnected) => break,
    }

    let mut events: BTreeMap<u64, Vec<TraceEvent>> = BTreeMap::new();
    let mut collected = 0usize;

    // Active buffers first, bounded per tick.
    for (tid, buffer) in collector.active_buffers() {
      let batch = events.entry(tid).or_default();
      collected += buffer.pop_into(batch, MAX_EVENTS_PER_BUFFER);
    }

    // Orphans get emptied completely; their buffer is dropped afterwards
    // and whatever is still in it would be lost.
    for (tid, buffer) in collector.drain_orphans() {
      let batch = events.entry(tid).or_default();
      collected += buffer.pop_into(batch, usize::MAX);
    }

    if collected == 0 {
      continue;
    }

    let chunk = TraceChunk {
      pid: std::process::id(),
      events: events
        .into_iter()
        .filter(|(_, batch)| !batch.is_empty())
        .map(|(tid, batch)| {
          let wire: Vec<WireEvent> = batch.into_iter().map(wire_event).collect();
          (tid, wire)
        })
        .collect(),
    };

    match serde_cbor::to_vec(&chunk) {
      Ok(payload) => {
        if let Ok(transport) = transport.get() {
          transport.broadcast(EndpointNativeTraceReceiver::NAME, &payload);
        }
        // No transport yet: the events of this tick are dropped, tracing
        // without a consumer attached must stay cheap.
      },
      Err(error) => debug!(%error, "could not serialize trace chunk"),
    }
  }
}

impl Endpoint for EndpointNativeTraceSender {
  fn name(&self) -> &str {
    Self::NAME
  }

  fn set_transport(&self, transport: Weak<dyn Transport>) {
    self.transport.set(transport);
  }

  fn as_any_arc(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
    self
  }
}

impl EndpointName for EndpointNativeTraceSender {
  const NAME: &'static str = "native_trace_sender";
}
