//! # Sources
//!
//! A source records one interval of the broadcast trace stream and turns it
//! into Chrome Catapult trace events (`serde_json::Value`s, one JSON object
//! per event, timestamps in floating-point microseconds).
//!
//! A [`NativeTraceSource`] moves Idle → Recording → Idle:
//! `start_interval` clears the frame buffer and raises the recording flag,
//! the provider appends every broadcast frame that arrives while the flag
//! is up, and `finish_interval` converts exactly those frames. The
//! conversion resolves trace ids through the provider's mapping,
//! stable-sorts by timestamp to heal out-of-order begin/end pairs from
//! different threads, and post-processes counter events so every counter
//! carries all series keys seen in the interval.

mod __test__;

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};

use serde_json::{json, Value};
use tracing::warn;

use crate::collector::EventKind;
use crate::endpoints::TraceChunk;
use crate::provider::{GeneralProvider, NativeTraceProvider, ScopeTracingProvider};

/// One recording session. The recorder drives sources of any provider
/// through this seam.
pub trait TraceEventSource: Send + Sync {
  fn start_interval(&self);
  fn stop_interval(&self);
  /// Stops the interval and returns its events.
  fn finish_interval(&self) -> Vec<Value>;
}

/// Records broadcast trace frames and converts them to Catapult events.
pub struct NativeTraceSource {
  provider: Weak<NativeTraceProvider>,
  recording: AtomicBool,
  frames: Mutex<Vec<Arc<[u8]>>>,
}

impl NativeTraceSource {
  pub fn new(provider: Weak<NativeTraceProvider>) -> Arc<Self> {
    Arc::new(Self {
      provider,
      recording: AtomicBool::new(false),
      frames: Mutex::new(Vec::new()),
    })
  }

  pub fn is_recording(&self) -> bool {
    self.recording.load(Ordering::Relaxed)
  }

  /// Appends one broadcast frame if the source is recording.
  pub fn add_data(&self, frame: Arc<[u8]>) {
    if !self.is_recording() {
      return;
    }
    self.frames.lock().unwrap().push(frame);
  }
}

impl TraceEventSource for NativeTraceSource {
  fn start_interval(&self) {
    self.stop_interval();
    self.frames.lock().unwrap().clear();
    self.recording.store(true, Ordering::Relaxed);
  }

  fn stop_interval(&self) {
    self.recording.store(false, Ordering::Relaxed);
  }

  fn finish_interval(&self) -> Vec<Value> {
    self.stop_interval();

    let frames = std::mem::take(&mut *self.frames.lock().unwrap());

    // Refresh the id → name mapping before resolving anything; peers may
    // have registered new tracepoints during the interval.
    let mapping = match self.provider.upgrade() {
      Some(provider) => {
        provider.update_mapping();
        provider.get_mapping()
      },
      None => Default::default(),
    };

    let mut events = Vec::new();
    // Running value of every counter series, keyed by counter name, in
    // arrival order. Each counter event snapshots the state of its counter.
    let mut counter_values: HashMap<String, BTreeMap<String, i64>> = HashMap::new();

    for frame in frames {
      let chunk: TraceChunk = match serde_cbor::from_slice(&frame) {
        Ok(chunk) => chunk,
        Err(error) => {
          warn!(%error, "discarding undecodable trace chunk");
          continue;
        },
      };

      for (tid, thread_events) in chunk.events {
        for (timestamp_ns, trace_id, kind, value) in thread_events {
          let Some(kind) = EventKind::from_u8(kind) else {
            warn!(kind, "discarding event of unknown kind");
            continue;
          };

          let name = ScopeTracingProvider::scope_name(&mapping, chunk.pid, trace_id);
          let ts_us = timestamp_ns as f64 / 1e3;
          let mut entry = json!({
            "ts": ts_us,
            "tid": tid,
            "pid": chunk.pid,
            "cat": "PERF",
            "name": name,
          });

          match kind {
            EventKind::ScopeEntry => entry["ph"] = json!("B"),
            EventKind::ScopeExit => entry["ph"] = json!("E"),
            EventKind::MarkGlobal => {
              entry["ph"] = json!("i");
              entry["s"] = json!("g");
            },
            EventKind::MarkProcess => {
              entry["ph"] = json!("i");
              entry["s"] = json!("p");
            },
            EventKind::MarkThread => {
              entry["ph"] = json!("i");
              entry["s"] = json!("t");
            },
            EventKind::Counter => {
              let (counter, series) = split_counter_name(&name);
              let values = counter_values.entry(counter.clone()).or_default();
              values.insert(series, value);
              entry["ph"] = json!("C");
              entry["name"] = json!(counter);
              entry["args"] = json!(values);
            },
          }

          events.push(entry);
        }
      }
    }

    // Begin/end events from different threads arrive interleaved; a stable
    // sort on the timestamp puts every pair back together.
    events.sort_by(|a, b| {
      let a = a["ts"].as_f64().unwrap_or(0.0);
      let b = b["ts"].as_f64().unwrap_or(0.0);
      a.partial_cmp(&b).unwrap_or(std::cmp::Ordering::Equal)
    });

    fill_counter_series(&mut events);
    events
  }
}

impl std::fmt::Debug for NativeTraceSource {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("NativeTraceSource")
      .field("recording", &self.is_recording())
      .finish_non_exhaustive()
  }
}

/// Splits a tracked counter name at its last underscore into counter name
/// and series key; a name without one is both at once.
fn split_counter_name(tracked: &str) -> (String, String) {
  match tracked.rfind('_') {
    Some(index) => (tracked[..index].to_string(), tracked[index + 1..].to_string()),
    None => (tracked.to_string(), tracked.to_string()),
  }
}

/// Walks the sorted events in reverse and unions every counter's `args`
/// with the series keys that show up later in the interval. Combined with
/// the forward accumulation at event construction this gives every counter
/// event the full key set of its interval, which the viewer needs to draw
/// contiguous counter lines.
fn fill_counter_series(events: &mut [Value]) {
  let mut future_series: HashMap<String, BTreeMap<String, i64>> = HashMap::new();

  for event in events.iter_mut().rev() {
    if event["ph"] != json!("C") {
      continue;
    }
    let Some(name) = event["name"].as_str().map(str::to_string) else {
      continue;
    };

    let mut values: BTreeMap<String, i64> =
      serde_json::from_value(event["args"].clone()).unwrap_or_default();
    if let Some(future) = future_series.get(&name) {
      for (series, value) in future {
        values.entry(series.clone()).or_insert(*value);
      }
    }

    event["args"] = json!(values);
    future_series.insert(name, values);
  }
}

/// Emits the process/thread metadata events Catapult uses to label tracks.
/// No recording state; everything happens at `finish_interval`.
pub struct GeneralSource {
  provider: Weak<GeneralProvider>,
}

impl GeneralSource {
  pub fn new(provider: Weak<GeneralProvider>) -> Self {
    Self { provider }
  }
}

impl TraceEventSource for GeneralSource {
  fn start_interval(&self) {}

  fn stop_interval(&self) {}

  fn finish_interval(&self) -> Vec<Value> {
    let Some(provider) = self.provider.upgrade() else {
      return Vec::new();
    };
    provider.update_mapping();

    let mut events = Vec::new();
    for (pid, info) in provider.get_mapping() {
      events.push(json!({
        "ph": "M",
        "name": "process_name",
        "pid": pid,
        "tid": 0,
        "args": { "name": info.name },
      }));

      for (tid, thread_name) in info.threads {
        events.push(json!({
          "ph": "M",
          "name": "thread_name",
          "pid": pid,
          "tid": tid,
          "args": { "name": thread_name },
        }));
      }
    }
    events
  }
}

impl std::fmt::Debug for GeneralSource {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("GeneralSource").finish_non_exhaustive()
  }
}
