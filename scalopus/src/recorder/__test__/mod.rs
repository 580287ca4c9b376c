#[cfg(test)]
mod __test__ {

  use crate::provider::TraceEventProvider;
  use crate::recorder::{RecorderError, TraceRecorder};
  use crate::source::TraceEventSource;

  use serde_json::{json, Value};
  use std::sync::atomic::{AtomicBool, Ordering};
  use std::sync::Arc;

  struct StubSource {
    events: Vec<Value>,
    recording: AtomicBool,
  }

  impl TraceEventSource for StubSource {
    fn start_interval(&self) {
      self.recording.store(true, Ordering::Relaxed);
    }

    fn stop_interval(&self) {
      self.recording.store(false, Ordering::Relaxed);
    }

    fn finish_interval(&self) -> Vec<Value> {
      self.stop_interval();
      self.events.clone()
    }
  }

  struct StubProvider {
    events: Vec<Value>,
  }

  impl TraceEventProvider for StubProvider {
    fn make_source(&self) -> Arc<dyn TraceEventSource> {
      Arc::new(StubSource {
        events: self.events.clone(),
        recording: AtomicBool::new(false),
      })
    }
  }

  fn recorder_with_events() -> TraceRecorder {
    let recorder = TraceRecorder::new();
    recorder.add_provider(Arc::new(StubProvider {
      events: vec![json!({"ph": "B", "name": "a", "ts": 1.0})],
    }));
    recorder.add_provider(Arc::new(StubProvider {
      events: vec![json!({"ph": "M", "name": "process_name", "ts": 0.0})],
    }));
    recorder
  }

  #[test]
  fn test_collect_requires_start() {
    let recorder = recorder_with_events();
    assert!(matches!(recorder.collect(), Err(RecorderError::NotStarted)));
  }

  #[test]
  fn test_collect_merges_all_sources() {
    let recorder = recorder_with_events();
    recorder.start();
    recorder.start_interval();

    let events = recorder.collect().unwrap();
    assert_eq!(events.len(), 2);

    // Stop drops the sources again.
    recorder.stop();
    assert!(matches!(recorder.collect(), Err(RecorderError::NotStarted)));
  }

  #[test]
  fn test_collect_json_is_a_valid_catapult_array() {
    let recorder = recorder_with_events();
    recorder.start();
    recorder.start_interval();

    let json = recorder.collect_json().unwrap();
    let parsed: Vec<Value> = serde_json::from_str(&json).unwrap();
    assert_eq!(parsed.len(), 2);
  }

  #[test]
  fn test_dump_timestamped_writes_a_file() {
    let recorder = recorder_with_events();
    recorder.start();
    recorder.start_interval();

    let dir = tempfile::tempdir().unwrap();
    let path = recorder.dump_timestamped(dir.path()).unwrap();

    assert!(path.file_name().unwrap().to_string_lossy().ends_with(".json"));
    let content = std::fs::read_to_string(&path).unwrap();
    let parsed: Vec<Value> = serde_json::from_str(&content).unwrap();
    assert_eq!(parsed.len(), 2);
  }

  #[test]
  fn test_start_is_idempotent() {
    let recorder = recorder_with_events();
    recorder.start();
    recorder.start();
    recorder.start_interval();
    assert_eq!(recorder.collect().unwrap().len(), 2);
  }
}
