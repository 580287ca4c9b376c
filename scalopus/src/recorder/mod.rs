//! # Trace Recorder
//!
//! Convenience wrapper for embedding the consumer side: it owns a set of
//! providers, makes one source per provider when a recording starts, fans
//! interval control out to all of them and merges their results into one
//! Catapult JSON array, optionally written straight to a dump file.

mod __test__;

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use thiserror::Error;
use tracing::info;

use crate::provider::TraceEventProvider;
use crate::source::TraceEventSource;

#[derive(Debug, Error)]
pub enum RecorderError {
  #[error("recorder has no active sources, call start() first")]
  NotStarted,
  #[error("could not write trace dump: {0}")]
  Io(#[from] std::io::Error),
}

#[derive(Default)]
pub struct TraceRecorder {
  providers: Mutex<Vec<Arc<dyn TraceEventProvider>>>,
  sources: Mutex<Vec<Arc<dyn TraceEventSource>>>,
}

impl TraceRecorder {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn add_provider(&self, provider: Arc<dyn TraceEventProvider>) {
    self.providers.lock().unwrap().push(provider);
  }

  /// Materialises one source per provider. Idempotent; an already started
  /// recorder keeps its sources.
  pub fn start(&self) {
    let mut sources = self.sources.lock().unwrap();
    if !sources.is_empty() {
      return;
    }
    let providers = self.providers.lock().unwrap();
    sources.extend(providers.iter().map(|provider| provider.make_source()));
  }

  /// Drops all sources; a later [`Self::start`] makes fresh ones.
  pub fn stop(&self) {
    self.sources.lock().unwrap().clear();
  }

  pub fn start_interval(&self) {
    for source in self.sources.lock().unwrap().iter() {
      source.start_interval();
    }
  }

  pub fn stop_interval(&self) {
    for source in self.sources.lock().unwrap().iter() {
      source.stop_interval();
    }
  }

  /// Ends the interval and merges every source's events.
  pub fn collect(&self) -> Result<Vec<serde_json::Value>, RecorderError> {
    let sources = self.sources.lock().unwrap();
    if sources.is_empty() {
      return Err(RecorderError::NotStarted);
    }

    let mut events = Vec::new();
    for source in sources.iter() {
      events.extend(source.finish_interval());
    }
    Ok(events)
  }

  /// Ends the interval and renders the merged events as a Catapult JSON
  /// array, one event per line.
  pub fn collect_json(&self) -> Result<String, RecorderError> {
    let events = self.collect()?;
    let lines: Vec<String> = events.iter().map(|event| event.to_string()).collect();
    Ok(format!("[\n{}\n]\n", lines.join(",\n")))
  }

  /// Ends the interval and writes the trace to `path`.
  pub fn dump_to_file(&self, path: &Path) -> Result<(), RecorderError> {
    let json = self.collect_json()?;
    let mut file = fs::File::create(path)?;
    file.write_all(json.as_bytes())?;
    file.sync_all()?;
    info!(path = %path.display(), "trace dump written");
    Ok(())
  }

  /// Like [`Self::dump_to_file`] with a timestamped file name in `dir`.
  /// Returns the path that was written.
  pub fn dump_timestamped(&self, dir: &Path) -> Result<PathBuf, RecorderError> {
    let stamp = chrono::Utc::now().format("%Y%m%d%H%M%S");
    let path = dir.join(format!("scalopus-trace-{}-{}.json", std::process::id(), stamp));
    self.dump_to_file(&path)?;
    Ok(path)
  }
}

impl std::fmt::Debug for TraceRecorder {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("TraceRecorder")
      .field("providers", &self.providers.lock().unwrap().len())
      .field("sources", &self.sources.lock().unwrap().len())
      .finish()
  }
}
