//! # Providers
//!
//! A provider makes recording sources and owns the cross-peer lookups the
//! sources need when they turn raw frames into presentable events.
//!
//! Ownership is deliberately one-directional: whoever sets up the consumer
//! side owns the providers; providers hold a weak handle to the endpoint
//! manager and weak references to the sources they made; sources hold a
//! weak reference back to their provider. Nothing in this chain keeps
//! anything else alive.

mod __test__;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};

use tracing::debug;

use crate::endpoints::{
  find_endpoint, Endpoint, EndpointNativeTraceReceiver, EndpointProcessInfo,
  EndpointTraceMapping, ProcessInfo, ProcessTraceMap,
};
use crate::manager::{EndpointFactoryFn, EndpointManagerPoll};
use crate::source::{GeneralSource, NativeTraceSource, TraceEventSource};

/// Makes recording sources. The recorder drives any number of providers
/// through this one seam.
pub trait TraceEventProvider: Send + Sync {
  fn make_source(&self) -> Arc<dyn TraceEventSource>;
}

/// Aggregates the trace-id → name mapping across every connected peer.
#[derive(Debug)]
pub struct ScopeTracingProvider {
  manager: Weak<EndpointManagerPoll>,
  mapping: Mutex<ProcessTraceMap>,
}

impl ScopeTracingProvider {
  pub fn new(manager: &Arc<EndpointManagerPoll>) -> Self {
    Self {
      manager: Arc::downgrade(manager),
      mapping: Mutex::new(ProcessTraceMap::new()),
    }
  }

  /// Queries every peer's `scope_tracing` endpoint and swaps the
  /// accumulated result in under the lock.
  pub fn update_mapping(&self) {
    let Some(manager) = self.manager.upgrade() else {
      return;
    };

    let mut mapping = ProcessTraceMap::new();
    for (_, endpoints) in manager.endpoints() {
      let Some(endpoint) = find_endpoint::<EndpointTraceMapping>(&endpoints) else {
        continue;
      };
      match endpoint.mapping() {
        Ok(peer_mapping) => mapping.extend(peer_mapping),
        Err(error) => debug!(%error, "could not refresh trace mapping"),
      }
    }

    *self.mapping.lock().unwrap() = mapping;
  }

  pub fn get_mapping(&self) -> ProcessTraceMap {
    self.mapping.lock().unwrap().clone()
  }

  /// Resolves a trace id for a process, falling back to a hex placeholder
  /// for ids nobody claimed.
  pub fn scope_name(mapping: &ProcessTraceMap, pid: u32, trace_id: u32) -> String {
    mapping
      .get(&pid)
      .and_then(|ids| ids.get(&trace_id))
      .cloned()
      .unwrap_or_else(|| format!("Unknown 0x{:x}", trace_id))
  }
}

/// Fans broadcast trace frames into the sources that are recording, and
/// resolves scope names like [`ScopeTracingProvider`].
pub struct NativeTraceProvider {
  scope_provider: ScopeTracingProvider,
  sources: Mutex<Vec<Weak<NativeTraceSource>>>,
  self_ref: Weak<NativeTraceProvider>,
}

impl NativeTraceProvider {
  pub fn new(manager: &Arc<EndpointManagerPoll>) -> Arc<Self> {
    Arc::new_cyclic(|self_ref| Self {
      scope_provider: ScopeTracingProvider::new(manager),
      sources: Mutex::new(Vec::new()),
      self_ref: self_ref.clone(),
    })
  }

  pub fn update_mapping(&self) {
    self.scope_provider.update_mapping();
  }

  pub fn get_mapping(&self) -> ProcessTraceMap {
    self.scope_provider.get_mapping()
  }

  /// Creates and registers a new recording source.
  pub fn make_native_source(&self) -> Arc<NativeTraceSource> {
    let source = NativeTraceSource::new(self.self_ref.clone());
    self.sources.lock().unwrap().push(Arc::downgrade(&source));
    source
  }

  /// A receiver endpoint forwarding broadcast frames into this provider.
  pub fn receive_endpoint(&self) -> Arc<dyn Endpoint> {
    let provider = self.self_ref.clone();
    Arc::new(EndpointNativeTraceReceiver::new(move |frame| {
      if let Some(provider) = provider.upgrade() {
        provider.incoming(frame);
      }
    }))
  }

  /// The factory closure the endpoint manager runs per discovered peer.
  /// Captures this provider weakly; once the provider is dropped the
  /// closure stops producing endpoints.
  pub fn endpoint_factory(&self) -> EndpointFactoryFn {
    let provider = self.self_ref.clone();
    Box::new(move |_transport| {
      provider
        .upgrade()
        .map(|provider| provider.receive_endpoint())
    })
  }

  /// Delivers one broadcast frame to every source currently recording.
  ///
  /// The source list is snapshotted under the lock (pruning dropped
  /// sources on the way), the delivery happens outside it, and the frame
  /// bytes are shared rather than copied per source.
  pub fn incoming(&self, frame: &[u8]) {
    let recording: Vec<Arc<NativeTraceSource>> = {
      let mut sources = self.sources.lock().unwrap();
      sources.retain(|source| source.upgrade().is_some());
      sources
        .iter()
        .filter_map(Weak::upgrade)
        .filter(|source| source.is_recording())
        .collect()
    };

    if recording.is_empty() {
      return;
    }

    let shared: Arc<[u8]> = Arc::from(frame);
    for source in recording {
      source.add_data(Arc::clone(&shared));
    }
  }
}

impl TraceEventProvider for NativeTraceProvider {
  fn make_source(&self) -> Arc<dyn TraceEventSource> {
    self.make_native_source()
  }
}

impl std::fmt::Debug for NativeTraceProvider {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    let sources = self.sources.lock().unwrap().len();
    f.debug_struct("NativeTraceProvider").field("sources", &sources).finish()
  }
}

/// Aggregates process metadata (name, thread names) across peers for the
/// metadata events of [`GeneralSource`].
pub struct GeneralProvider {
  manager: Weak<EndpointManagerPoll>,
  mapping: Mutex<HashMap<u32, ProcessInfo>>,
  self_ref: Weak<GeneralProvider>,
}

impl GeneralProvider {
  pub fn new(manager: &Arc<EndpointManagerPoll>) -> Arc<Self> {
    Arc::new_cyclic(|self_ref| Self {
      manager: Arc::downgrade(manager),
      mapping: Mutex::new(HashMap::new()),
      self_ref: self_ref.clone(),
    })
  }

  /// Queries every peer's `process_info` endpoint.
  pub fn update_mapping(&self) {
    let Some(manager) = self.manager.upgrade() else {
      return;
    };

    let mut mapping = HashMap::new();
    for (_, endpoints) in manager.endpoints() {
      let Some(endpoint) = find_endpoint::<EndpointProcessInfo>(&endpoints) else {
        continue;
      };
      match endpoint.process_info() {
        Ok(info) => {
          mapping.insert(info.pid, info);
        },
        Err(error) => debug!(%error, "could not refresh process info"),
      }
    }

    *self.mapping.lock().unwrap() = mapping;
  }

  pub fn get_mapping(&self) -> HashMap<u32, ProcessInfo> {
    self.mapping.lock().unwrap().clone()
  }
}

impl TraceEventProvider for GeneralProvider {
  fn make_source(&self) -> Arc<dyn TraceEventSource> {
    Arc::new(GeneralSource::new(self.self_ref.clone()))
  }
}

impl std::fmt::Debug for GeneralProvider {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("GeneralProvider").finish_non_exhaustive()
  }
}
