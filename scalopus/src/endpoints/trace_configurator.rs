//! The `trace_configurator` endpoint lets a peer read and change the trace
//! enable flags of this process: the process switch, the default for new
//! threads, and the per-thread flags of known threads.

use serde::{Deserialize, Serialize};
use std::any::Any;
use std::collections::BTreeMap;
use std::sync::{Arc, Weak};

use crate::endpoints::{Endpoint, EndpointName, TransportHandle};
use crate::trace_config::TraceConfigurator;
use crate::transport::{Transport, TransportError, REQUEST_WAIT_BUDGET};

/// A trace configuration as it travels on the wire. The `set_*` flags say
/// which of the values a `set` request actually wants to apply; thread ids
/// are decimal strings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceConfiguration {
  #[serde(rename = "p")]
  pub process_state: bool,
  #[serde(rename = "sp")]
  pub set_process_state: bool,
  #[serde(rename = "nt")]
  pub new_thread_state: bool,
  #[serde(rename = "snt")]
  pub set_new_thread_state: bool,
  #[serde(rename = "t")]
  pub thread_state: BTreeMap<String, bool>,
}

impl TraceConfiguration {
  /// A request that applies the process switch.
  pub fn with_process_state(mut self, enabled: bool) -> Self {
    self.process_state = enabled;
    self.set_process_state = true;
    self
  }

  /// A request that applies the default for threads not seen yet.
  pub fn with_new_thread_state(mut self, enabled: bool) -> Self {
    self.new_thread_state = enabled;
    self.set_new_thread_state = true;
    self
  }

  /// A request that applies one thread's flag.
  pub fn with_thread(mut self, tid: u64, enabled: bool) -> Self {
    self.thread_state.insert(tid.to_string(), enabled);
    self
  }
}

#[derive(Debug, Serialize, Deserialize)]
struct ConfigRequest {
  cmd: String,
  #[serde(default)]
  state: Option<TraceConfiguration>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ConfigReply {
  state: TraceConfiguration,
  success: bool,
}

#[derive(Debug, Default)]
pub struct EndpointTraceConfigurator {
  transport: TransportHandle,
}

impl EndpointTraceConfigurator {
  pub fn new() -> Self {
    Self::default()
  }

  /// Applies `state` on the remote process. Returns the state after the
  /// change and whether the request was accepted in full.
  pub fn set_state(
    &self,
    state: TraceConfiguration,
  ) -> Result<(TraceConfiguration, bool), TransportError> {
    self.round_trip(ConfigRequest {
      cmd: "set".to_string(),
      state: Some(state),
    })
  }

  /// Reads the remote process's current configuration.
  pub fn get_state(&self) -> Result<TraceConfiguration, TransportError> {
    self
      .round_trip(ConfigRequest {
        cmd: "get".to_string(),
        state: None,
      })
      .map(|(state, _)| state)
  }

  fn round_trip(
    &self,
    request: ConfigRequest,
  ) -> Result<(TraceConfiguration, bool), TransportError> {
    let transport = self.transport.get()?;
    let request = serde_cbor::to_vec(&request).map_err(|_| TransportError::Protocol)?;
    let response = transport.request(Self::NAME, &request)?.wait(REQUEST_WAIT_BUDGET)?;
    let reply: ConfigReply =
      serde_cbor::from_slice(&response).map_err(|_| TransportError::Protocol)?;
    Ok((reply.state, reply.success))
  }

  /// Snapshot of the local configuration, as it would go on the wire.
  fn current_state(configurator: &TraceConfigurator) -> TraceConfiguration {
    let thread_state = configurator
      .thread_map()
      .into_iter()
      .map(|(tid, flag)| {
        (
          tid.to_string(),
          flag.load(std::sync::atomic::Ordering::Relaxed),
        )
      })
      .collect();
    TraceConfiguration {
      process_state: configurator.process_state(),
      set_process_state: false,
      new_thread_state: configurator.new_thread_state(),
      set_new_thread_state: false,
      thread_state,
    }
  }
}

impl Endpoint for EndpointTraceConfigurator {
  fn name(&self) -> &str {
    Self::NAME
  }

  fn handle(&self, _transport: &dyn Transport, request: &[u8]) -> Option<Vec<u8>> {
    let request: ConfigRequest = serde_cbor::from_slice(request).ok()?;
    let configurator = TraceConfigurator::global();

    let mut success = true;
    match request.cmd.as_str() {
      "set" => {
        let state = request.state.unwrap_or_default();
        if state.set_process_state {
          configurator.set_process_state(state.process_state);
        }
        if state.set_new_thread_state {
          configurator.set_new_thread_state(state.new_thread_state);
        }

        // Per-thread flags only apply to threads we actually know about; a
        // request naming an unknown tid is flagged as a conflict.
        let known = configurator.thread_map();
        for (tid, enabled) in &state.thread_state {
          match tid.parse::<u64>().ok().and_then(|tid| known.get(&tid)) {
            Some(flag) => flag.store(*enabled, std::sync::atomic::Ordering::Relaxed),
            None => success = false,
          }
        }
      },
      "get" => {},
      _ => success = false,
    }

    let reply = ConfigReply {
      state: Self::current_state(configurator),
      success,
    };
    serde_cbor::to_vec(&reply).ok()
  }

  fn set_transport(&self, transport: Weak<dyn Transport>) {
    self.transport.set(transport);
  }

  fn as_any_arc(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
    self
  }
}

impl EndpointName for EndpointTraceConfigurator {
  const NAME: &'static str = "trace_configurator";
}
