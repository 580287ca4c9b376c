//! The `scope_tracing` endpoint serves this process's trace-id → name
//! mapping so consumers can resolve the ids in the event stream.

use serde::{Deserialize, Serialize};
use std::any::Any;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Weak};

use crate::endpoints::{Endpoint, EndpointName, TransportHandle};
use crate::name_registry::StaticStringTracker;
use crate::transport::{Transport, TransportError, REQUEST_WAIT_BUDGET};

/// trace id → scope name, per process id.
pub type ProcessTraceMap = HashMap<u32, HashMap<u32, String>>;

/// The request is the single byte `'m'`.
const MAPPING_REQUEST: u8 = b'm';

/// Ids travel as decimal strings so the payload stays string-keyed maps all
/// the way down.
#[derive(Debug, Serialize, Deserialize)]
struct MappingReply {
  mapping: BTreeMap<String, BTreeMap<String, String>>,
}

#[derive(Debug, Default)]
pub struct EndpointTraceMapping {
  transport: TransportHandle,
}

impl EndpointTraceMapping {
  pub fn new() -> Self {
    Self::default()
  }

  /// Fetches the remote process's trace-id → name mapping.
  pub fn mapping(&self) -> Result<ProcessTraceMap, TransportError> {
    let transport = self.transport.get()?;
    let response = transport
      .request(Self::NAME, &[MAPPING_REQUEST])?
      .wait(REQUEST_WAIT_BUDGET)?;
    let reply: MappingReply =
      serde_cbor::from_slice(&response).map_err(|_| TransportError::Protocol)?;

    let mut result = ProcessTraceMap::new();
    for (pid, ids) in reply.mapping {
      let Ok(pid) = pid.parse::<u32>() else { continue };
      let entry = result.entry(pid).or_default();
      for (trace_id, name) in ids {
        if let Ok(trace_id) = trace_id.parse::<u32>() {
          entry.insert(trace_id, name);
        }
      }
    }
    Ok(result)
  }
}

impl Endpoint for EndpointTraceMapping {
  fn name(&self) -> &str {
    Self::NAME
  }

  fn handle(&self, _transport: &dyn Transport, request: &[u8]) -> Option<Vec<u8>> {
    if request.first() != Some(&MAPPING_REQUEST) {
      return None;
    }

    let ids: BTreeMap<String, String> = StaticStringTracker::global()
      .map()
      .into_iter()
      .map(|(trace_id, name)| (trace_id.to_string(), name))
      .collect();
    let mut mapping = BTreeMap::new();
    mapping.insert(std::process::id().to_string(), ids);

    serde_cbor::to_vec(&MappingReply { mapping }).ok()
  }

  fn set_transport(&self, transport: Weak<dyn Transport>) {
    self.transport.set(transport);
  }

  fn as_any_arc(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
    self
  }
}

impl EndpointName for EndpointTraceMapping {
  const NAME: &'static str = "scope_tracing";
}
