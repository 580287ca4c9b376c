//! The `process_info` endpoint describes the serving process: pid, a
//! user-chosen process name and the names of its known threads.

use serde::{Deserialize, Serialize};
use std::any::Any;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, Weak};

use tracing::debug;

use crate::endpoints::{Endpoint, EndpointName, TransportHandle};
use crate::thread_name::ThreadNameTracker;
use crate::transport::{Transport, TransportError, REQUEST_WAIT_BUDGET};

/// What a peer knows about one process.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessInfo {
  pub pid: u32,
  pub name: String,
  pub threads: HashMap<u64, String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct InfoRequest {
  cmd: String,
}

/// Thread ids travel as decimal strings so the payload stays a
/// string-keyed map.
#[derive(Debug, Serialize, Deserialize)]
struct InfoReply {
  pid: u32,
  name: String,
  threads: BTreeMap<String, String>,
}

#[derive(Debug, Default)]
pub struct EndpointProcessInfo {
  process_name: Mutex<String>,
  transport: TransportHandle,
}

impl EndpointProcessInfo {
  pub fn new() -> Self {
    Self::default()
  }

  /// Sets the name this process reports about itself.
  pub fn set_process_name(&self, name: &str) {
    *self.process_name.lock().unwrap() = name.to_string();
  }

  /// Fetches the remote process description.
  pub fn process_info(&self) -> Result<ProcessInfo, TransportError> {
    let transport = self.transport.get()?;
    let request = serde_cbor::to_vec(&InfoRequest {
      cmd: "info".to_string(),
    })
    .map_err(|_| TransportError::Protocol)?;

    let response = transport.request(Self::NAME, &request)?.wait(REQUEST_WAIT_BUDGET)?;
    let reply: InfoReply =
      serde_cbor::from_slice(&response).map_err(|_| TransportError::Protocol)?;

    let mut threads = HashMap::new();
    for (tid, name) in reply.threads {
      match tid.parse::<u64>() {
        Ok(tid) => {
          threads.insert(tid, name);
        },
        Err(_) => debug!(%tid, "skipping unparsable thread id"),
      }
    }

    Ok(ProcessInfo {
      pid: reply.pid,
      name: reply.name,
      threads,
    })
  }
}

impl Endpoint for EndpointProcessInfo {
  fn name(&self) -> &str {
    Self::NAME
  }

  fn handle(&self, _transport: &dyn Transport, request: &[u8]) -> Option<Vec<u8>> {
    let request: InfoRequest = serde_cbor::from_slice(request).ok()?;
    if request.cmd != "info" {
      return None;
    }

    let threads = ThreadNameTracker::global()
      .map()
      .into_iter()
      .map(|(tid, name)| (tid.to_string(), name))
      .collect();
    let reply = InfoReply {
      pid: std::process::id(),
      name: self.process_name.lock().unwrap().clone(),
      threads,
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

impl EndpointName for EndpointProcessInfo {
  const NAME: &'static str = "process_info";
}
