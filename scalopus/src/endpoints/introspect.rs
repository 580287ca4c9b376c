//! The `introspect` endpoint answers with the endpoint names its transport
//! currently carries, so a connecting peer can find out what it can talk to.

use serde::{Deserialize, Serialize};
use std::any::Any;
use std::sync::{Arc, Weak};

use crate::endpoints::{Endpoint, EndpointName, TransportHandle};
use crate::transport::{Transport, TransportError, REQUEST_WAIT_BUDGET};

#[derive(Debug, Serialize, Deserialize)]
struct IntrospectReply {
  endpoints: Vec<String>,
}

#[derive(Debug, Default)]
pub struct EndpointIntrospect {
  transport: TransportHandle,
}

impl EndpointIntrospect {
  pub fn new() -> Self {
    Self::default()
  }

  /// Asks the remote side which endpoints it supports.
  pub fn supported(&self) -> Result<Vec<String>, TransportError> {
    let transport = self.transport.get()?;
    let response = transport.request(Self::NAME, &[])?.wait(REQUEST_WAIT_BUDGET)?;
    let reply: IntrospectReply =
      serde_cbor::from_slice(&response).map_err(|_| TransportError::Protocol)?;
    Ok(reply.endpoints)
  }
}

impl Endpoint for EndpointIntrospect {
  fn name(&self) -> &str {
    Self::NAME
  }

  fn handle(&self, transport: &dyn Transport, _request: &[u8]) -> Option<Vec<u8>> {
    let reply = IntrospectReply {
      endpoints: transport.endpoint_names(),
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

impl EndpointName for EndpointIntrospect {
  const NAME: &'static str = "introspect";
}
