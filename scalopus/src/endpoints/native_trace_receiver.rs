//! The `native_trace_receiver` endpoint is the consumer-side counterpart of
//! the sender: it takes broadcast trace chunks off the transport and hands
//! them to whatever callback was registered, typically a provider's
//! `incoming`.

use std::any::Any;
use std::sync::Arc;

use crate::endpoints::{Endpoint, EndpointName};
use crate::transport::Transport;

type FrameCallback = Box<dyn Fn(&[u8]) + Send + Sync>;

pub struct EndpointNativeTraceReceiver {
  callback: FrameCallback,
}

impl EndpointNativeTraceReceiver {
  pub fn new(callback: impl Fn(&[u8]) + Send + Sync + 'static) -> Self {
    Self {
      callback: Box::new(callback),
    }
  }
}

impl Endpoint for EndpointNativeTraceReceiver {
  fn name(&self) -> &str {
    Self::NAME
  }

  fn handle_unsolicited(&self, _transport: &dyn Transport, payload: &[u8]) -> Option<Vec<u8>> {
    (self.callback)(payload);
    None
  }

  fn as_any_arc(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
    self
  }
}

impl EndpointName for EndpointNativeTraceReceiver {
  const NAME: &'static str = "native_trace_receiver";
}

impl std::fmt::Debug for EndpointNativeTraceReceiver {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("EndpointNativeTraceReceiver").finish_non_exhaustive()
  }
}
