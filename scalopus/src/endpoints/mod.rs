//! # Endpoints
//!
//! An endpoint is a named handler living on a transport. On the serving
//! side it answers correlated requests through [`Endpoint::handle`]; on the
//! connecting side it receives broadcasts through
//! [`Endpoint::handle_unsolicited`] and wraps the request/response exchange
//! in typed client methods.
//!
//! Returning `None` from a handler means "no response": nothing goes back
//! on the wire and the peer's pending request runs into its wait budget.
//! Malformed payloads are answered that way too.

mod __test__;

mod introspect;
mod native_trace_receiver;
mod native_trace_sender;
mod process_info;
mod trace_configurator;
mod trace_mapping;

pub use introspect::EndpointIntrospect;
pub use native_trace_receiver::EndpointNativeTraceReceiver;
pub use native_trace_sender::{wire_event, EndpointNativeTraceSender, TraceChunk, WireEvent};
pub use process_info::{EndpointProcessInfo, ProcessInfo};
pub use trace_configurator::{EndpointTraceConfigurator, TraceConfiguration};
pub use trace_mapping::{EndpointTraceMapping, ProcessTraceMap};

use std::any::Any;
use std::sync::{Arc, Weak};

use crate::transport::{EndpointMap, Transport};

/// A named request/broadcast handler owned by a transport.
///
/// Endpoints may hold a weak back reference to their transport (to issue
/// broadcasts or requests); the transport owns the endpoint, never the
/// other way around.
pub trait Endpoint: Send + Sync + 'static {
  /// The wire name requests are routed by.
  fn name(&self) -> &str;

  /// Handles a correlated request on the serving side. `None` sends nothing
  /// back.
  fn handle(&self, transport: &dyn Transport, request: &[u8]) -> Option<Vec<u8>> {
    let _ = (transport, request);
    None
  }

  /// Handles a broadcast frame on the connecting side. A returned payload
  /// is sent back with the originating request id but is not correlated.
  fn handle_unsolicited(&self, transport: &dyn Transport, payload: &[u8]) -> Option<Vec<u8>> {
    let _ = (transport, payload);
    None
  }

  /// Hands the endpoint the weak back reference to the transport it was
  /// registered on.
  fn set_transport(&self, transport: Weak<dyn Transport>) {
    let _ = transport;
  }

  /// Escape hatch for [`find_endpoint`]'s typed downcast.
  fn as_any_arc(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

/// Compile-time wire name of a concrete endpoint type.
pub trait EndpointName {
  const NAME: &'static str;
}

/// Weak transport back reference shared by the endpoints that need to reach
/// their transport from client methods or worker threads.
#[derive(Clone, Default)]
pub(crate) struct TransportHandle {
  inner: std::sync::Arc<std::sync::Mutex<Option<Weak<dyn Transport>>>>,
}

impl TransportHandle {
  pub fn set(&self, transport: Weak<dyn Transport>) {
    *self.inner.lock().unwrap() = Some(transport);
  }

  /// Upgrades the back reference, failing with `Disconnected` when no
  /// transport was set or the transport is gone.
  pub fn get(&self) -> Result<Arc<dyn Transport>, crate::transport::TransportError> {
    self
      .inner
      .lock()
      .unwrap()
      .as_ref()
      .and_then(Weak::upgrade)
      .ok_or(crate::transport::TransportError::Disconnected)
  }
}

impl std::fmt::Debug for TransportHandle {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("TransportHandle").finish_non_exhaustive()
  }
}

/// Looks up the endpoint `T` registered under its static name and downcasts
/// it, so callers get the typed client API back out of an endpoint map.
pub fn find_endpoint<T: Endpoint + EndpointName>(endpoints: &EndpointMap) -> Option<Arc<T>> {
  let endpoint = endpoints.get(T::NAME)?;
  Arc::clone(endpoint).as_any_arc().downcast::<T>().ok()
}
