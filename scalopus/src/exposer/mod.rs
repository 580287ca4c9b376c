//! # Exposer
//!
//! One-call server bootstrap for a traced process: serves a transport and
//! registers the standard endpoints (introspect, process info, trace
//! mapping, trace configurator and the native trace sender with its drain
//! thread). Keep the exposer alive for as long as the process should be
//! reachable.


use std::sync::Arc;

use crate::endpoints::{
  EndpointIntrospect, EndpointNativeTraceSender, EndpointProcessInfo, EndpointTraceConfigurator,
  EndpointTraceMapping,
};
use crate::transport::unix::UnixTransportFactory;
use crate::transport::{add_endpoint, Transport, TransportError, TransportFactory};

pub struct Exposer {
  transport: Arc<dyn Transport>,
}

impl Exposer {
  /// Serves the default unix transport of this process.
  pub fn new(process_name: &str) -> Result<Self, TransportError> {
    Self::with_factory(&UnixTransportFactory::new(), process_name)
  }

  /// Serves through `factory`; lets tests and embedded setups substitute
  /// the loopback flavour.
  pub fn with_factory(
    factory: &dyn TransportFactory,
    process_name: &str,
  ) -> Result<Self, TransportError> {
    let transport = factory.serve()?;

    add_endpoint(&transport, Arc::new(EndpointIntrospect::new()));

    let process_info = Arc::new(EndpointProcessInfo::new());
    process_info.set_process_name(process_name);
    add_endpoint(&transport, process_info);

    add_endpoint(&transport, Arc::new(EndpointTraceMapping::new()));
    add_endpoint(&transport, Arc::new(EndpointTraceConfigurator::new()));
    add_endpoint(&transport, Arc::new(EndpointNativeTraceSender::new()));

    Ok(Self { transport })
  }

  pub fn transport(&self) -> &Arc<dyn Transport> {
    &self.transport
  }
}

impl std::fmt::Debug for Exposer {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Exposer")
      .field("endpoints", &self.transport.endpoint_names())
      .finish()
  }
}
