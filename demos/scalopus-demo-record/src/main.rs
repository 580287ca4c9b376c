//! The consumer side: discovers traced processes on this machine, records
//! a two second interval from all of them and writes the merged Catapult
//! JSON trace into the current directory.

use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use scalopus::endpoints::{
  Endpoint, EndpointName, EndpointNativeTraceReceiver, EndpointProcessInfo, EndpointTraceMapping,
};
use scalopus::manager::EndpointManagerPoll;
use scalopus::provider::{GeneralProvider, NativeTraceProvider};
use scalopus::recorder::TraceRecorder;
use scalopus::transport::unix::UnixTransportFactory;
use scalopus::transport::TransportFactory;

fn main() {
  tracing_subscriber::fmt::init();

  let factory = Arc::new(UnixTransportFactory::new());
  let manager = EndpointManagerPoll::new(Arc::clone(&factory) as Arc<dyn TransportFactory>);

  let native = NativeTraceProvider::new(&manager);
  let general = GeneralProvider::new(&manager);

  manager.add_endpoint_factory(EndpointNativeTraceReceiver::NAME, native.endpoint_factory());
  manager.add_endpoint_factory(
    EndpointTraceMapping::NAME,
    Box::new(|_| Some(Arc::new(EndpointTraceMapping::new()) as Arc<dyn Endpoint>)),
  );
  manager.add_endpoint_factory(
    EndpointProcessInfo::NAME,
    Box::new(|_| Some(Arc::new(EndpointProcessInfo::new()) as Arc<dyn Endpoint>)),
  );

  manager.manage();
  manager.start_polling(Duration::from_secs(1));

  let peers = manager.endpoints().len();
  if peers == 0 {
    tracing::warn!("no traced processes found, is a demo running?");
  } else {
    tracing::info!(peers, "recording from discovered processes");
  }

  let recorder = TraceRecorder::new();
  recorder.add_provider(native);
  recorder.add_provider(general);
  recorder.start();
  recorder.start_interval();

  thread::sleep(Duration::from_secs(2));

  match recorder.dump_timestamped(Path::new(".")) {
    Ok(path) => tracing::info!(path = %path.display(), "trace written, open it in chrome://tracing"),
    Err(error) => tracing::error!(%error, "could not write the trace"),
  }

  manager.stop_polling();
}
