#[cfg(test)]
mod __test__ {

  use crate::endpoints::{
    find_endpoint, Endpoint, EndpointProcessInfo, EndpointTraceConfigurator,
    EndpointTraceMapping, TraceConfiguration,
  };
  use crate::trace_config::TraceConfigurator;
  use crate::transport::loopback::LoopbackTransport;
  use crate::transport::{add_endpoint, EndpointMap, Transport};
  use crate::utils::current_tid;

  use std::sync::Arc;

  fn configurator_pair() -> (
    Arc<dyn Transport>,
    Arc<dyn Transport>,
    Arc<EndpointTraceConfigurator>,
  ) {
    let server = LoopbackTransport::serve();
    let server_dyn: Arc<dyn Transport> = server.clone();
    add_endpoint(&server_dyn, Arc::new(EndpointTraceConfigurator::new()));

    // The client transport must outlive the endpoint's weak back reference.
    let client: Arc<dyn Transport> = LoopbackTransport::connect(&server);
    let endpoint = Arc::new(EndpointTraceConfigurator::new());
    endpoint.set_transport(Arc::downgrade(&client));
    (server_dyn, client, endpoint)
  }

  #[test]
  fn test_configurator_toggles_own_thread_flag() {
    let (_server, _client, endpoint) = configurator_pair();
    let tid = current_tid();

    // Register this thread with the global configurator first.
    TraceConfigurator::global().thread_state_handle(tid);

    let (state, success) = endpoint
      .set_state(TraceConfiguration::default().with_thread(tid, false))
      .unwrap();
    assert!(success);
    assert_eq!(state.thread_state.get(&tid.to_string()), Some(&false));
    assert!(!TraceConfigurator::global().thread_state(tid));

    // Restore; other emissions from this thread should stay enabled.
    let (state, success) = endpoint
      .set_state(TraceConfiguration::default().with_thread(tid, true))
      .unwrap();
    assert!(success);
    assert_eq!(state.thread_state.get(&tid.to_string()), Some(&true));
  }

  #[test]
  fn test_configurator_unknown_thread_is_a_conflict() {
    let (_server, _client, endpoint) = configurator_pair();

    // Nobody has this tid; the endpoint reports the conflict but still
    // answers with the current state.
    let (_state, success) = endpoint
      .set_state(TraceConfiguration::default().with_thread(u64::MAX, false))
      .unwrap();
    assert!(!success);
  }

  #[test]
  fn test_configurator_get_reports_current_state() {
    let (_server, _client, endpoint) = configurator_pair();
    let tid = current_tid();
    TraceConfigurator::global().thread_state_handle(tid);

    let state = endpoint.get_state().unwrap();
    assert!(state.thread_state.contains_key(&tid.to_string()));
    assert!(!state.set_process_state);
    assert!(!state.set_new_thread_state);
  }

  #[test]
  fn test_configurator_rejects_malformed_payload() {
    let server = LoopbackTransport::serve();
    let endpoint = EndpointTraceConfigurator::new();
    assert!(endpoint.handle(&*server, b"not cbor at all").is_none());
  }

  #[test]
  fn test_mapping_endpoint_rejects_unknown_request_byte() {
    let server = LoopbackTransport::serve();
    let endpoint = EndpointTraceMapping::new();
    assert!(endpoint.handle(&*server, b"x").is_none());
    assert!(endpoint.handle(&*server, b"").is_none());
  }

  #[test]
  fn test_process_info_rejects_unknown_command() {
    let server = LoopbackTransport::serve();
    let endpoint = EndpointProcessInfo::new();
    let request = serde_cbor::to_vec(&serde_cbor::Value::Map(
      [(
        serde_cbor::Value::Text("cmd".to_string()),
        serde_cbor::Value::Text("selfdestruct".to_string()),
      )]
      .into_iter()
      .collect(),
    ))
    .unwrap();
    assert!(endpoint.handle(&*server, &request).is_none());
  }

  #[test]
  fn test_find_endpoint_downcasts_by_name() {
    let mut endpoints = EndpointMap::new();
    let mapping = Arc::new(EndpointTraceMapping::new());
    endpoints.insert("scope_tracing".to_string(), mapping as Arc<dyn Endpoint>);

    assert!(find_endpoint::<EndpointTraceMapping>(&endpoints).is_some());
    assert!(find_endpoint::<EndpointProcessInfo>(&endpoints).is_none());
  }
}
