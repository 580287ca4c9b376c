#[cfg(test)]
mod __test__ {

  use crate::endpoints::{wire_event, ProcessTraceMap, TraceChunk};
  use crate::collector::{EventKind, TraceEvent};
  use crate::manager::EndpointManagerPoll;
  use crate::provider::{NativeTraceProvider, ScopeTracingProvider};
  use crate::source::TraceEventSource;
  use crate::transport::loopback::{LoopbackFactory, LoopbackTransport};

  use std::sync::Arc;

  fn empty_manager() -> Arc<EndpointManagerPoll> {
    EndpointManagerPoll::new(Arc::new(LoopbackFactory::new()))
  }

  fn chunk_payload(pid: u32, tid: u64, events: &[TraceEvent]) -> Vec<u8> {
    let chunk = TraceChunk {
      pid,
      events: vec![(tid, events.iter().copied().map(wire_event).collect())],
    };
    serde_cbor::to_vec(&chunk).unwrap()
  }

  fn scope_event(timestamp_ns: u64, trace_id: u32, kind: EventKind) -> TraceEvent {
    TraceEvent {
      timestamp_ns,
      trace_id,
      kind,
      value: 0,
    }
  }

  #[test]
  fn test_scope_name_lookup_and_fallback() {
    let mut mapping = ProcessTraceMap::new();
    mapping.entry(10).or_default().insert(1, "foo".to_string());

    assert_eq!(ScopeTracingProvider::scope_name(&mapping, 10, 1), "foo");
    assert_eq!(ScopeTracingProvider::scope_name(&mapping, 10, 31), "Unknown 0x1f");
    assert_eq!(ScopeTracingProvider::scope_name(&mapping, 99, 1), "Unknown 0x1");
  }

  #[test]
  fn test_incoming_only_reaches_recording_sources() {
    let manager = empty_manager();
    let provider = NativeTraceProvider::new(&manager);

    let recording = provider.make_native_source();
    let idle = provider.make_native_source();
    recording.start_interval();

    let payload = chunk_payload(
      1234,
      1,
      &[
        scope_event(1_000, 5, EventKind::ScopeEntry),
        scope_event(2_000, 5, EventKind::ScopeExit),
      ],
    );
    provider.incoming(&payload);

    let recorded = recording.finish_interval();
    assert_eq!(recorded.len(), 2);
    assert_eq!(recorded[0]["ph"], "B");
    assert_eq!(recorded[1]["ph"], "E");
    assert_eq!(recorded[0]["name"], "Unknown 0x5");
    assert_eq!(recorded[0]["pid"], 1234);
    assert_eq!(recorded[0]["tid"], 1);

    assert!(idle.finish_interval().is_empty());
  }

  #[test]
  fn test_frames_outside_the_interval_are_dropped() {
    let manager = empty_manager();
    let provider = NativeTraceProvider::new(&manager);
    let source = provider.make_native_source();

    let payload = chunk_payload(1, 1, &[scope_event(1_000, 1, EventKind::ScopeEntry)]);

    // Before the interval.
    provider.incoming(&payload);
    source.start_interval();
    let events = source.finish_interval();
    assert!(events.is_empty());

    // After the interval: stop first, then deliver.
    source.start_interval();
    source.stop_interval();
    provider.incoming(&payload);
    assert!(source.finish_interval().is_empty());
  }

  #[test]
  fn test_receive_endpoint_forwards_into_provider() {
    let manager = empty_manager();
    let provider = NativeTraceProvider::new(&manager);
    let source = provider.make_native_source();
    source.start_interval();

    let endpoint = provider.receive_endpoint();
    let dummy = LoopbackTransport::serve();
    let payload = chunk_payload(7, 3, &[scope_event(500, 2, EventKind::MarkThread)]);
    assert!(endpoint.handle_unsolicited(&*dummy, &payload).is_none());

    let events = source.finish_interval();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0]["ph"], "i");
    assert_eq!(events[0]["s"], "t");
  }

  #[test]
  fn test_endpoint_factory_outlives_provider_gracefully() {
    let manager = empty_manager();
    let provider = NativeTraceProvider::new(&manager);
    let factory = provider.endpoint_factory();

    let transport: Arc<dyn crate::transport::Transport> = LoopbackTransport::serve();
    assert!(factory(&transport).is_some());

    drop(provider);
    assert!(factory(&transport).is_none());
  }

  #[test]
  fn test_dropped_sources_are_pruned() {
    let manager = empty_manager();
    let provider = NativeTraceProvider::new(&manager);

    let source = provider.make_native_source();
    source.start_interval();
    drop(source);

    // Must not panic or deliver to the dropped source.
    let payload = chunk_payload(1, 1, &[scope_event(1_000, 1, EventKind::ScopeEntry)]);
    provider.incoming(&payload);
  }
}
