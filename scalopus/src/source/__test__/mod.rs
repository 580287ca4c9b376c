#[cfg(test)]
mod __test__ {

  use crate::collector::{EventKind, TraceEvent};
  use crate::endpoints::{
    wire_event, Endpoint, EndpointIntrospect, EndpointProcessInfo, EndpointTraceMapping,
    TraceChunk,
  };
  use crate::manager::EndpointManagerPoll;
  use crate::name_registry::StaticStringTracker;
  use crate::provider::{GeneralProvider, NativeTraceProvider, TraceEventProvider};
  use crate::source::TraceEventSource;
  use crate::transport::loopback::LoopbackFactory;
  use crate::transport::{add_endpoint, TransportFactory};

  use std::sync::Arc;

  // Trace ids reserved for these tests; the registry is process-global.
  const ID_FAST: u32 = 0x5_0000_01;
  const ID_SLOW: u32 = 0x5_0000_02;
  const ID_SCOPE: u32 = 0x5_0000_03;

  /// A manager connected to a loopback peer that serves this process's
  /// trace mapping and process info.
  fn managed_setup() -> (Arc<LoopbackFactory>, Arc<dyn crate::transport::Transport>, Arc<EndpointManagerPoll>) {
    let factory = Arc::new(LoopbackFactory::new());
    let server = factory.serve().unwrap();
    add_endpoint(&server, Arc::new(EndpointIntrospect::new()));
    add_endpoint(&server, Arc::new(EndpointTraceMapping::new()));
    let process_info = Arc::new(EndpointProcessInfo::new());
    process_info.set_process_name("source_test_process");
    add_endpoint(&server, process_info);

    let manager = EndpointManagerPoll::new(Arc::clone(&factory) as Arc<dyn TransportFactory>);
    manager.add_endpoint_factory(
      "scope_tracing",
      Box::new(|_| Some(Arc::new(EndpointTraceMapping::new()) as Arc<dyn Endpoint>)),
    );
    manager.add_endpoint_factory(
      "process_info",
      Box::new(|_| Some(Arc::new(EndpointProcessInfo::new()) as Arc<dyn Endpoint>)),
    );
    manager.manage();

    (factory, server, manager)
  }

  fn counter(timestamp_ns: u64, trace_id: u32, value: i64) -> TraceEvent {
    TraceEvent {
      timestamp_ns,
      trace_id,
      kind: EventKind::Counter,
      value,
    }
  }

  fn payload(tid: u64, events: &[TraceEvent]) -> Vec<u8> {
    let chunk = TraceChunk {
      pid: std::process::id(),
      events: vec![(tid, events.iter().copied().map(wire_event).collect())],
    };
    serde_cbor::to_vec(&chunk).unwrap()
  }

  #[test]
  fn test_counter_series_fill_forward() {
    StaticStringTracker::global().insert(ID_FAST, "sinusoids_fast");
    StaticStringTracker::global().insert(ID_SLOW, "sinusoids_slow");

    let (_factory, _server, manager) = managed_setup();
    let provider = NativeTraceProvider::new(&manager);
    let source = provider.make_native_source();

    source.start_interval();
    source.add_data(
      payload(
        1,
        &[
          counter(1_000, ID_FAST, 3),
          counter(2_000, ID_SLOW, 100),
          counter(3_000, ID_FAST, 4),
          counter(4_000, ID_SLOW, 101),
        ],
      )
      .into(),
    );
    let events = source.finish_interval();

    assert_eq!(events.len(), 4);
    for event in &events {
      assert_eq!(event["ph"], "C");
      assert_eq!(event["name"], "sinusoids");
      // Every counter event carries every series seen in the interval.
      assert!(event["args"]["fast"].is_i64(), "fast missing in {}", event);
      assert!(event["args"]["slow"].is_i64(), "slow missing in {}", event);
    }

    // Present keys reflect the most recent emission at or before the
    // event; absent keys are filled from the nearest value in the interval.
    assert_eq!(events[0]["args"]["fast"], 3);
    assert_eq!(events[0]["args"]["slow"], 100);
    assert_eq!(events[1]["args"]["fast"], 3);
    assert_eq!(events[1]["args"]["slow"], 100);
    assert_eq!(events[2]["args"]["fast"], 4);
    assert_eq!(events[2]["args"]["slow"], 100);
    assert_eq!(events[3]["args"]["fast"], 4);
    assert_eq!(events[3]["args"]["slow"], 101);
  }

  #[test]
  fn test_single_series_counter_uses_name_for_both() {
    let (_factory, _server, manager) = managed_setup();
    let provider = NativeTraceProvider::new(&manager);
    let source = provider.make_native_source();

    // No underscore in the resolved name: "beans" is counter and series.
    StaticStringTracker::global().insert(0x5_0000_04, "beans");
    source.start_interval();
    source.add_data(payload(2, &[counter(500, 0x5_0000_04, 7)]).into());
    let events = source.finish_interval();

    assert_eq!(events.len(), 1);
    assert_eq!(events[0]["name"], "beans");
    assert_eq!(events[0]["args"]["beans"], 7);
  }

  #[test]
  fn test_events_are_sorted_by_timestamp() {
    StaticStringTracker::global().insert(ID_SCOPE, "scope_sort_probe");

    let (_factory, _server, manager) = managed_setup();
    let provider = NativeTraceProvider::new(&manager);
    let source = provider.make_native_source();

    source.start_interval();
    // Two threads with interleaved, out-of-order timestamps.
    let chunk = TraceChunk {
      pid: std::process::id(),
      events: vec![
        (
          1,
          vec![
            wire_event(TraceEvent {
              timestamp_ns: 5_000,
              trace_id: ID_SCOPE,
              kind: EventKind::ScopeExit,
              value: 0,
            }),
            wire_event(TraceEvent {
              timestamp_ns: 1_000,
              trace_id: ID_SCOPE,
              kind: EventKind::ScopeEntry,
              value: 0,
            }),
          ],
        ),
        (
          2,
          vec![wire_event(TraceEvent {
            timestamp_ns: 3_000,
            trace_id: ID_SCOPE,
            kind: EventKind::MarkGlobal,
            value: 0,
          })],
        ),
      ],
    };
    source.add_data(serde_cbor::to_vec(&chunk).unwrap().into());
    let events = source.finish_interval();

    let timestamps: Vec<f64> = events.iter().map(|e| e["ts"].as_f64().unwrap()).collect();
    assert_eq!(timestamps, vec![1.0, 3.0, 5.0]);
    assert_eq!(events[0]["ph"], "B");
    assert_eq!(events[0]["name"], "scope_sort_probe");
    assert_eq!(events[1]["ph"], "i");
    assert_eq!(events[1]["s"], "g");
    assert_eq!(events[2]["ph"], "E");
  }

  #[test]
  fn test_undecodable_frames_are_skipped() {
    let (_factory, _server, manager) = managed_setup();
    let provider = NativeTraceProvider::new(&manager);
    let source = provider.make_native_source();

    source.start_interval();
    source.add_data(Arc::from(&b"definitely not cbor"[..]));
    source.add_data(payload(1, &[counter(1_000, ID_FAST, 1)]).into());
    let events = source.finish_interval();

    // The broken frame is dropped, the good one survives.
    assert_eq!(events.len(), 1);
  }

  #[test]
  fn test_unknown_event_kind_is_skipped() {
    let (_factory, _server, manager) = managed_setup();
    let provider = NativeTraceProvider::new(&manager);
    let source = provider.make_native_source();

    source.start_interval();
    let chunk = TraceChunk {
      pid: std::process::id(),
      events: vec![(1, vec![(1_000, ID_SCOPE, 99, 0), (2_000, ID_SCOPE, 1, 0)])],
    };
    source.add_data(serde_cbor::to_vec(&chunk).unwrap().into());
    let events = source.finish_interval();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0]["ph"], "B");
  }

  #[test]
  fn test_general_source_emits_metadata() {
    crate::trace_thread_name!("source_meta_thread");
    let my_tid = crate::utils::current_tid();

    let (_factory, _server, manager) = managed_setup();
    let provider = GeneralProvider::new(&manager);
    let source = provider.make_source();

    let events = source.finish_interval();

    let process_event = events
      .iter()
      .find(|e| e["name"] == "process_name")
      .expect("process metadata present");
    assert_eq!(process_event["ph"], "M");
    assert_eq!(process_event["pid"], std::process::id());
    assert_eq!(process_event["tid"], 0);
    assert_eq!(process_event["args"]["name"], "source_test_process");

    let thread_event = events
      .iter()
      .find(|e| e["name"] == "thread_name" && e["tid"] == my_tid)
      .expect("thread metadata present");
    assert_eq!(thread_event["args"]["name"], "source_meta_thread");
  }
}
