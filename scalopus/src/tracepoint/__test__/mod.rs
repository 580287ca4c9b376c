#[cfg(test)]
mod __test__ {

  use crate::name_registry::StaticStringTracker;
  use crate::tracepoint::{named_id, site_id};
  use crate::{
    trace_counter_series, trace_function, trace_scope_end, trace_scope_raii, trace_scope_start,
  };

  #[test]
  fn test_site_ids_differ_by_line() {
    let a = site_id("src/foo.rs", 10);
    let b = site_id("src/foo.rs", 11);
    let c = site_id("src/bar.rs", 10);
    assert_ne!(a, b);
    assert_ne!(a, c);
    assert_eq!(a, site_id("src/foo.rs", 10));
  }

  #[test]
  fn test_named_ids_pair_across_lines() {
    // A start/end pair in one file agrees on the id no matter where the two
    // macro sites sit.
    assert_eq!(named_id("src/foo.rs", "stage"), named_id("src/foo.rs", "stage"));
    assert_ne!(named_id("src/foo.rs", "stage"), named_id("src/foo.rs", "other"));
    assert_ne!(named_id("src/foo.rs", "stage"), named_id("src/bar.rs", "stage"));
  }

  #[test]
  fn test_scope_macro_registers_name_once() {
    for _ in 0..3 {
      trace_scope_raii!("macro_registration_probe");
    }

    let registered: Vec<String> = StaticStringTracker::global()
      .map()
      .into_values()
      .filter(|name| name == "macro_registration_probe")
      .collect();
    assert_eq!(registered.len(), 1);
  }

  #[test]
  fn test_counter_series_macro_registers_joined_name() {
    trace_counter_series!("probe_counter", "fast", 3);
    trace_counter_series!("probe_counter", "slow", 4);

    let names: Vec<String> = StaticStringTracker::global().map().into_values().collect();
    assert!(names.iter().any(|n| n == "probe_counter_fast"));
    assert!(names.iter().any(|n| n == "probe_counter_slow"));
  }

  #[test]
  fn test_start_end_share_one_registration() {
    trace_scope_start!("paired_stage_probe");
    trace_scope_end!("paired_stage_probe");

    let registered: Vec<String> = StaticStringTracker::global()
      .map()
      .into_values()
      .filter(|name| name == "paired_stage_probe")
      .collect();
    assert_eq!(registered.len(), 1);
  }

  #[test]
  fn test_function_macro_registers_enclosing_function() {
    trace_function!();

    let names: Vec<String> = StaticStringTracker::global().map().into_values().collect();
    assert!(names
      .iter()
      .any(|n| n.ends_with("test_function_macro_registers_enclosing_function")));
  }
}
