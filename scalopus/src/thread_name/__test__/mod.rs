#[cfg(test)]
mod __test__ {

  use crate::thread_name::ThreadNameTracker;
  use crate::utils::current_tid;

  #[test]
  fn test_set_and_snapshot() {
    let tracker = ThreadNameTracker::new();
    tracker.set_name(10, "worker");
    tracker.set_name(11, "drain");

    let map = tracker.map();
    assert_eq!(map.get(&10).map(String::as_str), Some("worker"));
    assert_eq!(map.get(&11).map(String::as_str), Some("drain"));
  }

  #[test]
  fn test_current_thread_name() {
    let tracker = ThreadNameTracker::new();
    tracker.set_current_thread_name("me");
    assert_eq!(
      tracker.map().get(&current_tid()).map(String::as_str),
      Some("me")
    );
  }
}
