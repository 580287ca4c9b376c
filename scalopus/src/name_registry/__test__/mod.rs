#[cfg(test)]
mod __test__ {

  use crate::name_registry::StaticStringTracker;

  #[test]
  fn test_insert_and_get() {
    let tracker = StaticStringTracker::new();
    assert!(tracker.is_empty());

    tracker.insert(0, "foo");
    tracker.insert(1, "bar");
    tracker.insert(2, "buz");

    assert_eq!(tracker.get(0).as_deref(), Some("foo"));
    assert_eq!(tracker.get(1).as_deref(), Some("bar"));
    assert_eq!(tracker.get(2).as_deref(), Some("buz"));
    assert_eq!(tracker.get(3), None);
    assert_eq!(tracker.len(), 3);
  }

  #[test]
  fn test_last_registration_wins() {
    let tracker = StaticStringTracker::new();
    tracker.insert(5, "first");
    tracker.insert(5, "second");
    assert_eq!(tracker.get(5).as_deref(), Some("second"));
    assert_eq!(tracker.len(), 1);
  }

  #[test]
  fn test_snapshot_is_detached() {
    let tracker = StaticStringTracker::new();
    tracker.insert(1, "one");

    let snapshot = tracker.map();
    tracker.insert(2, "two");

    assert_eq!(snapshot.len(), 1);
    assert_eq!(tracker.len(), 2);
  }
}
