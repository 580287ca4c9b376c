//! A traced process: exposes the trace endpoints on the abstract unix
//! socket of this pid and emits scopes, marks and counters forever.
//!
//! Run `scalopus-demo-record` in a second terminal to capture an interval
//! and produce a Catapult JSON file for `chrome://tracing`.

use std::thread;
use std::time::Duration;

use scalopus::exposer::Exposer;
use scalopus::{
  trace_counter_series, trace_function, trace_mark_process, trace_scope_raii, trace_thread_name,
};

fn main() {
  tracing_subscriber::fmt::init();

  let exposer = Exposer::new("tracepoints-demo").expect("could not serve trace endpoints");
  tracing::info!(pid = std::process::id(), "tracepoints demo serving");
  drop_guard_demo(exposer);
}

fn drop_guard_demo(_exposer: Exposer) {
  trace_thread_name!("main");

  thread::spawn(|| {
    trace_thread_name!("churn");
    for i in 0..u64::MAX {
      churn(i);
    }
  });

  let mut i: i64 = 0;
  loop {
    iteration(i);
    i += 1;
    if i % 64 == 0 {
      trace_mark_process!("checkpoint");
    }
  }
}

fn iteration(i: i64) {
  trace_scope_raii!("iteration");

  fast_path();
  if i % 4 == 0 {
    slow_path();
  }

  trace_counter_series!("load", "fast", (i * 7) % 13);
  trace_counter_series!("load", "slow", (i * 3) % 11);
  thread::sleep(Duration::from_millis(20));
}

fn fast_path() {
  trace_function!();
  thread::sleep(Duration::from_millis(2));
}

fn slow_path() {
  trace_function!();
  thread::sleep(Duration::from_millis(10));
}

fn churn(i: u64) {
  trace_scope_raii!("churn");
  thread::sleep(Duration::from_millis(5 + (i % 7)));
}
