//! # Endpoint Manager
//!
//! Discovers peers through a transport factory and materialises the typed
//! endpoints each peer supports. One pass ([`EndpointManagerPoll::manage`])
//! drops dead transports, asks the factory for the current destinations,
//! connects to new ones, queries their `introspect` endpoint and builds
//! every supported endpoint that has a registered factory closure.
//!
//! Factory closures capturing a provider must capture it weakly and return
//! `None` once the provider is gone; the manager never owns providers.


use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, warn};

use crate::endpoints::{Endpoint, EndpointIntrospect, EndpointName};
use crate::transport::{
  add_endpoint, Destination, EndpointMap, Transport, TransportFactory,
};

/// Builds the client-side endpoint for a freshly connected transport, or
/// `None` when the endpoint's backing object no longer exists.
pub type EndpointFactoryFn =
  Box<dyn Fn(&Arc<dyn Transport>) -> Option<Arc<dyn Endpoint>> + Send + Sync>;

struct PeerEntry {
  transport: Arc<dyn Transport>,
  endpoints: EndpointMap,
}

struct Inner {
  /// Live peers keyed by destination identity hash.
  peers: HashMap<u64, PeerEntry>,
  endpoint_factories: HashMap<String, EndpointFactoryFn>,
}

pub struct EndpointManagerPoll {
  factory: Arc<dyn TransportFactory>,
  inner: Mutex<Inner>,
  poller: Mutex<Option<(crossbeam_channel::Sender<()>, JoinHandle<()>)>>,
}

impl EndpointManagerPoll {
  pub fn new(factory: Arc<dyn TransportFactory>) -> Arc<Self> {
    let mut endpoint_factories: HashMap<String, EndpointFactoryFn> = HashMap::new();
    // Every peer speaks introspect; register it out of the box.
    endpoint_factories.insert(
      EndpointIntrospect::NAME.to_string(),
      Box::new(|_transport| Some(Arc::new(EndpointIntrospect::new()) as Arc<dyn Endpoint>)),
    );

    Arc::new(Self {
      factory,
      inner: Mutex::new(Inner {
        peers: HashMap::new(),
        endpoint_factories,
      }),
      poller: Mutex::new(None),
    })
  }

  /// Registers a factory closure for the endpoint `name`; it runs for each
  /// new peer that advertises the name.
  pub fn add_endpoint_factory(&self, name: &str, factory: EndpointFactoryFn) {
    self
      .inner
      .lock()
      .unwrap()
      .endpoint_factories
      .insert(name.to_string(), factory);
  }

  /// One discovery pass: prune dead peers, connect new destinations.
  pub fn manage(&self) {
    {
      let mut inner = self.inner.lock().unwrap();
      inner.peers.retain(|identity, entry| {
        let alive = entry.transport.is_connected();
        if !alive {
          debug!(identity = *identity, "cleaning up disconnected peer");
        }
        alive
      });
    }

    for destination in self.factory.discover() {
      self.connect(&*destination);
    }
  }

  /// Connects to `destination` unless it is already tracked. Returns true
  /// when a new peer was added.
  pub fn connect(&self, destination: &dyn Destination) -> bool {
    let identity = destination.identity();
    if self.inner.lock().unwrap().peers.contains_key(&identity) {
      return false;
    }

    debug!(%destination, "creating transport");
    let transport = match self.factory.connect(destination) {
      Ok(transport) => transport,
      Err(error) => {
        warn!(%destination, %error, "could not connect");
        return false;
      },
    };
    if !transport.is_connected() {
      warn!(%destination, "transport not connected after connect");
      return false;
    }

    // Ask the peer what it supports before touching our registry.
    let introspect = Arc::new(EndpointIntrospect::new());
    introspect.set_transport(Arc::downgrade(&transport));
    let supported = match introspect.supported() {
      Ok(supported) => supported,
      Err(error) => {
        warn!(%destination, %error, "introspection failed");
        return false;
      },
    };

    let mut endpoints: EndpointMap = HashMap::new();
    {
      let inner = self.inner.lock().unwrap();
      for name in supported {
        match inner.endpoint_factories.get(&name) {
          Some(factory) => match factory(&transport) {
            Some(endpoint) => {
              // Register on the transport as well so the endpoint receives
              // unsolicited broadcast data.
              add_endpoint(&transport, Arc::clone(&endpoint));
              endpoints.insert(name, endpoint);
            },
            None => debug!(%name, "endpoint factory returned nothing"),
          },
          None => debug!(%name, "peer supports an endpoint we do not"),
        }
      }
    }

    self
      .inner
      .lock()
      .unwrap()
      .peers
      .insert(identity, PeerEntry { transport, endpoints });
    true
  }

  /// Snapshot of the live peers and their endpoint maps.
  pub fn endpoints(&self) -> Vec<(Arc<dyn Transport>, EndpointMap)> {
    self
      .inner
      .lock()
      .unwrap()
      .peers
      .values()
      .map(|entry| (Arc::clone(&entry.transport), entry.endpoints.clone()))
      .collect()
  }

  /// Starts the polling thread: `manage()` then sleep, until stopped.
  pub fn start_polling(self: &Arc<Self>, interval: Duration) {
    self.stop_polling();

    let weak = Arc::downgrade(self);
    let (stop_tx, stop_rx) = crossbeam_channel::bounded::<()>(1);
    let handle = thread::Builder::new()
      .name("scalopus-endpoint-manager".to_string())
      .spawn(move || loop {
        let Some(manager) = weak.upgrade() else { break };
        manager.manage();
        drop(manager);

        match stop_rx.recv_timeout(interval) {
          Err(crossbeam_channel::RecvTimeoutError::Timeout) => {},
          Ok(()) | Err(crossbeam_channel::RecvTimeoutError::Disconnected) => break,
        }
      });

    match handle {
      Ok(handle) => *self.poller.lock().unwrap() = Some((stop_tx, handle)),
      Err(error) => warn!(%error, "could not spawn polling thread"),
    }
  }

  /// Stops and joins the polling thread.
  pub fn stop_polling(&self) {
    if let Some((stop_tx, handle)) = self.poller.lock().unwrap().take() {
      let _ = stop_tx.send(());
      if handle.thread().id() != thread::current().id() {
        let _ = handle.join();
      }
    }
  }
}

impl Drop for EndpointManagerPoll {
  fn drop(&mut self) {
    self.stop_polling();
  }
}

impl std::fmt::Debug for EndpointManagerPoll {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    let peers = self.inner.lock().unwrap().peers.len();
    f.debug_struct("EndpointManagerPoll").field("peers", &peers).finish()
  }
}
