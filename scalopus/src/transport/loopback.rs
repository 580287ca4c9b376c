//! In-process transport without sockets.
//!
//! A loopback server dispatches requests synchronously on the caller's
//! thread and delivers broadcasts straight into its clients' endpoints.
//! Useful for tests and for embedding the consumer side in the traced
//! process itself.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use crate::endpoints::Endpoint;
use crate::transport::{
  pending_never, pending_pair, Destination, PendingResponse, Transport, TransportError,
  TransportFactory,
};

static NEXT_IDENTITY: AtomicU64 = AtomicU64::new(1);

/// Identifies a loopback server within this process.
#[derive(Clone)]
pub struct LoopbackDestination {
  server: Weak<LoopbackTransport>,
  identity: u64,
}

impl fmt::Display for LoopbackDestination {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "loopback:{}", self.identity)
  }
}

impl Destination for LoopbackDestination {
  fn identity(&self) -> u64 {
    let mut hasher = DefaultHasher::new();
    "loopback".hash(&mut hasher);
    self.identity.hash(&mut hasher);
    hasher.finish()
  }

  fn as_any(&self) -> &dyn std::any::Any {
    self
  }
}

/// One end of an in-process channel. Constructed through
/// [`LoopbackTransport::serve`] / [`LoopbackTransport::connect`].
pub struct LoopbackTransport {
  endpoints: Mutex<HashMap<String, Arc<dyn Endpoint>>>,
  /// Upstream server for the client side, `None` on the server itself.
  server: Option<Weak<LoopbackTransport>>,
  /// Connected clients, server side only.
  clients: Mutex<Vec<Weak<LoopbackTransport>>>,
  identity: u64,
}

impl LoopbackTransport {
  pub fn serve() -> Arc<LoopbackTransport> {
    Arc::new(LoopbackTransport {
      endpoints: Mutex::new(HashMap::new()),
      server: None,
      clients: Mutex::new(Vec::new()),
      identity: NEXT_IDENTITY.fetch_add(1, Ordering::Relaxed),
    })
  }

  pub fn connect(server: &Arc<LoopbackTransport>) -> Arc<LoopbackTransport> {
    let client = Arc::new(LoopbackTransport {
      endpoints: Mutex::new(HashMap::new()),
      server: Some(Arc::downgrade(server)),
      clients: Mutex::new(Vec::new()),
      identity: NEXT_IDENTITY.fetch_add(1, Ordering::Relaxed),
    });
    server.clients.lock().unwrap().push(Arc::downgrade(&client));
    client
  }

  /// The destination describing `server`, connectable through its factory.
  pub fn destination_of(server: &Arc<LoopbackTransport>) -> LoopbackDestination {
    LoopbackDestination {
      server: Arc::downgrade(server),
      identity: server.identity,
    }
  }
}

impl Transport for LoopbackTransport {
  fn request(&self, endpoint: &str, payload: &[u8]) -> Result<PendingResponse, TransportError> {
    let server = self
      .server
      .as_ref()
      .and_then(Weak::upgrade)
      .ok_or(TransportError::Disconnected)?;

    match server.get_endpoint(endpoint) {
      Some(handler) => match handler.handle(&*server, payload) {
        Some(reply) => {
          let (slot, response) = pending_pair();
          let _ = slot.send(Ok(reply));
          Ok(response)
        },
        // The handler declined; mirror the socket behaviour where the
        // caller waits out its budget.
        None => Ok(pending_never()),
      },
      None => Ok(pending_never()),
    }
  }

  fn broadcast(&self, endpoint: &str, payload: &[u8]) {
    if let Some(server) = self.server.as_ref().and_then(Weak::upgrade) {
      // Client side: the one upstream peer receives it.
      if let Some(handler) = server.get_endpoint(endpoint) {
        let _ = handler.handle_unsolicited(&*server, payload);
      }
      return;
    }

    // Server side: fan out to every live client, pruning dead ones. The
    // snapshot is taken under the lock, the dispatch happens outside it.
    let clients: Vec<Arc<LoopbackTransport>> = {
      let mut clients = self.clients.lock().unwrap();
      clients.retain(|client| client.upgrade().is_some());
      clients.iter().filter_map(Weak::upgrade).collect()
    };
    for client in clients {
      if let Some(handler) = client.get_endpoint(endpoint) {
        let _ = handler.handle_unsolicited(&*client, payload);
      }
    }
  }

  fn register_endpoint(&self, endpoint: Arc<dyn Endpoint>) {
    let name = endpoint.name().to_string();
    self.endpoints.lock().unwrap().insert(name, endpoint);
  }

  fn endpoint_names(&self) -> Vec<String> {
    self.endpoints.lock().unwrap().keys().cloned().collect()
  }

  fn get_endpoint(&self, name: &str) -> Option<Arc<dyn Endpoint>> {
    self.endpoints.lock().unwrap().get(name).cloned()
  }

  fn pending_requests(&self) -> usize {
    0
  }

  fn is_connected(&self) -> bool {
    match &self.server {
      Some(server) => server.upgrade().is_some(),
      None => true,
    }
  }

  fn address(&self) -> Option<Arc<dyn Destination>> {
    None
  }
}

impl fmt::Debug for LoopbackTransport {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("LoopbackTransport")
      .field("identity", &self.identity)
      .field("is_server", &self.server.is_none())
      .finish_non_exhaustive()
  }
}

/// Factory over the loopback servers it created, so discovery works the
/// same way it does for sockets.
#[derive(Debug, Default)]
pub struct LoopbackFactory {
  servers: Mutex<Vec<Weak<LoopbackTransport>>>,
}

impl LoopbackFactory {
  pub fn new() -> Self {
    Self::default()
  }
}

impl TransportFactory for LoopbackFactory {
  fn discover(&self) -> Vec<Arc<dyn Destination>> {
    let mut servers = self.servers.lock().unwrap();
    servers.retain(|server| server.upgrade().is_some());
    servers
      .iter()
      .filter_map(Weak::upgrade)
      .map(|server| Arc::new(LoopbackTransport::destination_of(&server)) as Arc<dyn Destination>)
      .collect()
  }

  fn serve(&self) -> Result<Arc<dyn Transport>, TransportError> {
    let server = LoopbackTransport::serve();
    self.servers.lock().unwrap().push(Arc::downgrade(&server));
    Ok(server)
  }

  fn connect(&self, destination: &dyn Destination) -> Result<Arc<dyn Transport>, TransportError> {
    let destination = destination
      .as_any()
      .downcast_ref::<LoopbackDestination>()
      .ok_or(TransportError::Disconnected)?;
    let server = destination.server.upgrade().ok_or(TransportError::Disconnected)?;
    Ok(LoopbackTransport::connect(&server) as Arc<dyn Transport>)
  }
}
