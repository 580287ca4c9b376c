//! Abstract-namespace unix socket transport.
//!
//! A server binds `\0<pid><suffix>` (suffix defaults to `_scalopus`) and the
//! matching factory discovers peers by scanning `/proc/net/unix` for names
//! with that suffix. Each transport runs one worker thread that polls its
//! sockets with a 10 ms timeout, frames incoming messages, dispatches them
//! and drains the broadcast queue.

use smallvec::SmallVec;
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::hash::{Hash, Hasher};
use std::io::Write;
use std::os::fd::AsRawFd;
use std::os::linux::net::SocketAddrExt;
use std::os::unix::net::{SocketAddr, UnixListener, UnixStream};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::thread;
use std::time::Duration;

use tracing::{debug, warn};

use crate::endpoints::Endpoint;
use crate::protocol::{self, Message};
use crate::transport::{
  pending_pair, Destination, PendingResponse, PendingSlot, Transport, TransportError,
  TransportFactory,
};

/// Suffix of the abstract socket name, after the process id.
pub const SOCKET_SUFFIX: &str = "_scalopus";

/// Worker poll timeout. Bounds broadcast latency and shutdown latency.
const POLL_TIMEOUT_MS: i32 = 10;

/// Defensive ceiling on how long a frame read may stall mid-frame before
/// the connection is declared dead.
const FRAME_READ_TIMEOUT: Duration = Duration::from_secs(1);

/// Identifies a unix transport server by the owning process id.
#[derive(Debug, Clone)]
pub struct UnixDestination {
  pid: u32,
  suffix: String,
}

impl UnixDestination {
  pub fn new(pid: u32, suffix: impl Into<String>) -> Self {
    Self {
      pid,
      suffix: suffix.into(),
    }
  }

  pub fn pid(&self) -> u32 {
    self.pid
  }
}

impl fmt::Display for UnixDestination {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "unix:{}", self.pid)
  }
}

impl Destination for UnixDestination {
  fn identity(&self) -> u64 {
    let mut hasher = DefaultHasher::new();
    self.pid.hash(&mut hasher);
    self.suffix.hash(&mut hasher);
    hasher.finish()
  }

  fn as_any(&self) -> &dyn std::any::Any {
    self
  }
}

/// A unix socket transport, server or client side.
pub struct UnixTransport {
  endpoints: Mutex<HashMap<String, Arc<dyn Endpoint>>>,
  /// Outstanding client-side requests, keyed by (endpoint, request id).
  pending: Mutex<HashMap<(String, u64), PendingSlot>>,
  broadcast_tx: crossbeam_channel::Sender<Message>,
  /// Monotonic request id source. 0 is reserved for broadcasts.
  request_counter: AtomicU64,
  running: AtomicBool,
  connected: AtomicBool,
  /// Write half of the upstream connection; `None` on the server side,
  /// where all writes happen on the worker thread.
  writer: Option<Mutex<UnixStream>>,
  destination: UnixDestination,
}

impl UnixTransport {
  /// Binds the abstract server socket of this process and starts the
  /// worker.
  pub fn serve() -> Result<Arc<UnixTransport>, TransportError> {
    Self::serve_suffixed(SOCKET_SUFFIX)
  }

  /// Like [`Self::serve`] with a custom socket suffix. Used by tests to
  /// keep several servers in one process apart.
  pub fn serve_suffixed(suffix: &str) -> Result<Arc<UnixTransport>, TransportError> {
    let pid = std::process::id();
    let addr = SocketAddr::from_abstract_name(format!("{}{}", pid, suffix).as_bytes())?;
    let listener = UnixListener::bind_addr(&addr)?;
    listener.set_nonblocking(true)?;

    let (broadcast_tx, broadcast_rx) = crossbeam_channel::unbounded();
    let transport = Arc::new(UnixTransport {
      endpoints: Mutex::new(HashMap::new()),
      pending: Mutex::new(HashMap::new()),
      broadcast_tx,
      request_counter: AtomicU64::new(1),
      running: AtomicBool::new(true),
      connected: AtomicBool::new(true),
      writer: None,
      destination: UnixDestination::new(pid, suffix),
    });

    let weak = Arc::downgrade(&transport);
    thread::Builder::new()
      .name("scalopus-transport-server".to_string())
      .spawn(move || server_worker(weak, listener, broadcast_rx))?;

    debug!(pid, suffix, "unix transport serving");
    Ok(transport)
  }

  /// Connects to the server socket of process `pid` and starts the worker.
  pub fn connect(pid: u32) -> Result<Arc<UnixTransport>, TransportError> {
    Self::connect_suffixed(pid, SOCKET_SUFFIX)
  }

  pub fn connect_suffixed(pid: u32, suffix: &str) -> Result<Arc<UnixTransport>, TransportError> {
    let addr = SocketAddr::from_abstract_name(format!("{}{}", pid, suffix).as_bytes())?;
    let stream = UnixStream::connect_addr(&addr)?;
    stream.set_read_timeout(Some(FRAME_READ_TIMEOUT))?;
    let writer = stream.try_clone()?;

    let (broadcast_tx, broadcast_rx) = crossbeam_channel::unbounded();
    let transport = Arc::new(UnixTransport {
      endpoints: Mutex::new(HashMap::new()),
      pending: Mutex::new(HashMap::new()),
      broadcast_tx,
      request_counter: AtomicU64::new(1),
      running: AtomicBool::new(true),
      connected: AtomicBool::new(true),
      writer: Some(Mutex::new(writer)),
      destination: UnixDestination::new(pid, suffix),
    });

    let weak = Arc::downgrade(&transport);
    thread::Builder::new()
      .name("scalopus-transport-client".to_string())
      .spawn(move || client_worker(weak, stream, broadcast_rx))?;

    debug!(pid, suffix, "unix transport connected");
    Ok(transport)
  }

  /// Rejects every outstanding request with `Disconnected`.
  fn reject_pending(&self) {
    let slots: Vec<PendingSlot> = self.pending.lock().unwrap().drain().map(|(_, v)| v).collect();
    for slot in slots {
      let _ = slot.send(Err(TransportError::Disconnected));
    }
  }
}

impl Transport for UnixTransport {
  fn request(&self, endpoint: &str, payload: &[u8]) -> Result<PendingResponse, TransportError> {
    let writer = self.writer.as_ref().ok_or(TransportError::Disconnected)?;
    if !self.connected.load(Ordering::Relaxed) {
      return Err(TransportError::Disconnected);
    }

    let request_id = self.request_counter.fetch_add(1, Ordering::Relaxed);
    let message = Message::request(request_id, endpoint, payload.to_vec());

    // The slot goes into the map before the frame goes out, so a fast reply
    // cannot slip past the correlation lookup.
    let (slot, response) = pending_pair();
    let key = (endpoint.to_string(), request_id);
    self.pending.lock().unwrap().insert(key.clone(), slot);

    let sent = {
      let mut writer = writer.lock().unwrap();
      protocol::write_message(&mut *writer, &message)
    };
    if let Err(error) = sent {
      self.pending.lock().unwrap().remove(&key);
      self.connected.store(false, Ordering::Relaxed);
      return Err(TransportError::Io(error));
    }

    Ok(response)
  }

  fn broadcast(&self, endpoint: &str, payload: &[u8]) {
    let _ = self.broadcast_tx.send(Message::broadcast(endpoint, payload.to_vec()));
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
    self.pending.lock().unwrap().len()
  }

  fn is_connected(&self) -> bool {
    self.connected.load(Ordering::Relaxed)
  }

  fn address(&self) -> Option<Arc<dyn Destination>> {
    Some(Arc::new(self.destination.clone()))
  }
}

impl Drop for UnixTransport {
  fn drop(&mut self) {
    self.running.store(false, Ordering::Release);
    self.connected.store(false, Ordering::Relaxed);
    // The worker notices within one poll timeout and exits on its own; the
    // sockets it owns close with it.
    self.reject_pending();
  }
}

impl fmt::Debug for UnixTransport {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("UnixTransport")
      .field("destination", &self.destination)
      .field("connected", &self.connected)
      .finish_non_exhaustive()
  }
}

/// Polls `fds` once with the worker timeout. Returns false on a fatal poll
/// failure.
fn poll_fds(fds: &mut [libc::pollfd]) -> bool {
  let result = unsafe { libc::poll(fds.as_mut_ptr(), fds.len() as libc::nfds_t, POLL_TIMEOUT_MS) };
  if result < 0 {
    let error = std::io::Error::last_os_error();
    if error.kind() == std::io::ErrorKind::Interrupted {
      return true;
    }
    warn!(%error, "poll failed on transport worker");
    return false;
  }
  true
}

fn pollfd_for(fd: i32) -> libc::pollfd {
  libc::pollfd {
    fd,
    events: libc::POLLIN,
    revents: 0,
  }
}

fn readable(revents: libc::c_short) -> bool {
  revents & (libc::POLLIN | libc::POLLHUP | libc::POLLERR) != 0
}

/// Server worker: accepts peers, answers their requests, fans out queued
/// broadcasts.
fn server_worker(
  transport: Weak<UnixTransport>,
  listener: UnixListener,
  broadcast_rx: crossbeam_channel::Receiver<Message>,
) {
  let mut connections: Vec<UnixStream> = Vec::new();

  loop {
    let Some(this) = transport.upgrade() else { break };
    if !this.running.load(Ordering::Acquire) {
      break;
    }

    let mut fds: SmallVec<[libc::pollfd; 8]> = SmallVec::new();
    fds.push(pollfd_for(listener.as_raw_fd()));
    for connection in &connections {
      fds.push(pollfd_for(connection.as_raw_fd()));
    }
    if !poll_fds(&mut fds) {
      break;
    }

    // New peers.
    if readable(fds[0].revents) {
      loop {
        match listener.accept() {
          Ok((stream, _)) => {
            let _ = stream.set_nonblocking(false);
            let _ = stream.set_read_timeout(Some(FRAME_READ_TIMEOUT));
            debug!(fd = stream.as_raw_fd(), "transport accepted peer");
            connections.push(stream);
          },
          Err(error) if error.kind() == std::io::ErrorKind::WouldBlock => break,
          Err(error) => {
            warn!(%error, "could not accept peer");
            break;
          },
        }
      }
    }

    // Readable peers: frame, dispatch, answer.
    let mut dead = Vec::new();
    for (index, fd) in fds[1..].iter().enumerate() {
      if !readable(fd.revents) {
        continue;
      }
      match protocol::read_message(&mut connections[index]) {
        Ok(message) => {
          let response = this
            .get_endpoint(&message.endpoint)
            .and_then(|endpoint| endpoint.handle(&*this, &message.payload));
          if let Some(payload) = response {
            let reply = Message::request(message.request_id, &message.endpoint, payload);
            if protocol::write_message(&mut connections[index], &reply).is_err() {
              dead.push(index);
            }
          }
          // Unknown endpoint or a declining handler: nothing goes back, the
          // peer's request runs into its wait budget.
        },
        Err(error) => {
          debug!(%error, "closing peer connection");
          dead.push(index);
        },
      }
    }
    for index in dead.into_iter().rev() {
      connections.swap_remove(index);
    }

    // Queued broadcasts go to every live peer.
    while let Ok(message) = broadcast_rx.try_recv() {
      let bytes = protocol::encode(&message);
      connections.retain_mut(|connection| connection.write_all(&bytes).is_ok());
    }

    drop(this);
  }
}

/// Client worker: reads frames from the upstream connection, fulfils
/// pending requests, hands broadcasts to the endpoints.
fn client_worker(
  transport: Weak<UnixTransport>,
  mut reader: UnixStream,
  broadcast_rx: crossbeam_channel::Receiver<Message>,
) {
  loop {
    let Some(this) = transport.upgrade() else { break };
    if !this.running.load(Ordering::Acquire) {
      break;
    }

    let mut fds = [pollfd_for(reader.as_raw_fd())];
    if !poll_fds(&mut fds) {
      break;
    }

    if readable(fds[0].revents) {
      match protocol::read_message(&mut reader) {
        Ok(message) => {
          let key = (message.endpoint.clone(), message.request_id);
          let slot = this.pending.lock().unwrap().remove(&key);
          if let Some(slot) = slot {
            // A fulfilled slot whose response handle was dropped simply
            // discards the payload here.
            let _ = slot.send(Ok(message.payload));
          } else if let Some(endpoint) = this.get_endpoint(&message.endpoint) {
            // Broadcast or stray reply: hand it to the endpoint. A returned
            // payload goes back uncorrelated.
            if let Some(payload) = endpoint.handle_unsolicited(&*this, &message.payload) {
              let reply = Message::request(message.request_id, &message.endpoint, payload);
              if let Some(writer) = this.writer.as_ref() {
                let mut writer = writer.lock().unwrap();
                let _ = protocol::write_message(&mut *writer, &reply);
              }
            }
          }
        },
        Err(error) => {
          debug!(%error, "upstream connection lost");
          this.connected.store(false, Ordering::Relaxed);
          this.reject_pending();
          break;
        },
      }
    }

    // A client can carry broadcasts too; they go to the one upstream peer.
    while let Ok(message) = broadcast_rx.try_recv() {
      if let Some(writer) = this.writer.as_ref() {
        let mut writer = writer.lock().unwrap();
        let _ = protocol::write_message(&mut *writer, &message);
      }
    }

    drop(this);
  }
}

/// Scans `/proc/net/unix` for abstract sockets named `<pid><suffix>`.
///
/// Connected clients show up in the same listing with inode 0; those are
/// skipped, only the listening server entries count.
pub fn discover_suffixed(suffix: &str) -> Vec<u32> {
  let Ok(content) = fs::read_to_string("/proc/net/unix") else {
    return Vec::new();
  };

  let mut pids = Vec::new();
  for line in content.lines() {
    // Num RefCount Protocol Flags Type St Inode Path
    let fields: Vec<&str> = line.split_whitespace().collect();
    if fields.len() < 8 {
      continue;
    }
    if fields[6] == "0" {
      continue;
    }
    let Some(name) = fields[7].strip_prefix('@') else {
      continue;
    };
    let Some(pid) = name.strip_suffix(suffix) else {
      continue;
    };
    if let Ok(pid) = pid.parse::<u32>() {
      pids.push(pid);
    }
  }
  pids
}

/// Factory for unix transports with a configurable socket suffix.
#[derive(Debug)]
pub struct UnixTransportFactory {
  suffix: String,
}

impl UnixTransportFactory {
  pub fn new() -> Self {
    Self::with_suffix(SOCKET_SUFFIX)
  }

  pub fn with_suffix(suffix: impl Into<String>) -> Self {
    Self {
      suffix: suffix.into(),
    }
  }
}

impl Default for UnixTransportFactory {
  fn default() -> Self {
    Self::new()
  }
}

impl TransportFactory for UnixTransportFactory {
  fn discover(&self) -> Vec<Arc<dyn Destination>> {
    discover_suffixed(&self.suffix)
      .into_iter()
      .map(|pid| Arc::new(UnixDestination::new(pid, self.suffix.clone())) as Arc<dyn Destination>)
      .collect()
  }

  fn serve(&self) -> Result<Arc<dyn Transport>, TransportError> {
    Ok(UnixTransport::serve_suffixed(&self.suffix)? as Arc<dyn Transport>)
  }

  fn connect(&self, destination: &dyn Destination) -> Result<Arc<dyn Transport>, TransportError> {
    let destination = destination
      .as_any()
      .downcast_ref::<UnixDestination>()
      .ok_or(TransportError::Disconnected)?;
    Ok(UnixTransport::connect_suffixed(destination.pid, &self.suffix)? as Arc<dyn Transport>)
  }
}
