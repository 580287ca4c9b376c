//! # Transport
//!
//! One end of a local IPC channel. A transport either serves (accepting any
//! number of peer connections) or connects (one upstream connection). Both
//! sides own a map of named [`Endpoint`]s, and both sides can carry
//! broadcasts; only the client side issues correlated requests.
//!
//! Requests are matched to responses by `(endpoint name, request id)`, so
//! replies may arrive in any order. Request ids are allocated from a
//! monotonic counter starting at 1; id 0 is reserved for broadcasts.
//! Dropping a [`PendingResponse`] does not cancel anything on the wire, the
//! reply is simply discarded when it arrives. Closing a transport rejects
//! every outstanding request with [`TransportError::Disconnected`].
//!
//! Two implementations exist: [`unix`] runs over abstract-namespace unix
//! sockets with one worker thread per transport, [`loopback`] dispatches
//! synchronously in-process for tests and embedded single-process setups.

pub mod loopback;
pub mod unix;

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::endpoints::Endpoint;

/// Wait budget the endpoint RPC helpers apply to their responses.
pub const REQUEST_WAIT_BUDGET: Duration = Duration::from_millis(200);

/// Failures of the transport layer. Endpoint-level problems never show up
/// here; a handler that cannot answer simply answers nothing and the caller
/// runs into [`TransportError::Timeout`].
#[derive(Debug, Error)]
pub enum TransportError {
  #[error("transport is not connected")]
  Disconnected,
  #[error("no response arrived within the wait budget")]
  Timeout,
  #[error("malformed frame or payload")]
  Protocol,
  #[error("i/o failure: {0}")]
  Io(#[from] std::io::Error),
}

pub(crate) type PendingSlot = crossbeam_channel::Sender<Result<Vec<u8>, TransportError>>;

/// The receiving end of an outstanding request.
///
/// Fulfilled at most once. Dropping it silently discards the eventual reply.
#[derive(Debug)]
pub struct PendingResponse {
  receiver: crossbeam_channel::Receiver<Result<Vec<u8>, TransportError>>,
  /// Keeps the slot alive for requests that will never be answered, so the
  /// caller observes a timeout rather than an instant disconnect.
  _held_slot: Option<PendingSlot>,
}

impl PendingResponse {
  /// Blocks until the response arrives or `timeout` elapses.
  pub fn wait(&self, timeout: Duration) -> Result<Vec<u8>, TransportError> {
    match self.receiver.recv_timeout(timeout) {
      Ok(result) => result,
      Err(crossbeam_channel::RecvTimeoutError::Timeout) => Err(TransportError::Timeout),
      Err(crossbeam_channel::RecvTimeoutError::Disconnected) => Err(TransportError::Disconnected),
    }
  }
}

/// Creates a pending-response pair: the slot side is stored by the
/// transport, the response side handed to the caller.
pub(crate) fn pending_pair() -> (PendingSlot, PendingResponse) {
  let (sender, receiver) = crossbeam_channel::bounded(1);
  (
    sender,
    PendingResponse {
      receiver,
      _held_slot: None,
    },
  )
}

/// A pending response that will never be fulfilled; waiting on it times out.
pub(crate) fn pending_never() -> PendingResponse {
  let (sender, receiver) = crossbeam_channel::bounded(1);
  PendingResponse {
    receiver,
    _held_slot: Some(sender),
  }
}

/// Identity of a peer a transport can connect to.
pub trait Destination: Send + Sync + fmt::Display {
  /// Stable identity used by the endpoint manager to deduplicate peers.
  fn identity(&self) -> u64;

  fn as_any(&self) -> &dyn Any;
}

/// One end of an IPC channel.
pub trait Transport: Send + Sync {
  /// Sends a request to the named remote endpoint and returns the handle to
  /// its eventual response. Fails fast if the transport cannot send.
  fn request(&self, endpoint: &str, payload: &[u8]) -> Result<PendingResponse, TransportError>;

  /// Queues a broadcast to every connected peer. Delivered with request
  /// id 0 on the worker's next iteration.
  fn broadcast(&self, endpoint: &str, payload: &[u8]);

  /// Registers an endpoint under its name. Use [`add_endpoint`] when the
  /// endpoint also needs the back reference to this transport.
  fn register_endpoint(&self, endpoint: Arc<dyn Endpoint>);

  fn endpoint_names(&self) -> Vec<String>;

  fn get_endpoint(&self, name: &str) -> Option<Arc<dyn Endpoint>>;

  /// Number of requests waiting for a response.
  fn pending_requests(&self) -> usize;

  fn is_connected(&self) -> bool;

  /// The peer this transport talks to, if it has one to describe.
  fn address(&self) -> Option<Arc<dyn Destination>>;
}

/// Registers `endpoint` on `transport`, handing it the weak back reference
/// it needs to reach the transport from its own threads.
pub fn add_endpoint(transport: &Arc<dyn Transport>, endpoint: Arc<dyn Endpoint>) {
  endpoint.set_transport(Arc::downgrade(transport));
  transport.register_endpoint(endpoint);
}

/// Discovers, serves and connects transports of one flavour.
pub trait TransportFactory: Send + Sync {
  /// Enumerates the peers currently reachable through this factory.
  fn discover(&self) -> Vec<Arc<dyn Destination>>;

  /// Binds a server transport for this process.
  fn serve(&self) -> Result<Arc<dyn Transport>, TransportError>;

  /// Opens a client transport to `destination`.
  fn connect(&self, destination: &dyn Destination) -> Result<Arc<dyn Transport>, TransportError>;
}

/// Endpoint maps as the manager tracks them, one per live transport.
pub type EndpointMap = HashMap<String, Arc<dyn Endpoint>>;
