//! # Wire Protocol
//!
//! Length-prefixed framing for the IPC transport. A frame looks like this,
//! all integers little-endian:
//!
//! ```text
//! request_id        : 8 bytes   (0 = broadcast / unsolicited)
//! endpoint_name_len : 2 bytes
//! endpoint_name     : endpoint_name_len bytes (UTF-8, no NUL)
//! payload_len       : 4 bytes
//! payload           : payload_len bytes (opaque)
//! ```
//!
//! A short read anywhere in a frame means the connection is dead; the reader
//! surfaces it as an error and the transport closes the connection. Payloads
//! are opaque at this layer; the endpoints interpret them.

mod __test__;

use std::io::{self, Read, Write};

/// Request id carried by broadcast and unsolicited frames.
pub const BROADCAST_REQUEST_ID: u64 = 0;

/// One frame on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
  pub request_id: u64,
  pub endpoint: String,
  pub payload: Vec<u8>,
}

impl Message {
  pub fn request(request_id: u64, endpoint: &str, payload: Vec<u8>) -> Self {
    Self {
      request_id,
      endpoint: endpoint.to_string(),
      payload,
    }
  }

  pub fn broadcast(endpoint: &str, payload: Vec<u8>) -> Self {
    Self::request(BROADCAST_REQUEST_ID, endpoint, payload)
  }
}

/// Writes one frame.
///
/// Fails with `InvalidInput` if the endpoint name does not fit the 16-bit
/// length field; payloads are bounded by the 32-bit field by construction.
pub fn write_message(writer: &mut impl Write, message: &Message) -> io::Result<()> {
  let name = message.endpoint.as_bytes();
  if name.len() > u16::MAX as usize {
    return Err(io::Error::new(
      io::ErrorKind::InvalidInput,
      "endpoint name exceeds 16-bit length field",
    ));
  }
  if message.payload.len() > u32::MAX as usize {
    return Err(io::Error::new(
      io::ErrorKind::InvalidInput,
      "payload exceeds 32-bit length field",
    ));
  }

  writer.write_all(&message.request_id.to_le_bytes())?;
  writer.write_all(&(name.len() as u16).to_le_bytes())?;
  writer.write_all(name)?;
  writer.write_all(&(message.payload.len() as u32).to_le_bytes())?;
  writer.write_all(&message.payload)?;
  Ok(())
}

/// Reads one frame, blocking until it is complete.
///
/// `UnexpectedEof` means the peer went away mid-frame (or cleanly between
/// frames); `InvalidData` means the frame itself is malformed. Either way
/// the connection cannot be trusted afterwards.
pub fn read_message(reader: &mut impl Read) -> io::Result<Message> {
  let mut request_id = [0u8; 8];
  reader.read_exact(&mut request_id)?;

  let mut name_len = [0u8; 2];
  reader.read_exact(&mut name_len)?;
  let mut name = vec![0u8; u16::from_le_bytes(name_len) as usize];
  reader.read_exact(&mut name)?;
  let endpoint = String::from_utf8(name)
    .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "endpoint name is not UTF-8"))?;

  let mut payload_len = [0u8; 4];
  reader.read_exact(&mut payload_len)?;
  let mut payload = vec![0u8; u32::from_le_bytes(payload_len) as usize];
  reader.read_exact(&mut payload)?;

  Ok(Message {
    request_id: u64::from_le_bytes(request_id),
    endpoint,
    payload,
  })
}

/// Encodes a frame into a byte vector. Handy for tests and loopback paths.
///
/// # Panics
/// Panics if the endpoint name does not fit the 16-bit length field.
pub fn encode(message: &Message) -> Vec<u8> {
  let mut out = Vec::with_capacity(14 + message.endpoint.len() + message.payload.len());
  write_message(&mut out, message).expect("frame fields within length limits");
  out
}

/// Decodes a frame from a byte slice.
pub fn decode(mut bytes: &[u8]) -> io::Result<Message> {
  read_message(&mut bytes)
}
