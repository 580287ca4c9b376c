#[cfg(test)]
mod __test__ {

  use crate::protocol::{decode, encode, Message, BROADCAST_REQUEST_ID};

  use std::io::ErrorKind;

  #[test]
  fn test_round_trip() {
    let message = Message::request(42, "introspect", vec![1, 2, 3, 4]);
    let decoded = decode(&encode(&message)).unwrap();
    assert_eq!(decoded, message);
  }

  #[test]
  fn test_round_trip_empty_payload() {
    let message = Message::request(1, "process_info", Vec::new());
    let decoded = decode(&encode(&message)).unwrap();
    assert_eq!(decoded, message);
  }

  #[test]
  fn test_broadcast_uses_reserved_id() {
    let message = Message::broadcast("native_trace_receiver", vec![9]);
    assert_eq!(message.request_id, BROADCAST_REQUEST_ID);
    let decoded = decode(&encode(&message)).unwrap();
    assert_eq!(decoded.request_id, 0);
  }

  #[test]
  fn test_exact_wire_layout() {
    let message = Message::request(1, "ab", vec![0xff]);
    let bytes = encode(&message);
    assert_eq!(
      bytes,
      vec![
        1, 0, 0, 0, 0, 0, 0, 0, // request_id, u64 LE
        2, 0, // endpoint name length, u16 LE
        b'a', b'b', // endpoint name
        1, 0, 0, 0,    // payload length, u32 LE
        0xff, // payload
      ]
    );
  }

  #[test]
  fn test_truncated_frame_is_eof() {
    let bytes = encode(&Message::request(7, "scope_tracing", vec![b'm']));
    for cut in 0..bytes.len() {
      let err = decode(&bytes[..cut]).unwrap_err();
      assert_eq!(err.kind(), ErrorKind::UnexpectedEof, "cut at {}", cut);
    }
  }

  #[test]
  fn test_non_utf8_endpoint_name_is_invalid_data() {
    let mut bytes = encode(&Message::request(7, "ab", Vec::new()));
    bytes[10] = 0xfe; // clobber the endpoint name with invalid UTF-8
    bytes[11] = 0xff;
    let err = decode(&bytes).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidData);
  }

  #[test]
  fn test_back_to_back_frames_from_one_stream() {
    let first = Message::request(1, "a", vec![1]);
    let second = Message::broadcast("b", vec![2, 3]);

    let mut stream = encode(&first);
    stream.extend_from_slice(&encode(&second));

    let mut reader = stream.as_slice();
    assert_eq!(crate::protocol::read_message(&mut reader).unwrap(), first);
    assert_eq!(crate::protocol::read_message(&mut reader).unwrap(), second);
    assert_eq!(
      crate::protocol::read_message(&mut reader).unwrap_err().kind(),
      ErrorKind::UnexpectedEof
    );
  }
}
