//! Framing for mailbox messages multiplexed over a peer transport stream.
//!
//! Each message is a fixed header followed by an opaque payload:
//!
//! ```text
//! destination_thread     : i32  (big-endian)
//! destination_mailbox_id : u64  (big-endian)
//! payload_length         : u64  (big-endian)
//! payload                : payload_length bytes, written by the sender
//! ```
//!
//! The decoder consumes exactly one header-plus-payload per frame, whether or
//! not the destination mailbox still exists, so a dropped message can never
//! desynchronize the stream.

use crate::address::MailboxId;
use crate::error::MailbusError;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

/// Header size: i32 thread + u64 mailbox id + u64 payload length.
pub const FRAME_HEADER_LEN: usize = 4 + 8 + 8;

/// One decoded mailbox message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MailboxFrame {
  pub thread: i32,
  pub mailbox_id: MailboxId,
  pub payload: Bytes,
}

/// Codec for mailbox frames over a byte stream.
#[derive(Debug, Default)]
pub struct FrameCodec {
  state: DecodeState,
}

#[derive(Debug, Default, Clone, Copy)]
enum DecodeState {
  #[default]
  Header,
  Payload(FrameHeader),
}

#[derive(Debug, Clone, Copy)]
struct FrameHeader {
  thread: i32,
  mailbox_id: MailboxId,
  payload_len: usize,
}

impl FrameCodec {
  pub fn new() -> Self {
    Self::default()
  }
}

impl Decoder for FrameCodec {
  type Item = MailboxFrame;
  type Error = MailbusError;

  fn decode(&mut self, src: &mut BytesMut) -> Result<Option<MailboxFrame>, MailbusError> {
    loop {
      match self.state {
        DecodeState::Header => {
          if src.len() < FRAME_HEADER_LEN {
            src.reserve(FRAME_HEADER_LEN - src.len());
            return Ok(None);
          }
          let mut header = src.split_to(FRAME_HEADER_LEN);
          let thread = header.get_i32();
          let mailbox_id = MailboxId::from_raw(header.get_u64());
          let payload_len = header.get_u64();
          let payload_len = usize::try_from(payload_len).map_err(|_| {
            MailbusError::ProtocolViolation(format!("implausible payload length {payload_len}"))
          })?;
          self.state = DecodeState::Payload(FrameHeader {
            thread,
            mailbox_id,
            payload_len,
          });
          // Fall through and try the payload with what is already buffered.
        }
        DecodeState::Payload(header) => {
          if src.len() < header.payload_len {
            src.reserve(header.payload_len - src.len());
            return Ok(None);
          }
          let payload = src.split_to(header.payload_len).freeze();
          self.state = DecodeState::Header;
          return Ok(Some(MailboxFrame {
            thread: header.thread,
            mailbox_id: header.mailbox_id,
            payload,
          }));
        }
      }
    }
  }
}

impl Encoder<MailboxFrame> for FrameCodec {
  type Error = MailbusError;

  fn encode(&mut self, frame: MailboxFrame, dst: &mut BytesMut) -> Result<(), MailbusError> {
    dst.reserve(FRAME_HEADER_LEN + frame.payload.len());
    dst.put_i32(frame.thread);
    dst.put_u64(frame.mailbox_id.raw());
    dst.put_u64(frame.payload.len() as u64);
    dst.put_slice(&frame.payload);
    Ok(())
  }
}

/// Writes one frame whose payload comes from a caller-supplied writer.
///
/// The header goes out first with a length placeholder, the writer emits the
/// payload, and the placeholder is backfilled with the actual byte count.
pub fn encode_frame_with<F>(dst: &mut BytesMut, thread: i32, mailbox_id: MailboxId, write: F)
where
  F: FnOnce(&mut BytesMut),
{
  dst.reserve(FRAME_HEADER_LEN);
  dst.put_i32(thread);
  dst.put_u64(mailbox_id.raw());
  let length_at = dst.len();
  dst.put_u64(0);
  let payload_start = dst.len();
  write(dst);
  let payload_len = (dst.len() - payload_start) as u64;
  dst[length_at..length_at + 8].copy_from_slice(&payload_len.to_be_bytes());
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn encode_then_decode_round_trips() {
    let frame = MailboxFrame {
      thread: 2,
      mailbox_id: MailboxId::from_raw(17),
      payload: Bytes::from_static(b"hello"),
    };
    let mut codec = FrameCodec::new();
    let mut buf = BytesMut::new();
    codec.encode(frame.clone(), &mut buf).expect("encode");
    let decoded = codec.decode(&mut buf).expect("decode").expect("complete frame");
    assert_eq!(decoded, frame);
    assert!(buf.is_empty());
  }

  #[test]
  fn writer_backed_encoding_matches_the_wire_layout() {
    let mut buf = BytesMut::new();
    encode_frame_with(&mut buf, 1, MailboxId::from_raw(5), |dst| {
      dst.put_u64_le(42);
    });

    // thread=1, id=5, length=8, then the payload exactly as written.
    let mut expected = BytesMut::new();
    expected.put_i32(1);
    expected.put_u64(5);
    expected.put_u64(8);
    expected.put_u64_le(42);
    assert_eq!(&buf[..], &expected[..]);

    let decoded = FrameCodec::new().decode(&mut buf).expect("decode").expect("frame");
    assert_eq!(decoded.thread, 1);
    assert_eq!(decoded.mailbox_id, MailboxId::from_raw(5));
    assert_eq!(&decoded.payload[..], &42u64.to_le_bytes());
  }

  #[test]
  fn empty_payload_is_a_valid_frame() {
    let mut buf = BytesMut::new();
    encode_frame_with(&mut buf, 0, MailboxId::from_raw(1), |_dst| {});
    let decoded = FrameCodec::new().decode(&mut buf).expect("decode").expect("frame");
    assert!(decoded.payload.is_empty());
  }

  #[test]
  fn partial_input_yields_none_until_complete() {
    let mut full = BytesMut::new();
    encode_frame_with(&mut full, 3, MailboxId::from_raw(9), |dst| {
      dst.put_slice(b"payload");
    });

    let mut codec = FrameCodec::new();
    let mut buf = BytesMut::new();

    // Header split across arrivals.
    buf.extend_from_slice(&full[..10]);
    assert!(codec.decode(&mut buf).expect("decode").is_none());

    // Header complete, payload still short.
    buf.extend_from_slice(&full[10..FRAME_HEADER_LEN + 3]);
    assert!(codec.decode(&mut buf).expect("decode").is_none());

    buf.extend_from_slice(&full[FRAME_HEADER_LEN + 3..]);
    let decoded = codec.decode(&mut buf).expect("decode").expect("frame");
    assert_eq!(&decoded.payload[..], b"payload");
  }

  #[test]
  fn a_dropped_frame_leaves_the_stream_framed() {
    // Two frames back to back; the consumer discards the first one's payload
    // (absent mailbox) and the second must still parse intact.
    let mut buf = BytesMut::new();
    encode_frame_with(&mut buf, 0, MailboxId::from_raw(100), |dst| {
      dst.put_slice(b"for a mailbox that is gone");
    });
    encode_frame_with(&mut buf, 1, MailboxId::from_raw(2), |dst| {
      dst.put_slice(b"still deliverable");
    });

    let mut codec = FrameCodec::new();
    let first = codec.decode(&mut buf).expect("decode").expect("frame");
    assert_eq!(first.mailbox_id, MailboxId::from_raw(100));

    let second = codec.decode(&mut buf).expect("decode").expect("frame");
    assert_eq!(second.thread, 1);
    assert_eq!(second.mailbox_id, MailboxId::from_raw(2));
    assert_eq!(&second.payload[..], b"still deliverable");
    assert!(buf.is_empty());
  }
}
