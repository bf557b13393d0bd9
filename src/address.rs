//! Mailbox addressing: peer identities, mailbox ids, and the transmissible
//! (peer, thread, mailbox id) triple.

use crate::error::MailbusError;
use bytes::{Buf, BufMut};
use std::fmt;

/// Sentinel thread ordinal meaning "let the receiving manager pick the
/// thread, defaulting to the sender's current one".
pub const ANY_THREAD: i32 = -1;

/// Opaque identifier of a process participating in the cluster.
///
/// Peer ids are minted by the transport; `PeerId::NIL` never names a real
/// peer and marks nil addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerId(u64);

impl PeerId {
  /// The nil peer. Addresses carrying it are nil addresses.
  pub const NIL: PeerId = PeerId(0);

  pub fn from_raw(raw: u64) -> Self {
    PeerId(raw)
  }

  pub fn raw(self) -> u64 {
    self.0
  }

  pub fn is_nil(self) -> bool {
    self == Self::NIL
  }
}

impl fmt::Display for PeerId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.0)
  }
}

/// Identifier of a mailbox within one thread's registry.
///
/// Ids are monotonic per (peer, thread) and are never reused within the
/// lifetime of that thread's registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MailboxId(u64);

impl MailboxId {
  pub fn from_raw(raw: u64) -> Self {
    MailboxId(raw)
  }

  pub fn raw(self) -> u64 {
    self.0
  }
}

impl fmt::Display for MailboxId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.0)
  }
}

/// The transmissible name of a mailbox: which peer, which thread on that
/// peer, and which mailbox id within that thread's registry.
///
/// Addresses are plain values: copy them, compare them, hash them, ship them
/// inside payloads of other mailbox messages. A nil address (nil peer) may be
/// passed around and encoded freely, but it can never be sent to and
/// [`MailboxAddress::peer`] refuses to resolve it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MailboxAddress {
  peer: PeerId,
  thread: i32,
  mailbox_id: MailboxId,
}

impl MailboxAddress {
  /// Encoded size on the wire: peer u64 + thread i32 + mailbox id u64.
  pub const ENCODED_LEN: usize = 8 + 4 + 8;

  /// Constructs the nil address.
  pub fn nil() -> Self {
    MailboxAddress {
      peer: PeerId::NIL,
      thread: ANY_THREAD,
      mailbox_id: MailboxId(0),
    }
  }

  pub fn new(peer: PeerId, thread: i32, mailbox_id: MailboxId) -> Self {
    MailboxAddress {
      peer,
      thread,
      mailbox_id,
    }
  }

  pub fn is_nil(&self) -> bool {
    self.peer.is_nil()
  }

  /// The peer on which the mailbox lives.
  ///
  /// Panics if the address is nil; a nil address names nothing.
  pub fn peer(&self) -> PeerId {
    assert!(!self.is_nil(), "peer() called on a nil mailbox address");
    self.peer
  }

  pub fn thread(&self) -> i32 {
    self.thread
  }

  pub fn mailbox_id(&self) -> MailboxId {
    self.mailbox_id
  }

  /// Writes the canonical encoding: the three fields in order, big-endian.
  pub fn encode<B: BufMut>(&self, dst: &mut B) {
    dst.put_u64(self.peer.0);
    dst.put_i32(self.thread);
    dst.put_u64(self.mailbox_id.0);
  }

  /// Reads an address previously written by [`MailboxAddress::encode`].
  /// Nil addresses round-trip like any other value.
  pub fn decode<B: Buf>(src: &mut B) -> Result<Self, MailbusError> {
    if src.remaining() < Self::ENCODED_LEN {
      return Err(MailbusError::ProtocolViolation(format!(
        "mailbox address needs {} bytes, got {}",
        Self::ENCODED_LEN,
        src.remaining()
      )));
    }
    let peer = PeerId(src.get_u64());
    let thread = src.get_i32();
    let mailbox_id = MailboxId(src.get_u64());
    Ok(MailboxAddress {
      peer,
      thread,
      mailbox_id,
    })
  }
}

impl Default for MailboxAddress {
  fn default() -> Self {
    Self::nil()
  }
}

impl fmt::Display for MailboxAddress {
  /// Renders the friendly `peer:thread:mailbox_id` form.
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}:{}:{}", self.peer, self.thread, self.mailbox_id)
  }
}
