//! The peer transport seam.
//!
//! The mailbox layer does not open connections or frame the peer-to-peer
//! stream itself; it consumes a [`MessageService`] that can push one framed
//! message to a named peer and hand inbound messages to a registered
//! [`MessageHandler`]. Delivery is best effort end to end: an unknown or
//! disconnected peer swallows the message, and nothing is reported back.

use crate::address::PeerId;
use bytes::BytesMut;
use std::sync::Arc;

pub mod memory;

pub use memory::{MemoryEndpoint, MemoryHub};

/// Payload writer handed to [`MessageService::send_message`]. Invoked at most
/// once, with the outbound buffer for one message.
pub type WriterFn = Box<dyn FnOnce(&mut BytesMut) + Send + 'static>;

/// Receiver of inbound transport messages.
pub trait MessageHandler: Send + Sync + 'static {
  /// Called once per inbound message. `message` is only valid for the
  /// duration of the call; anything needed later must be copied out.
  fn on_message(&self, source: PeerId, message: &mut BytesMut);
}

/// Observable peer connectivity, consumed by layers above the mailbox core.
pub trait Connectivity: Send + Sync + 'static {
  fn is_connected(&self, peer: PeerId) -> bool;
}

/// The lower-level peer-to-peer message transport.
pub trait MessageService: Send + Sync + 'static {
  /// This process's own peer identity.
  fn local_peer(&self) -> PeerId;

  /// Sends one framed message to `peer`, invoking `writer` to produce the
  /// body. Never blocks; silently drops if the peer is unknown, disconnected,
  /// or the transport is shutting down.
  fn send_message(&self, peer: PeerId, writer: WriterFn);

  /// Installs the handler invoked for every inbound message. One handler at
  /// a time; installing a new one replaces the old.
  fn register_handler(&self, handler: Arc<dyn MessageHandler>);

  /// Removes the installed handler; subsequent inbound messages are dropped.
  fn clear_handler(&self);

  /// A view of which peers are currently reachable.
  fn connectivity(&self) -> Arc<dyn Connectivity>;
}
