//! In-process peer transport.
//!
//! A [`MemoryHub`] is a process-local cluster: every attached
//! [`MemoryEndpoint`] gets a fresh peer id and can message any other endpoint
//! on the same hub. Delivery runs inline on the sending thread, which
//! preserves per-sender ordering the way a real stream transport would.
//! Connectivity can be toggled per peer to exercise drop paths.

use crate::address::PeerId;
use crate::transport::{Connectivity, MessageHandler, MessageService, WriterFn};
use bytes::BytesMut;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

struct HubInner {
  next_peer: AtomicU64,
  endpoints: RwLock<HashMap<PeerId, Arc<MemoryEndpoint>>>,
}

/// A process-local cluster of peers. Cheap to clone; all clones share the
/// same peer namespace.
#[derive(Clone)]
pub struct MemoryHub {
  inner: Arc<HubInner>,
}

impl MemoryHub {
  pub fn new() -> Self {
    MemoryHub {
      inner: Arc::new(HubInner {
        // Peer ids start at 1; 0 is the nil peer.
        next_peer: AtomicU64::new(1),
        endpoints: RwLock::new(HashMap::new()),
      }),
    }
  }

  /// Joins the hub as a new peer and returns its transport endpoint.
  pub fn attach(&self) -> Arc<MemoryEndpoint> {
    let peer = PeerId::from_raw(self.inner.next_peer.fetch_add(1, Ordering::Relaxed));
    let endpoint = Arc::new(MemoryEndpoint {
      hub: Arc::downgrade(&self.inner),
      peer,
      handler: RwLock::new(None),
      connected: AtomicBool::new(true),
    });
    self.inner.endpoints.write().insert(peer, endpoint.clone());
    tracing::debug!(%peer, "peer attached to memory hub");
    endpoint
  }

  /// Marks a peer unreachable. Messages to or from it are dropped until
  /// [`MemoryHub::reconnect`].
  pub fn disconnect(&self, peer: PeerId) {
    if let Some(endpoint) = self.inner.endpoints.read().get(&peer) {
      endpoint.connected.store(false, Ordering::Release);
      tracing::debug!(%peer, "peer disconnected");
    }
  }

  pub fn reconnect(&self, peer: PeerId) {
    if let Some(endpoint) = self.inner.endpoints.read().get(&peer) {
      endpoint.connected.store(true, Ordering::Release);
      tracing::debug!(%peer, "peer reconnected");
    }
  }

  /// Removes a peer from the hub entirely.
  pub fn detach(&self, peer: PeerId) {
    if self.inner.endpoints.write().remove(&peer).is_some() {
      tracing::debug!(%peer, "peer detached from memory hub");
    }
  }
}

impl Default for MemoryHub {
  fn default() -> Self {
    Self::new()
  }
}

/// One peer's connection to a [`MemoryHub`].
pub struct MemoryEndpoint {
  hub: Weak<HubInner>,
  peer: PeerId,
  handler: RwLock<Option<Arc<dyn MessageHandler>>>,
  connected: AtomicBool,
}

impl MessageService for MemoryEndpoint {
  fn local_peer(&self) -> PeerId {
    self.peer
  }

  fn send_message(&self, peer: PeerId, writer: WriterFn) {
    let Some(hub) = self.hub.upgrade() else {
      tracing::trace!(%peer, "send dropped, hub is gone");
      return;
    };
    let Some(dest) = hub.endpoints.read().get(&peer).cloned() else {
      tracing::trace!(%peer, "send dropped, unknown peer");
      return;
    };
    if !self.connected.load(Ordering::Acquire) || !dest.connected.load(Ordering::Acquire) {
      tracing::trace!(source = %self.peer, %peer, "send dropped, peer disconnected");
      return;
    }

    let mut message = BytesMut::new();
    writer(&mut message);

    let handler = dest.handler.read().clone();
    match handler {
      Some(handler) => handler.on_message(self.peer, &mut message),
      None => tracing::trace!(%peer, "send dropped, no handler registered"),
    }
  }

  fn register_handler(&self, handler: Arc<dyn MessageHandler>) {
    *self.handler.write() = Some(handler);
  }

  fn clear_handler(&self) {
    *self.handler.write() = None;
  }

  fn connectivity(&self) -> Arc<dyn Connectivity> {
    Arc::new(HubConnectivity {
      hub: self.hub.clone(),
    })
  }
}

struct HubConnectivity {
  hub: Weak<HubInner>,
}

impl Connectivity for HubConnectivity {
  fn is_connected(&self, peer: PeerId) -> bool {
    self
      .hub
      .upgrade()
      .map(|hub| {
        hub
          .endpoints
          .read()
          .get(&peer)
          .is_some_and(|endpoint| endpoint.connected.load(Ordering::Acquire))
      })
      .unwrap_or(false)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use parking_lot::Mutex;

  struct Recorder {
    messages: Mutex<Vec<(PeerId, Vec<u8>)>>,
  }

  impl MessageHandler for Recorder {
    fn on_message(&self, source: PeerId, message: &mut BytesMut) {
      self.messages.lock().push((source, message.to_vec()));
    }
  }

  fn recorder() -> Arc<Recorder> {
    Arc::new(Recorder {
      messages: Mutex::new(Vec::new()),
    })
  }

  #[test]
  fn messages_reach_the_registered_handler_in_order() {
    let hub = MemoryHub::new();
    let a = hub.attach();
    let b = hub.attach();
    let seen = recorder();
    b.register_handler(seen.clone());

    for n in 0..5u8 {
      a.send_message(b.local_peer(), Box::new(move |buf| buf.extend_from_slice(&[n])));
    }

    let messages = seen.messages.lock();
    assert_eq!(messages.len(), 5);
    for (n, (source, body)) in messages.iter().enumerate() {
      assert_eq!(*source, a.local_peer());
      assert_eq!(body, &[n as u8]);
    }
  }

  #[test]
  fn sends_to_unknown_or_disconnected_peers_are_dropped() {
    let hub = MemoryHub::new();
    let a = hub.attach();
    let b = hub.attach();
    let seen = recorder();
    b.register_handler(seen.clone());

    a.send_message(PeerId::from_raw(999), Box::new(|buf| buf.extend_from_slice(b"x")));

    hub.disconnect(b.local_peer());
    assert!(!a.connectivity().is_connected(b.local_peer()));
    a.send_message(b.local_peer(), Box::new(|buf| buf.extend_from_slice(b"lost")));

    hub.reconnect(b.local_peer());
    a.send_message(b.local_peer(), Box::new(|buf| buf.extend_from_slice(b"kept")));

    let messages = seen.messages.lock();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].1, b"kept");
  }

  #[test]
  fn peer_ids_are_unique_and_never_nil() {
    let hub = MemoryHub::new();
    let a = hub.attach();
    let b = hub.attach();
    assert!(!a.local_peer().is_nil());
    assert!(!b.local_peer().is_nil());
    assert_ne!(a.local_peer(), b.local_peer());
  }
}
