//! mailbus - a cluster-local mailbox RPC substrate.
//!
//! Workers on different machines (and different threads within a machine)
//! address each other through small, copyable endpoint names: a mailbox
//! address is a `(peer, thread, mailbox_id)` triple that can be serialized
//! into any payload and sent over any channel. Sending to an address never
//! blocks and never fails observably; the receiver's handler runs on the
//! thread that owns the mailbox, and teardown drains in-flight deliveries
//! before the handler is released.
//!
//! The crate is payload-agnostic and deliberately unreliable: a message to a
//! mailbox that no longer exists, or to a peer that is not connected, is
//! dropped in silence. Reliability, retries, and request/response pairing
//! belong to the layers above.

/// Mailbox addressing: peers, ids, and the transmissible address triple.
pub mod address;
/// The crate's error type for its fallible (codec/transport) surfaces.
pub mod error;
/// The handler seam: stream reads and the typed local fast path.
pub mod handler;
/// The mailbox endpoint handle.
pub mod mailbox;
/// The manager: registries, routing, and the send entry points.
pub mod manager;
/// Wire framing of mailbox messages.
pub mod protocol;
/// Per-worker mailbox registries (internal).
mod registry;
/// The cooperative worker pool and drain gate.
pub mod runtime;
/// The peer transport seam and the in-process hub implementation.
pub mod transport;

pub use address::{MailboxAddress, MailboxId, PeerId, ANY_THREAD};
pub use error::MailbusError;
pub use handler::{CallbackHandler, LocalDeliveryFn, MailboxHandler};
pub use mailbox::Mailbox;
pub use manager::{send, MailboxManager};
pub use runtime::{current_worker, WorkerPool};
pub use transport::{Connectivity, MemoryEndpoint, MemoryHub, MessageHandler, MessageService, WriterFn};

// --- Library version ---

const VERSION_MAJOR: i32 = 0;
const VERSION_MINOR: i32 = 1;
const VERSION_PATCH: i32 = 0;

/// Returns the library version as a tuple (major, minor, patch).
pub fn version() -> (i32, i32, i32) {
  (VERSION_MAJOR, VERSION_MINOR, VERSION_PATCH)
}

/// Returns the major version number of the library.
pub fn version_major() -> i32 {
  VERSION_MAJOR
}

/// Returns the minor version number of the library.
pub fn version_minor() -> i32 {
  VERSION_MINOR
}

/// Returns the patch version number of the library.
pub fn version_patch() -> i32 {
  VERSION_PATCH
}
