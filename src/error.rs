use std::io;
use thiserror::Error;

/// Errors surfaced by the fallible edges of the crate: the wire codec and
/// transport plumbing.
///
/// The delivery path itself never returns an error. Conditions like a nil
/// address, an absent destination mailbox, or a disconnected peer are
/// best-effort drops by design, and breached invariants (truncated frame
/// headers, unregistering an unknown id) abort via panic because there is
/// nothing sensible to recover to.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum MailbusError {
  #[error("I/O error: {0}")]
  Io(#[from] io::Error),

  /// A peer (or a buggy caller) produced bytes that do not parse as a
  /// mailbox frame or address.
  #[error("wire protocol violation: {0}")]
  ProtocolViolation(String),
}
