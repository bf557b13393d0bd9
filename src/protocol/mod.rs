//! Wire-level framing of mailbox messages.

pub mod frame;

pub use frame::{encode_frame_with, FrameCodec, MailboxFrame, FRAME_HEADER_LEN};
