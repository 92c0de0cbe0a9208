//! LG wire protocol: the fixed frame header and its commands.
//!
//! Every message on the wire starts with a 26-byte little-endian header:
//!
//! ```text
//! ┌─────────┬──────┬──────────┬──────────────┬──────────┐
//! │ Command │ Type │ ID       │ Start offset │ Length   │
//! │ (1B)    │ (1B) │ (8B LE)  │ (8B LE)      │ (8B LE)  │
//! └─────────┴──────┴──────────┴──────────────┴──────────┘
//! ```
//!
//! A DATA header is followed by exactly `length` payload bytes. HANGUP and
//! SHUTDOWN carry no payload and have every numeric field set to zero.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

/// Encoded header size in bytes.
pub const HEADER_SIZE: usize = 26;

/// Command tag carried in the first header byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Command {
    /// Begin a data stream of `length` bytes identified by `id`.
    Data = 0,
    /// Close this connection gracefully; the peer answers with one byte.
    Hangup = 2,
    /// Terminate the server. Not acknowledged.
    Shutdown = 3,
}

impl Command {
    /// Wire tag for this command.
    pub fn tag(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for Command {
    type Error = FrameError;

    fn try_from(tag: u8) -> Result<Self, Self::Error> {
        match tag {
            0 => Ok(Command::Data),
            2 => Ok(Command::Hangup),
            3 => Ok(Command::Shutdown),
            // 1 is never issued by this client
            other => Err(FrameError::UnknownCommand(other)),
        }
    }
}

/// Header decoding errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("header truncated: got {len} bytes, need 26")]
    Truncated { len: usize },

    #[error("unknown command tag {0}")]
    UnknownCommand(u8),
}

/// The fixed header that begins every LG message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub command: Command,
    /// Reserved, always zero.
    pub kind: u8,
    pub id: u64,
    /// Reserved for resumable transfers, always zero.
    pub start_offset: u64,
    pub length: u64,
}

impl FrameHeader {
    /// Header announcing a data stream.
    pub fn data(id: u64, length: u64) -> Self {
        Self {
            command: Command::Data,
            kind: 0,
            id,
            start_offset: 0,
            length,
        }
    }

    pub fn hangup() -> Self {
        Self::control(Command::Hangup)
    }

    pub fn shutdown() -> Self {
        Self::control(Command::Shutdown)
    }

    fn control(command: Command) -> Self {
        Self {
            command,
            kind: 0,
            id: 0,
            start_offset: 0,
            length: 0,
        }
    }

    /// Append the wire encoding of this header to `dst`.
    pub fn encode(&self, dst: &mut BytesMut) {
        dst.reserve(HEADER_SIZE);
        dst.put_u8(self.command.tag());
        dst.put_u8(self.kind);
        dst.put_u64_le(self.id);
        dst.put_u64_le(self.start_offset);
        dst.put_u64_le(self.length);
    }

    /// Encode into a standalone buffer of exactly [`HEADER_SIZE`] bytes.
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(HEADER_SIZE);
        self.encode(&mut buf);
        buf.freeze()
    }

    /// Decode a header from the front of `src`.
    ///
    /// Bytes past the header are ignored.
    #[allow(dead_code)] // the client only sends; decoding serves test servers
    pub fn decode(mut src: &[u8]) -> Result<Self, FrameError> {
        if src.len() < HEADER_SIZE {
            return Err(FrameError::Truncated { len: src.len() });
        }

        let command = Command::try_from(src.get_u8())?;
        let kind = src.get_u8();
        let id = src.get_u64_le();
        let start_offset = src.get_u64_le();
        let length = src.get_u64_le();

        Ok(Self {
            command,
            kind,
            id,
            start_offset,
            length,
        })
    }
}
