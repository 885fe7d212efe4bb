//! Wire message model.
//!
//! Frame layout: `[flags:1][chanLen:u16_be?][chan:bytes?][nonce:32][ciphertext]`.
//! The channel-length and channel-name fields are only present when
//! [`CHANNEL_FLAG`] is set. `content` keeps the nonce: downstream decryption
//! consumes it together with the ciphertext.

use crate::errors::{ApiErrorKind, ApiResult};

/// Flag bit: the message is addressed to a named channel.
pub const CHANNEL_FLAG: u8 = 0x01;
/// Flag bit: the message body is one chunk of a larger stream.
pub const CHUNKED_FLAG: u8 = 0x02;
/// Flag bit: the message body is a stream reassembly header.
pub const STREAM_HEADER_FLAG: u8 = 0x04;

/// Size of the duplicate-detection nonce at the head of the body.
pub const NONCE_SIZE: usize = 32;

/// A parsed overlay message.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Msg {
    /// Channel name, empty for private messages.
    pub name: String,
    /// Nonce plus ciphertext, exactly as received.
    pub content: Vec<u8>,
    pub is_chan: bool,
    pub chunked: bool,
    pub stream_header: bool,
}

impl Msg {
    /// Encode the message back into its wire frame.
    pub fn to_wire(&self) -> ApiResult<Vec<u8>> {
        let mut flags = 0u8;
        if self.is_chan {
            flags |= CHANNEL_FLAG;
        }
        if self.chunked {
            flags |= CHUNKED_FLAG;
        }
        if self.stream_header {
            flags |= STREAM_HEADER_FLAG;
        }

        let mut wire = Vec::with_capacity(3 + self.name.len() + self.content.len());
        wire.push(flags);
        if self.is_chan {
            let name = self.name.as_bytes();
            if name.len() > u16::MAX as usize {
                return Err(ApiErrorKind::ChannelNameTooLong(name.len()).into());
            }
            wire.extend_from_slice(&(name.len() as u16).to_be_bytes());
            wire.extend_from_slice(name);
        }
        wire.extend_from_slice(&self.content);
        Ok(wire)
    }
}
