//! Row models for the entities the store persists.

use serde_derive::{Deserialize, Serialize};

use crate::crypto::KeyPair;

/// A remote identity known by public key.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct Contact {
    pub name: String,
    /// base64 public key
    pub pubkey: String,
}

/// A multicast destination whose private key this node holds. The public
/// half is derived on read; the private half never leaves the store row.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct Channel {
    pub name: String,
    pub pubkey: String,
}

/// A channel together with its loaded private key, for consumers that
/// decrypt (e.g. the node's refresh_channels hook).
#[derive(Clone)]
pub struct ChannelPriv {
    pub name: String,
    pub pubkey: String,
    pub privkey: Box<dyn KeyPair>,
}

/// A local identity under which the node receives private messages.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct Profile {
    pub name: String,
    pub enabled: bool,
    pub pubkey: String,
}

/// A transport-layer peer record, grouped for selective sync.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct Peer {
    pub name: String,
    pub uri: String,
    pub enabled: bool,
    pub group: String,
}

/// Reassembly header for a chunked stream.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct StreamHeader {
    pub stream_id: u32,
    pub num_chunks: u32,
    pub channel: String,
}

/// One numbered fragment of a chunked stream.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct Chunk {
    pub stream_id: u32,
    pub chunk_num: u32,
    pub data: Vec<u8>,
}
