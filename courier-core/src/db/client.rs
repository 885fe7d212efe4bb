use async_trait::async_trait;
use mockall::automock;

use crate::crypto::KeyPair;
use crate::db::error::DbResult;
use crate::db::models::{Channel, ChannelPriv, Chunk, Contact, Peer, Profile, StreamHeader};

/// The result of an outbox drain query.
///
/// `last_time` is the maximum timestamp of any row *observed* during the
/// scan, not only of the collected messages; feeding it back as the next
/// call's `last_time` makes a drain loop converge.
#[derive(Default, Debug)]
pub struct FetchMessageResponse {
    pub messages: Vec<Vec<u8>>,
    pub last_time: i64,
}

/// Provides high-level operations over the node database.
#[automock]
#[async_trait]
pub trait StoreClient: Send + Sync {
    /// Idempotently create the schema, then ensure the content and routing
    /// keypairs exist in `config`, generating fresh keys when missing.
    /// Returns the loaded `(content, routing)` keypairs.
    async fn bootstrap(&self) -> DbResult<(Box<dyn KeyPair>, Box<dyn KeyPair>)>;

    /// Read a contact's public key. Absence is not an error.
    async fn get_contact_pubkey(&self, name: &str) -> DbResult<Option<String>>;

    /// Read all contacts. Ordering is unspecified.
    async fn get_contacts(&self) -> DbResult<Vec<Contact>>;

    /// Upsert a contact: atomically delete any row with this name, insert
    /// the new one.
    async fn add_contact(&self, name: &str, pubkey: &str) -> DbResult<()>;

    /// Delete a contact. Idempotent; absence is not an error.
    async fn delete_contact(&self, name: &str) -> DbResult<()>;

    /// Read a channel's private key. Absence is not an error.
    async fn get_channel_privkey(&self, name: &str) -> DbResult<Option<String>>;

    /// Read all channels with public keys derived from the stored private
    /// halves.
    async fn get_channels(&self) -> DbResult<Vec<Channel>>;

    /// Read all channels together with their loaded private keys.
    async fn get_channel_privs(&self) -> DbResult<Vec<ChannelPriv>>;

    /// Upsert a channel keyed by name.
    async fn add_channel(&self, name: &str, privkey: &str) -> DbResult<()>;

    /// Delete a channel. Idempotent.
    async fn delete_channel(&self, name: &str) -> DbResult<()>;

    /// Read one profile, public key derived. Absence is not an error.
    async fn get_profile(&self, name: &str) -> DbResult<Option<Profile>>;

    /// Read all profiles, public keys derived.
    async fn get_profiles(&self) -> DbResult<Vec<Profile>>;

    /// Insert a profile with a freshly generated keypair, or update only the
    /// `enabled` flag when the profile already exists.
    async fn add_profile(&self, name: &str, enabled: bool) -> DbResult<()>;

    /// Delete a profile. Idempotent.
    async fn delete_profile(&self, name: &str) -> DbResult<()>;

    /// Read a profile's private key; empty string when absent.
    async fn get_profile_privkey(&self, name: &str) -> DbResult<String>;

    /// Read one peer. Absence is not an error.
    async fn get_peer(&self, name: &str) -> DbResult<Option<Peer>>;

    /// Read all peers in a group.
    async fn get_peers(&self, group: &str) -> DbResult<Vec<Peer>>;

    /// Insert a peer, or update it when a row with this name exists.
    async fn add_peer(&self, name: &str, enabled: bool, uri: &str, group: &str) -> DbResult<()>;

    /// Delete a peer. Idempotent.
    async fn delete_peer(&self, name: &str) -> DbResult<()>;

    /// Append one message to the outbox at the given timestamp. When
    /// `check_exists` is set, skip the insert if an identical
    /// `(channel, msg)` row is already present.
    async fn outbox_enqueue(
        &self,
        channel: &str,
        msg: Vec<u8>,
        ts: i64,
        check_exists: bool,
    ) -> DbResult<()>;

    /// Insert a batch of messages in one transaction; the i-th message
    /// receives timestamp `base_ts + i`.
    async fn outbox_bulk_insert(
        &self,
        channel: &str,
        base_ts: i64,
        msgs: Vec<Vec<u8>>,
    ) -> DbResult<()>;

    /// Drain outbox rows newer than `last_time`, optionally restricted to
    /// the given channels, in ascending timestamp order, accumulating until
    /// the next message would push the total over `max_bytes`.
    async fn get_messages(
        &self,
        last_time: i64,
        max_bytes: i64,
        channels: Vec<String>,
    ) -> DbResult<FetchMessageResponse>;

    /// Upsert a stream reassembly header keyed by stream id.
    async fn add_stream(&self, stream_id: u32, total_chunks: u32, channel: &str) -> DbResult<()>;

    /// Upsert one stream fragment keyed by `(stream_id, chunk_num)`.
    async fn add_chunk(&self, stream_id: u32, chunk_num: u32, data: Vec<u8>) -> DbResult<()>;

    /// Delete a stream's chunks, then its header.
    async fn clear_stream(&self, stream_id: u32) -> DbResult<()>;

    /// Read all stream headers.
    async fn get_streams(&self) -> DbResult<Vec<StreamHeader>>;

    /// Count the chunks received so far for a stream.
    async fn get_chunk_count(&self, stream_id: u32) -> DbResult<u64>;

    /// Read a stream's chunks ordered by chunk number.
    async fn get_chunks(&self, stream_id: u32) -> DbResult<Vec<Chunk>>;

    /// Delete outbox rows older than `max_age_seconds`.
    async fn flush_outbox(&self, max_age_seconds: i64) -> DbResult<()>;

    fn box_clone(&self) -> Box<dyn StoreClient>;
}

impl Clone for Box<dyn StoreClient> {
    fn clone(&self) -> Self {
        self.box_clone()
    }
}
