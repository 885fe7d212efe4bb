// mockall::mock currently generates these warnings
#![allow(clippy::unused_unit)]
#![allow(clippy::ptr_arg)]

use std::sync::Arc;

use async_trait::async_trait;

use crate::crypto::KeyPair;
use crate::db::client::{FetchMessageResponse, StoreClient};
pub use crate::db::client::MockStoreClient;
use crate::db::error::DbResult;
use crate::db::models::{Channel, ChannelPriv, Chunk, Contact, Peer, Profile, StreamHeader};

#[async_trait]
impl StoreClient for Arc<MockStoreClient> {
    async fn bootstrap(&self) -> DbResult<(Box<dyn KeyPair>, Box<dyn KeyPair>)> {
        Arc::as_ref(self).bootstrap().await
    }

    async fn get_contact_pubkey(&self, name: &str) -> DbResult<Option<String>> {
        Arc::as_ref(self).get_contact_pubkey(name).await
    }

    async fn get_contacts(&self) -> DbResult<Vec<Contact>> {
        Arc::as_ref(self).get_contacts().await
    }

    async fn add_contact(&self, name: &str, pubkey: &str) -> DbResult<()> {
        Arc::as_ref(self).add_contact(name, pubkey).await
    }

    async fn delete_contact(&self, name: &str) -> DbResult<()> {
        Arc::as_ref(self).delete_contact(name).await
    }

    async fn get_channel_privkey(&self, name: &str) -> DbResult<Option<String>> {
        Arc::as_ref(self).get_channel_privkey(name).await
    }

    async fn get_channels(&self) -> DbResult<Vec<Channel>> {
        Arc::as_ref(self).get_channels().await
    }

    async fn get_channel_privs(&self) -> DbResult<Vec<ChannelPriv>> {
        Arc::as_ref(self).get_channel_privs().await
    }

    async fn add_channel(&self, name: &str, privkey: &str) -> DbResult<()> {
        Arc::as_ref(self).add_channel(name, privkey).await
    }

    async fn delete_channel(&self, name: &str) -> DbResult<()> {
        Arc::as_ref(self).delete_channel(name).await
    }

    async fn get_profile(&self, name: &str) -> DbResult<Option<Profile>> {
        Arc::as_ref(self).get_profile(name).await
    }

    async fn get_profiles(&self) -> DbResult<Vec<Profile>> {
        Arc::as_ref(self).get_profiles().await
    }

    async fn add_profile(&self, name: &str, enabled: bool) -> DbResult<()> {
        Arc::as_ref(self).add_profile(name, enabled).await
    }

    async fn delete_profile(&self, name: &str) -> DbResult<()> {
        Arc::as_ref(self).delete_profile(name).await
    }

    async fn get_profile_privkey(&self, name: &str) -> DbResult<String> {
        Arc::as_ref(self).get_profile_privkey(name).await
    }

    async fn get_peer(&self, name: &str) -> DbResult<Option<Peer>> {
        Arc::as_ref(self).get_peer(name).await
    }

    async fn get_peers(&self, group: &str) -> DbResult<Vec<Peer>> {
        Arc::as_ref(self).get_peers(group).await
    }

    async fn add_peer(&self, name: &str, enabled: bool, uri: &str, group: &str) -> DbResult<()> {
        Arc::as_ref(self).add_peer(name, enabled, uri, group).await
    }

    async fn delete_peer(&self, name: &str) -> DbResult<()> {
        Arc::as_ref(self).delete_peer(name).await
    }

    async fn outbox_enqueue(
        &self,
        channel: &str,
        msg: Vec<u8>,
        ts: i64,
        check_exists: bool,
    ) -> DbResult<()> {
        Arc::as_ref(self)
            .outbox_enqueue(channel, msg, ts, check_exists)
            .await
    }

    async fn outbox_bulk_insert(
        &self,
        channel: &str,
        base_ts: i64,
        msgs: Vec<Vec<u8>>,
    ) -> DbResult<()> {
        Arc::as_ref(self)
            .outbox_bulk_insert(channel, base_ts, msgs)
            .await
    }

    async fn get_messages(
        &self,
        last_time: i64,
        max_bytes: i64,
        channels: Vec<String>,
    ) -> DbResult<FetchMessageResponse> {
        Arc::as_ref(self)
            .get_messages(last_time, max_bytes, channels)
            .await
    }

    async fn add_stream(&self, stream_id: u32, total_chunks: u32, channel: &str) -> DbResult<()> {
        Arc::as_ref(self)
            .add_stream(stream_id, total_chunks, channel)
            .await
    }

    async fn add_chunk(&self, stream_id: u32, chunk_num: u32, data: Vec<u8>) -> DbResult<()> {
        Arc::as_ref(self).add_chunk(stream_id, chunk_num, data).await
    }

    async fn clear_stream(&self, stream_id: u32) -> DbResult<()> {
        Arc::as_ref(self).clear_stream(stream_id).await
    }

    async fn get_streams(&self) -> DbResult<Vec<StreamHeader>> {
        Arc::as_ref(self).get_streams().await
    }

    async fn get_chunk_count(&self, stream_id: u32) -> DbResult<u64> {
        Arc::as_ref(self).get_chunk_count(stream_id).await
    }

    async fn get_chunks(&self, stream_id: u32) -> DbResult<Vec<Chunk>> {
        Arc::as_ref(self).get_chunks(stream_id).await
    }

    async fn flush_outbox(&self, max_age_seconds: i64) -> DbResult<()> {
        Arc::as_ref(self).flush_outbox(max_age_seconds).await
    }

    fn box_clone(&self) -> Box<dyn StoreClient> {
        Box::new(Arc::clone(self))
    }
}

impl MockStoreClient {
    /// Convert into a type which can be used in place of `Box<dyn StoreClient>`.
    /// Arc is used so that the mock can be cloned. Box is used so it can be
    /// easily cast to `Box<dyn StoreClient>`.
    #[allow(clippy::redundant_allocation)]
    pub fn into_boxed_arc(self) -> Box<Arc<Self>> {
        Box::new(Arc::new(self))
    }
}
