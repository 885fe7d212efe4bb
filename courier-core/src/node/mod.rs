//! The node facade.
//!
//! A [`Node`] wires the durable store, a router, the content/routing
//! keypairs, and the consumer sink together, and exposes the callback
//! surface ([`NodeApi`]) that the router drives. It stays thin: every
//! durable operation delegates to the store, and message consumption
//! delegates to the injected [`MsgSink`].

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use cadence::{CountedExt, StatsdClient};
use futures::channel::mpsc;
use mockall::automock;
use serde_json::Value;
use tokio::sync::RwLock;

use crate::crypto::{EcdhKeyPair, KeyPair};
use crate::db::client::{FetchMessageResponse, StoreClient};
use crate::db::models::{Channel, Chunk, Contact, Peer, Profile, StreamHeader};
use crate::db::sqlite::SqliteClientImpl;
use crate::errors::{ApiErrorKind, ApiResult};
use crate::logging::init_logging;
use crate::message::Msg;
use crate::metrics::new_metrics;
use crate::router::{DefaultRouter, Patch, Router};
use crate::settings::Settings;
use crate::util::ns_since_epoch;

/// The callback surface the router invokes on a node.
#[automock]
#[async_trait]
pub trait NodeApi: Send + Sync {
    /// The node's content identity, used for cloning key templates.
    fn cid(&self) -> ApiResult<Box<dyn KeyPair>>;

    /// Look up a channel this node holds the key for.
    async fn get_channel(&self, name: &str) -> ApiResult<Option<Channel>>;

    /// The node's local identities.
    async fn get_profiles(&self) -> ApiResult<Vec<Profile>>;

    /// Offer a message to the local consumer. Returns whether it was
    /// consumed.
    async fn handle(&self, msg: Msg) -> ApiResult<bool>;

    /// Queue a message in the outbox for peers to pull.
    async fn forward(&self, msg: Msg) -> ApiResult<()>;
}

/// Consumer of messages the node accepts locally. Decryption and delivery
/// live behind this seam; the node core only cares about the consumed flag.
#[automock]
#[async_trait]
pub trait MsgSink: Send + Sync {
    async fn deliver(&self, msg: Msg) -> ApiResult<bool>;
}

/// A [`MsgSink`] that hands every accepted message to an unbounded consumer
/// channel.
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<Msg>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Msg>) {
        let (tx, rx) = mpsc::unbounded();
        (Self { tx }, rx)
    }
}

#[async_trait]
impl MsgSink for ChannelSink {
    async fn deliver(&self, msg: Msg) -> ApiResult<bool> {
        self.tx
            .unbounded_send(msg)
            .map_err(|_| ApiErrorKind::GeneralError("consumer channel closed".to_owned()))?;
        Ok(true)
    }
}

pub struct Node {
    store: Box<dyn StoreClient>,
    router: RwLock<Box<dyn Router>>,
    content_key: Box<dyn KeyPair>,
    routing_key: Box<dyn KeyPair>,
    /// Channel private keys loaded for consumers; rebuilt by
    /// [`Node::refresh_channels`].
    channel_keys: RwLock<HashMap<String, Box<dyn KeyPair>>>,
    sink: Box<dyn MsgSink>,
    metrics: Arc<StatsdClient>,
}

impl Node {
    /// Stand up a node from settings alone: initialize the global logger,
    /// build the statsd client, and open the store.
    pub async fn from_settings(settings: &Settings, sink: Box<dyn MsgSink>) -> ApiResult<Self> {
        init_logging(settings.human_logs)?;
        let metrics = Arc::new(new_metrics(settings)?);
        Self::new(settings, metrics, sink).await
    }

    /// Open the node store at `settings.db_path`, bootstrap identities, and
    /// wire the default router.
    pub async fn new(
        settings: &Settings,
        metrics: Arc<StatsdClient>,
        sink: Box<dyn MsgSink>,
    ) -> ApiResult<Self> {
        let template: Box<dyn KeyPair> = Box::new(EcdhKeyPair::new());
        let store = SqliteClientImpl::new(&settings.db_path, template, metrics.clone())?;
        Self::with_store(Box::new(store), metrics, sink).await
    }

    /// Wire a node over an already constructed store.
    pub async fn with_store(
        store: Box<dyn StoreClient>,
        metrics: Arc<StatsdClient>,
        sink: Box<dyn MsgSink>,
    ) -> ApiResult<Self> {
        let (content_key, routing_key) = store.bootstrap().await?;
        let node = Self {
            store,
            router: RwLock::new(Box::new(DefaultRouter::new())),
            content_key,
            routing_key,
            channel_keys: RwLock::new(HashMap::new()),
            sink,
            metrics,
        };
        node.refresh_channels().await?;
        debug!("🔀 node up, routing id {}", node.id());
        Ok(node)
    }

    /// The routing identity's public key.
    pub fn id(&self) -> String {
        self.routing_key.public_b64()
    }

    /// Route one inbound frame from a transport.
    pub async fn route(&self, message: &[u8]) -> ApiResult<()> {
        let router = self.router.read().await;
        router.route(self, message).await
    }

    /// Replace the routing policy.
    pub async fn set_router(&self, router: Box<dyn Router>) {
        *self.router.write().await = router;
    }

    /// The active router's serialized configuration.
    pub async fn router_config(&self) -> ApiResult<Value> {
        self.router.read().await.to_json()
    }

    /// Append a rewrite rule to the active router.
    pub async fn add_patch(&self, patch: Patch) {
        self.router.write().await.patch(patch);
    }

    /// Reload the channel private keys held in memory for consumers.
    pub async fn refresh_channels(&self) -> ApiResult<()> {
        let privs = self.store.get_channel_privs().await?;
        let mut keys = self.channel_keys.write().await;
        keys.clear();
        for chan in privs {
            keys.insert(chan.name, chan.privkey);
        }
        Ok(())
    }

    /// The loaded private key for a channel, if this node holds it.
    pub async fn channel_key(&self, name: &str) -> Option<Box<dyn KeyPair>> {
        self.channel_keys.read().await.get(name).cloned()
    }

    pub async fn get_contact_pubkey(&self, name: &str) -> ApiResult<Option<String>> {
        Ok(self.store.get_contact_pubkey(name).await?)
    }

    pub async fn get_contacts(&self) -> ApiResult<Vec<Contact>> {
        Ok(self.store.get_contacts().await?)
    }

    pub async fn add_contact(&self, name: &str, pubkey: &str) -> ApiResult<()> {
        Ok(self.store.add_contact(name, pubkey).await?)
    }

    pub async fn delete_contact(&self, name: &str) -> ApiResult<()> {
        Ok(self.store.delete_contact(name).await?)
    }

    pub async fn get_channels(&self) -> ApiResult<Vec<Channel>> {
        Ok(self.store.get_channels().await?)
    }

    /// Add a channel key and reload the in-memory key map.
    pub async fn add_channel(&self, name: &str, privkey: &str) -> ApiResult<()> {
        self.store.add_channel(name, privkey).await?;
        self.refresh_channels().await
    }

    pub async fn delete_channel(&self, name: &str) -> ApiResult<()> {
        self.store.delete_channel(name).await?;
        self.refresh_channels().await
    }

    pub async fn get_profile(&self, name: &str) -> ApiResult<Option<Profile>> {
        Ok(self.store.get_profile(name).await?)
    }

    pub async fn add_profile(&self, name: &str, enabled: bool) -> ApiResult<()> {
        Ok(self.store.add_profile(name, enabled).await?)
    }

    pub async fn delete_profile(&self, name: &str) -> ApiResult<()> {
        Ok(self.store.delete_profile(name).await?)
    }

    pub async fn get_peer(&self, name: &str) -> ApiResult<Option<Peer>> {
        Ok(self.store.get_peer(name).await?)
    }

    pub async fn get_peers(&self, group: &str) -> ApiResult<Vec<Peer>> {
        Ok(self.store.get_peers(group).await?)
    }

    pub async fn add_peer(
        &self,
        name: &str,
        enabled: bool,
        uri: &str,
        group: &str,
    ) -> ApiResult<()> {
        Ok(self.store.add_peer(name, enabled, uri, group).await?)
    }

    pub async fn delete_peer(&self, name: &str) -> ApiResult<()> {
        Ok(self.store.delete_peer(name).await?)
    }

    /// Queue an already sealed message for peers to pull. Unlike the
    /// router's forward path this never checks for an existing identical
    /// row; a local sender may legitimately repeat itself.
    pub async fn send_msg(&self, channel: &str, content: Vec<u8>) -> ApiResult<()> {
        let msg = Msg {
            name: channel.to_owned(),
            is_chan: !channel.is_empty(),
            content,
            ..Default::default()
        };
        let data = msg.to_wire()?;
        self.store
            .outbox_enqueue(channel, data, ns_since_epoch(), false)
            .await?;
        self.metrics.incr("node.send").ok();
        Ok(())
    }

    /// Drain pending outbox messages for a pulling peer.
    pub async fn get_messages(
        &self,
        last_time: i64,
        max_bytes: i64,
        channels: Vec<String>,
    ) -> ApiResult<FetchMessageResponse> {
        Ok(self.store.get_messages(last_time, max_bytes, channels).await?)
    }

    pub async fn flush_outbox(&self, max_age_seconds: i64) -> ApiResult<()> {
        Ok(self.store.flush_outbox(max_age_seconds).await?)
    }

    pub async fn add_stream(
        &self,
        stream_id: u32,
        total_chunks: u32,
        channel: &str,
    ) -> ApiResult<()> {
        Ok(self.store.add_stream(stream_id, total_chunks, channel).await?)
    }

    pub async fn add_chunk(&self, stream_id: u32, chunk_num: u32, data: Vec<u8>) -> ApiResult<()> {
        Ok(self.store.add_chunk(stream_id, chunk_num, data).await?)
    }

    pub async fn get_streams(&self) -> ApiResult<Vec<StreamHeader>> {
        Ok(self.store.get_streams().await?)
    }

    pub async fn get_chunk_count(&self, stream_id: u32) -> ApiResult<u64> {
        Ok(self.store.get_chunk_count(stream_id).await?)
    }

    pub async fn get_chunks(&self, stream_id: u32) -> ApiResult<Vec<Chunk>> {
        Ok(self.store.get_chunks(stream_id).await?)
    }

    pub async fn clear_stream(&self, stream_id: u32) -> ApiResult<()> {
        Ok(self.store.clear_stream(stream_id).await?)
    }
}

#[async_trait]
impl NodeApi for Node {
    fn cid(&self) -> ApiResult<Box<dyn KeyPair>> {
        Ok(self.content_key.clone_box())
    }

    async fn get_channel(&self, name: &str) -> ApiResult<Option<Channel>> {
        let Some(privkey) = self.store.get_channel_privkey(name).await? else {
            return Ok(None);
        };
        let mut key = self.content_key.clone_box();
        key.from_b64(&privkey)?;
        Ok(Some(Channel {
            name: name.to_owned(),
            pubkey: key.public_b64(),
        }))
    }

    async fn get_profiles(&self) -> ApiResult<Vec<Profile>> {
        Ok(self.store.get_profiles().await?)
    }

    async fn handle(&self, msg: Msg) -> ApiResult<bool> {
        let consumed = self.sink.deliver(msg).await?;
        if consumed {
            self.metrics.incr("node.handle.consumed").ok();
        }
        Ok(consumed)
    }

    async fn forward(&self, msg: Msg) -> ApiResult<()> {
        let data = msg.to_wire()?;
        self.store
            .outbox_enqueue(&msg.name, data, ns_since_epoch(), true)
            .await?;
        self.metrics.incr("node.forward").ok();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use cadence::NopMetricSink;
    use futures::StreamExt;

    use super::*;
    use crate::db::error::DbError;
    use crate::db::mock::MockStoreClient;
    use crate::logging::init_test_logging;
    use crate::message::{CHANNEL_FLAG, NONCE_SIZE};

    fn test_metrics() -> Arc<StatsdClient> {
        Arc::new(StatsdClient::builder("", NopMetricSink).build())
    }

    fn chan_frame(name: &str, seed: u8) -> Vec<u8> {
        let mut frame = vec![CHANNEL_FLAG];
        frame.extend_from_slice(&(name.len() as u16).to_be_bytes());
        frame.extend_from_slice(name.as_bytes());
        frame.extend((0..NONCE_SIZE as u8).map(|i| seed.wrapping_add(i)));
        frame.extend_from_slice(b"sealed payload");
        frame
    }

    fn private_frame(seed: u8) -> Vec<u8> {
        let mut frame = vec![0u8];
        frame.extend((0..NONCE_SIZE as u8).map(|i| seed.wrapping_add(i)));
        frame.extend_from_slice(b"sealed payload");
        frame
    }

    async fn test_node() -> (Node, mpsc::UnboundedReceiver<Msg>) {
        init_test_logging();
        let (sink, rx) = ChannelSink::new();
        let node = Node::new(&Settings::test_settings(), test_metrics(), Box::new(sink))
            .await
            .unwrap();
        (node, rx)
    }

    #[tokio::test]
    async fn known_channel_consumed_and_forwarded() {
        let (node, mut rx) = test_node().await;
        let chan_key = EcdhKeyPair::new();
        node.add_channel("ops", &chan_key.to_b64()).await.unwrap();

        let frame = chan_frame("ops", 1);
        node.route(&frame).await.unwrap();

        // the consumer saw the message
        let delivered = rx.next().await.unwrap();
        assert_eq!(delivered.name, "ops");
        assert!(delivered.is_chan);
        assert_eq!(delivered.content, frame[6..].to_vec());

        // consumed channel messages are re-queued for peers, identical to
        // the inbound frame
        let outbox = node.get_messages(0, 1_000_000, vec![]).await.unwrap();
        assert_eq!(outbox.messages, vec![frame]);
    }

    #[tokio::test]
    async fn duplicate_frame_enqueued_once() {
        let (node, mut rx) = test_node().await;
        let chan_key = EcdhKeyPair::new();
        node.add_channel("ops", &chan_key.to_b64()).await.unwrap();

        let frame = chan_frame("ops", 2);
        node.route(&frame).await.unwrap();
        node.route(&frame).await.unwrap();

        let outbox = node.get_messages(0, 1_000_000, vec![]).await.unwrap();
        assert_eq!(outbox.messages.len(), 1);
        assert!(rx.next().await.is_some());
        assert!(rx.try_next().is_err(), "second delivery should not happen");
    }

    #[tokio::test]
    async fn private_message_not_requeued() {
        let (node, mut rx) = test_node().await;
        node.route(&private_frame(3)).await.unwrap();

        let delivered = rx.next().await.unwrap();
        assert!(delivered.name.is_empty());
        assert!(!delivered.is_chan);

        let outbox = node.get_messages(0, 1_000_000, vec![]).await.unwrap();
        assert!(outbox.messages.is_empty());
    }

    #[tokio::test]
    async fn patched_forward_lands_on_rewritten_channel() {
        let (node, _rx) = test_node().await;
        let chan_key = EcdhKeyPair::new();
        node.add_channel("in", &chan_key.to_b64()).await.unwrap();
        node.add_patch(Patch {
            from: "in".to_owned(),
            to: vec!["out".to_owned()],
        })
        .await;

        node.route(&chan_frame("in", 4)).await.unwrap();

        let rewritten = node
            .get_messages(0, 1_000_000, vec!["out".to_owned()])
            .await
            .unwrap();
        assert_eq!(rewritten.messages.len(), 1);
        // the forwarded frame carries the rewritten channel header
        assert_eq!(&rewritten.messages[0][3..6], b"out");
        assert!(node
            .get_messages(0, 1_000_000, vec!["in".to_owned()])
            .await
            .unwrap()
            .messages
            .is_empty());
    }

    #[tokio::test]
    async fn channel_key_map_follows_store() {
        let (node, _rx) = test_node().await;
        assert!(node.channel_key("ops").await.is_none());

        let chan_key = EcdhKeyPair::new();
        node.add_channel("ops", &chan_key.to_b64()).await.unwrap();
        let loaded = node.channel_key("ops").await.unwrap();
        assert_eq!(loaded.to_b64(), chan_key.to_b64());

        node.delete_channel("ops").await.unwrap();
        assert!(node.channel_key("ops").await.is_none());
    }

    #[tokio::test]
    async fn router_config_round_trips_through_node() {
        let (node, _rx) = test_node().await;
        node.add_patch(Patch {
            from: "a".to_owned(),
            to: vec!["b".to_owned()],
        })
        .await;

        let config = node.router_config().await.unwrap();
        assert_eq!(config["Router"], "default");

        let registry = crate::router::RouterRegistry::with_defaults();
        node.set_router(registry.from_json(&config).unwrap()).await;
        assert_eq!(node.router_config().await.unwrap(), config);
    }

    #[tokio::test]
    async fn store_errors_surface_from_forward() {
        init_test_logging();
        let mut store = MockStoreClient::new();
        store.expect_bootstrap().returning(|| {
            Ok((
                Box::new(EcdhKeyPair::new()) as Box<dyn KeyPair>,
                Box::new(EcdhKeyPair::new()) as Box<dyn KeyPair>,
            ))
        });
        store.expect_get_channel_privs().returning(|| Ok(vec![]));
        store
            .expect_outbox_enqueue()
            .returning(|_, _, _, _| Err(DbError::General("disk full".to_owned())));

        let mut sink = MockMsgSink::new();
        sink.expect_deliver().returning(|_| Ok(false));

        let node = Node::with_store(store.into_boxed_arc(), test_metrics(), Box::new(sink))
            .await
            .unwrap();
        // unconsumed private messages forward by default; the store failure
        // must surface to the transport
        assert!(node.route(&private_frame(5)).await.is_err());
    }

    #[tokio::test]
    async fn send_msg_skips_duplicate_check() {
        let (node, _rx) = test_node().await;
        node.send_msg("ops", b"sealed".to_vec()).await.unwrap();
        node.send_msg("ops", b"sealed".to_vec()).await.unwrap();

        // both copies land; the local send path never deduplicates
        let queued = node
            .get_messages(0, 1_000_000, vec!["ops".to_owned()])
            .await
            .unwrap();
        assert_eq!(queued.messages.len(), 2);
        assert_eq!(queued.messages[0], queued.messages[1]);
        assert_eq!(queued.messages[0][0], CHANNEL_FLAG);
        assert_eq!(&queued.messages[0][3..6], b"ops");

        // the empty channel name produces a private frame
        node.send_msg("", b"sealed".to_vec()).await.unwrap();
        let all = node.get_messages(0, 1_000_000, vec![]).await.unwrap();
        assert_eq!(all.messages.len(), 3);
        assert_eq!(all.messages[2][0], 0);
    }

    #[tokio::test]
    async fn from_settings_wires_ambient_stack() {
        let (sink, _rx) = ChannelSink::new();
        let node = Node::from_settings(&Settings::test_settings(), Box::new(sink))
            .await
            .unwrap();
        assert!(!node.id().is_empty());
        node.send_msg("ops", b"sealed".to_vec()).await.unwrap();
        let queued = node.get_messages(0, 1_000_000, vec![]).await.unwrap();
        assert_eq!(queued.messages.len(), 1);
    }

    #[tokio::test]
    async fn id_is_stable_b64() {
        let (node, _rx) = test_node().await;
        let id = node.id();
        assert_eq!(id, node.id());
        assert!(!id.is_empty());
        assert_ne!(id, node.cid().unwrap().public_b64());
    }
}
