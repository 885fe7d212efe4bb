//! Per-message routing.
//!
//! The router parses an inbound wire frame, suppresses loops through the
//! recent-nonce cache, matches the frame against the node's key classes
//! (content, channels, profiles), hands it to the node's consumer, and
//! forwards it through the patch table. It keeps no per-message state
//! beyond the nonce cache.

use std::collections::HashMap;

use async_trait::async_trait;
use serde_derive::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::errors::{ApiErrorKind, ApiResult};
use crate::filter::RecentCache;
use crate::message::{Msg, CHANNEL_FLAG, CHUNKED_FLAG, NONCE_SIZE, STREAM_HEADER_FLAG};
use crate::node::NodeApi;

/// A static rewrite rule: on forward, replace a message's incoming channel
/// name with one or more outgoing names.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Patch {
    pub from: String,
    pub to: Vec<String>,
}

/// Routing policy for one node.
#[async_trait]
pub trait Router: Send + Sync + std::fmt::Debug {
    /// Route one inbound frame.
    async fn route(&self, node: &dyn NodeApi, message: &[u8]) -> ApiResult<()>;

    /// Append a rewrite rule to the patch table.
    fn patch(&mut self, patch: Patch);

    /// The mappings of incoming channels to destination channels.
    fn patches(&self) -> &[Patch];

    /// Serialize this router's configuration to its keyed JSON record.
    fn to_json(&self) -> ApiResult<Value>;
}

/// The default router makes no changes at all: every message is sent out on
/// the same channel it came in on, and non-channel messages are consumed but
/// not forwarded.
#[derive(Debug)]
pub struct DefaultRouter {
    recent: RecentCache,

    pub patches: Vec<Patch>,

    // Configuration settings

    /// Check if incoming messages are for the content key
    pub check_content: bool,
    /// Check if incoming messages are for any of the channel keys
    pub check_channels: bool,
    /// Check if incoming messages are for any of the profile keys
    pub check_profiles: bool,

    /// Should the node forward consumed messages that matched the content key
    pub forward_consumed_content: bool,
    /// Should the node forward consumed messages that matched a channel key
    pub forward_consumed_channels: bool,
    /// Should the node forward consumed messages that matched a profile key
    pub forward_consumed_profiles: bool,

    /// Should the node forward non-consumed messages that matched the content key
    pub forward_unknown_content: bool,
    /// Should the node forward non-consumed messages that matched a channel key
    pub forward_unknown_channels: bool,
    /// Should the node forward non-consumed messages that matched a profile key
    pub forward_unknown_profiles: bool,
}

impl Default for DefaultRouter {
    fn default() -> Self {
        Self::new()
    }
}

impl DefaultRouter {
    pub fn new() -> Self {
        Self {
            recent: RecentCache::new(),
            patches: Vec::new(),
            check_content: true,
            check_channels: true,
            check_profiles: false,
            forward_unknown_content: true,
            forward_unknown_channels: true,
            forward_unknown_profiles: false,
            forward_consumed_content: false,
            forward_consumed_channels: true,
            forward_consumed_profiles: false,
        }
    }

    /// Build a router from its keyed JSON record, taking defaults for any
    /// missing flag.
    pub fn from_json(config: &Value) -> ApiResult<Self> {
        let mut router = Self::new();
        let flag = |name: &str, default: bool| -> bool {
            config.get(name).and_then(Value::as_bool).unwrap_or(default)
        };
        router.check_content = flag("CheckContent", router.check_content);
        router.check_channels = flag("CheckChannels", router.check_channels);
        router.check_profiles = flag("CheckProfiles", router.check_profiles);
        router.forward_consumed_content =
            flag("ForwardConsumedContent", router.forward_consumed_content);
        router.forward_consumed_channels =
            flag("ForwardConsumedChannels", router.forward_consumed_channels);
        router.forward_consumed_profiles =
            flag("ForwardConsumedProfiles", router.forward_consumed_profiles);
        router.forward_unknown_content =
            flag("ForwardUnknownContent", router.forward_unknown_content);
        router.forward_unknown_channels =
            flag("ForwardUnknownChannels", router.forward_unknown_channels);
        router.forward_unknown_profiles =
            flag("ForwardUnknownProfiles", router.forward_unknown_profiles);
        if let Some(patches) = config.get("Patches") {
            if !patches.is_null() {
                router.patches = serde_json::from_value(patches.clone())?;
            }
        }
        Ok(router)
    }

    /// Forward through the patch table: the first patch whose `From` matches
    /// fans the message out to each of its destinations; with no match the
    /// message forwards once unchanged.
    async fn forward(&self, node: &dyn NodeApi, mut msg: Msg) -> ApiResult<()> {
        for p in &self.patches {
            // IsChan is not checked here: forwarding from the "" channel to
            // named channels is allowed
            if msg.name == p.from {
                for to in &p.to {
                    msg.name = to.clone();
                    msg.is_chan = !msg.name.is_empty();
                    node.forward(msg.clone()).await?;
                }
                return Ok(());
            }
        }
        node.forward(msg).await
    }
}

#[async_trait]
impl Router for DefaultRouter {
    async fn route(&self, node: &dyn NodeApi, message: &[u8]) -> ApiResult<()> {
        if message.is_empty() {
            return Err(ApiErrorKind::MalformedMessage.into());
        }
        let flags = message[0];
        let mut idx = 1usize;
        let mut msg = Msg {
            is_chan: flags & CHANNEL_FLAG != 0,
            chunked: flags & CHUNKED_FLAG != 0,
            stream_header: flags & STREAM_HEADER_FLAG != 0,
            ..Default::default()
        };
        if msg.is_chan {
            // beginning u16 of the message is the channel name length
            if message.len() < 3 {
                return Err(ApiErrorKind::MalformedMessage.into());
            }
            let channel_len = u16::from_be_bytes([message[1], message[2]]) as usize;
            if 3 + channel_len > message.len() {
                return Err(ApiErrorKind::MalformedMessage.into());
            }
            msg.name = String::from_utf8_lossy(&message[3..3 + channel_len]).into_owned();
            idx += 2 + channel_len;
        }
        if idx + 16 >= message.len() {
            return Err(ApiErrorKind::MalformedMessage.into());
        }
        // a tail shorter than NONCE_SIZE passes the length check above and
        // yields a short nonce
        let nonce = &message[idx..(idx + NONCE_SIZE).min(message.len())];
        if self.recent.seen_recently(nonce) {
            // LOOP PREVENTION before handling or forwarding
            return Ok(());
        }
        let cid = node.cid()?;
        msg.content = message[idx..].to_vec();

        // Routing logic
        if msg.is_chan {
            // channel message
            let mut consumed = false;
            if self.check_channels {
                if let Some(chn) = node.get_channel(&msg.name).await? {
                    // this is a channel key we know
                    let mut pubkey = cid.clone_box();
                    let _ = pubkey.from_b64(&chn.pubkey);
                    consumed = node.handle(msg.clone()).await?;
                }
            }
            if (!consumed && self.forward_unknown_channels)
                || (consumed && self.forward_consumed_channels)
            {
                self.forward(node, msg).await?;
            }
        } else {
            // private message (zero length channel)

            // content key case
            let mut consumed = false;
            if self.check_content {
                consumed = node.handle(msg.clone()).await?;
            }
            if (!consumed && self.forward_unknown_content)
                || (consumed && self.forward_consumed_content)
            {
                self.forward(node, msg.clone()).await?;
            }

            // profile keys case
            consumed = false;
            if self.check_profiles {
                for profile in node.get_profiles().await? {
                    if !profile.enabled {
                        continue;
                    }
                    let mut pubkey = cid.clone_box();
                    let _ = pubkey.from_b64(&profile.pubkey);
                    consumed = node.handle(msg.clone()).await?;
                    if consumed {
                        break;
                    }
                }
            }
            if (!consumed && self.forward_unknown_profiles)
                || (consumed && self.forward_consumed_profiles)
            {
                self.forward(node, msg).await?;
            }
        }
        Ok(())
    }

    fn patch(&mut self, patch: Patch) {
        self.patches.push(patch);
    }

    fn patches(&self) -> &[Patch] {
        &self.patches
    }

    fn to_json(&self) -> ApiResult<Value> {
        Ok(json!({
            "Router": "default",
            "CheckContent": self.check_content,
            "ForwardConsumedContent": self.forward_consumed_content,
            "ForwardUnknownContent": self.forward_unknown_content,
            "CheckProfiles": self.check_profiles,
            "ForwardConsumedProfiles": self.forward_consumed_profiles,
            "ForwardUnknownProfiles": self.forward_unknown_profiles,
            "CheckChannels": self.check_channels,
            "ForwardConsumedChannels": self.forward_consumed_channels,
            "ForwardUnknownChannels": self.forward_unknown_channels,
            "Patches": self.patches,
        }))
    }
}

type RouterFactory = fn(&Value) -> ApiResult<Box<dyn Router>>;

/// Maps router type tags to constructors, for rebuilding a router from its
/// serialized configuration. Populated explicitly at program start.
pub struct RouterRegistry {
    factories: HashMap<String, RouterFactory>,
}

impl Default for RouterRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl RouterRegistry {
    /// A registry holding every built-in router type.
    pub fn with_defaults() -> Self {
        let mut registry = Self {
            factories: HashMap::new(),
        };
        registry.register("default", |config| {
            Ok(Box::new(DefaultRouter::from_json(config)?))
        });
        registry
    }

    pub fn register(&mut self, name: &str, factory: RouterFactory) {
        self.factories.insert(name.to_owned(), factory);
    }

    /// Rebuild a router from its keyed JSON record, dispatching on the
    /// `Router` tag.
    pub fn from_json(&self, config: &Value) -> ApiResult<Box<dyn Router>> {
        let tag = config
            .get("Router")
            .and_then(Value::as_str)
            .unwrap_or("default");
        let factory = self
            .factories
            .get(tag)
            .ok_or_else(|| ApiErrorKind::UnknownRouter(tag.to_owned()))?;
        factory(config)
    }
}
