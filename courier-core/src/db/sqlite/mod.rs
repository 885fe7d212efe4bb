//! SQLite StoreClient implementation.
//!
//! The node database is a single embedded SQLite file (or `:memory:` for
//! transient nodes). One connection serves the whole process, behind one
//! async mutex: writes must serialize anyway, and a lone SQLite handle does
//! not admit concurrent readers, so the coarse lock is also the honest
//! policy. Every operation materializes its full result set before the lock
//! is released.
//!
//! Failure semantics mirror the store contracts: reads and the caller-facing
//! write entry points return `DbError`; the internal transactional writes
//! (schema creation, key bootstrap, upsert bodies, bulk insert, flush) treat
//! storage failure as fatal to the process, since there is no recovery path
//! for a corrupt or unavailable node store.

use std::sync::Arc;

use async_trait::async_trait;
use cadence::{Counted, CountedExt, StatsdClient};
use lazy_static::lazy_static;
use regex::Regex;
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use tokio::sync::Mutex;

use crate::crypto::KeyPair;
use crate::db::client::{FetchMessageResponse, StoreClient};
use crate::db::error::{DbError, DbResult};
use crate::db::models::{Channel, ChannelPriv, Chunk, Contact, Peer, Profile, StreamHeader};
use crate::util::ns_since_epoch;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS contacts (
    name    TEXT NOT NULL,
    cpubkey TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS channels (
    name    TEXT NOT NULL,
    privkey TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS config (
    name  TEXT NOT NULL,
    value TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS outbox (
    channel   TEXT DEFAULT '',
    msg       BLOB NOT NULL,
    timestamp INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS outboxID ON outbox (timestamp);
CREATE TABLE IF NOT EXISTS peers (
    name      TEXT NOT NULL,
    uri       TEXT NOT NULL,
    enabled   INTEGER NOT NULL,
    peergroup TEXT NOT NULL,
    pubkey    TEXT DEFAULT NULL
);
CREATE TABLE IF NOT EXISTS profiles (
    name    TEXT NOT NULL,
    privkey TEXT NOT NULL,
    enabled INTEGER NOT NULL
);
CREATE TABLE IF NOT EXISTS chunks (
    streamid INTEGER NOT NULL,
    chunknum INTEGER NOT NULL,
    data     BLOB NOT NULL
);
CREATE TABLE IF NOT EXISTS streams (
    streamid INTEGER NOT NULL,
    parts    INTEGER NOT NULL,
    channel  TEXT NOT NULL
);
";

lazy_static! {
    static ref CHANNEL_NAME: Regex = Regex::new("^[0-9A-Za-z]*$").unwrap();
}

/// Abort on a failed critical write. There is no recovery path for a store
/// that cannot commit its own schema or upserts.
fn fatal<T>(result: rusqlite::Result<T>, ctx: &str) -> T {
    match result {
        Ok(v) => v,
        Err(e) => {
            crit!("fatal storage error during {}: {}", ctx, e);
            panic!("fatal storage error during {ctx}: {e}");
        }
    }
}

#[derive(Clone)]
pub struct SqliteClientImpl {
    conn: Arc<Mutex<Connection>>,
    /// Template for deriving channel/profile public keys from stored
    /// private halves, and for generating fresh keys on bootstrap.
    key_template: Box<dyn KeyPair>,
    metrics: Arc<StatsdClient>,
}

impl SqliteClientImpl {
    /// Open (or create) the node database at the given path.
    pub fn new(
        db_path: &str,
        key_template: Box<dyn KeyPair>,
        metrics: Arc<StatsdClient>,
    ) -> DbResult<Self> {
        trace!("🗃 opening node store {}", db_path);
        let conn = Connection::open(db_path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            key_template,
            metrics,
        })
    }

    /// Load a named keypair from `config`, generating and persisting a fresh
    /// one when the row is missing.
    fn ensure_key(&self, conn: &Connection, name: &str) -> DbResult<Box<dyn KeyPair>> {
        let stored: Option<String> = conn
            .query_row(
                "SELECT value FROM config WHERE name = ?1",
                params![name],
                |row| row.get(0),
            )
            .optional()?;
        let mut key = self.key_template.clone_box();
        match stored {
            Some(value) => key
                .from_b64(&value)
                .map_err(|e| DbError::Integrity(format!("invalid {name} in config: {e}")))?,
            None => {
                debug!("🗃 generating fresh {}", name);
                key.generate();
                fatal(
                    conn.execute(
                        "INSERT INTO config (name, value) VALUES (?1, ?2)",
                        params![name, key.to_b64()],
                    ),
                    "key bootstrap",
                );
            }
        }
        Ok(key)
    }

    /// Derive a public key from a stored private half via the key template.
    fn derive_pubkey(&self, privkey: &str) -> DbResult<String> {
        let mut key = self.key_template.clone_box();
        key.from_b64(privkey)
            .map_err(|e| DbError::General(e.to_string()))?;
        Ok(key.public_b64())
    }
}

#[async_trait]
impl StoreClient for SqliteClientImpl {
    async fn bootstrap(&self) -> DbResult<(Box<dyn KeyPair>, Box<dyn KeyPair>)> {
        let conn = self.conn.lock().await;
        fatal(conn.execute_batch(SCHEMA), "schema init");
        let content_key = self.ensure_key(&conn, "contentkey")?;
        let routing_key = self.ensure_key(&conn, "routingkey")?;
        Ok((content_key, routing_key))
    }

    async fn get_contact_pubkey(&self, name: &str) -> DbResult<Option<String>> {
        let conn = self.conn.lock().await;
        Ok(conn
            .query_row(
                "SELECT cpubkey FROM contacts WHERE name = ?1",
                params![name],
                |row| row.get(0),
            )
            .optional()?)
    }

    async fn get_contacts(&self) -> DbResult<Vec<Contact>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare("SELECT name, cpubkey FROM contacts")?;
        let contacts = stmt
            .query_map([], |row| {
                Ok(Contact {
                    name: row.get(0)?,
                    pubkey: row.get(1)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(contacts)
    }

    async fn add_contact(&self, name: &str, pubkey: &str) -> DbResult<()> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM contacts WHERE name = ?1", params![name])?;
        tx.execute(
            "INSERT INTO contacts (name, cpubkey) VALUES (?1, ?2)",
            params![name, pubkey],
        )?;
        tx.commit()?;
        Ok(())
    }

    async fn delete_contact(&self, name: &str) -> DbResult<()> {
        let conn = self.conn.lock().await;
        fatal(
            conn.execute("DELETE FROM contacts WHERE name = ?1", params![name]),
            "contact delete",
        );
        Ok(())
    }

    async fn get_channel_privkey(&self, name: &str) -> DbResult<Option<String>> {
        let conn = self.conn.lock().await;
        Ok(conn
            .query_row(
                "SELECT privkey FROM channels WHERE name = ?1",
                params![name],
                |row| row.get(0),
            )
            .optional()?)
    }

    async fn get_channels(&self) -> DbResult<Vec<Channel>> {
        let rows = {
            let conn = self.conn.lock().await;
            let mut stmt = conn.prepare("SELECT name, privkey FROM channels")?;
            let x = stmt
                .query_map([], |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            x
        };
        let mut channels = Vec::with_capacity(rows.len());
        for (name, privkey) in rows {
            channels.push(Channel {
                name,
                pubkey: self.derive_pubkey(&privkey)?,
            });
        }
        Ok(channels)
    }

    async fn get_channel_privs(&self) -> DbResult<Vec<ChannelPriv>> {
        let rows = {
            let conn = self.conn.lock().await;
            let mut stmt = conn.prepare("SELECT name, privkey FROM channels")?;
            let x = stmt
                .query_map([], |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            x
        };
        let mut channels = Vec::with_capacity(rows.len());
        for (name, privkey) in rows {
            let mut key = self.key_template.clone_box();
            key.from_b64(&privkey)
                .map_err(|e| DbError::General(e.to_string()))?;
            channels.push(ChannelPriv {
                name,
                pubkey: key.public_b64(),
                privkey: key,
            });
        }
        Ok(channels)
    }

    async fn add_channel(&self, name: &str, privkey: &str) -> DbResult<()> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM channels WHERE name = ?1", params![name])?;
        tx.execute(
            "INSERT INTO channels (name, privkey) VALUES (?1, ?2)",
            params![name, privkey],
        )?;
        tx.commit()?;
        Ok(())
    }

    async fn delete_channel(&self, name: &str) -> DbResult<()> {
        let conn = self.conn.lock().await;
        fatal(
            conn.execute("DELETE FROM channels WHERE name = ?1", params![name]),
            "channel delete",
        );
        Ok(())
    }

    async fn get_profile(&self, name: &str) -> DbResult<Option<Profile>> {
        let row = {
            let conn = self.conn.lock().await;
            conn.query_row(
                "SELECT enabled, privkey FROM profiles WHERE name = ?1",
                params![name],
                |row| Ok((row.get::<_, bool>(0)?, row.get::<_, String>(1)?)),
            )
            .optional()?
        };
        let Some((enabled, privkey)) = row else {
            return Ok(None);
        };
        Ok(Some(Profile {
            name: name.to_owned(),
            enabled,
            pubkey: self.derive_pubkey(&privkey)?,
        }))
    }

    async fn get_profiles(&self) -> DbResult<Vec<Profile>> {
        let rows = {
            let conn = self.conn.lock().await;
            let mut stmt = conn.prepare("SELECT name, enabled, privkey FROM profiles")?;
            let x = stmt
                .query_map([], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, bool>(1)?,
                        row.get::<_, String>(2)?,
                    ))
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            x
        };
        let mut profiles = Vec::with_capacity(rows.len());
        for (name, enabled, privkey) in rows {
            profiles.push(Profile {
                name,
                enabled,
                pubkey: self.derive_pubkey(&privkey)?,
            });
        }
        Ok(profiles)
    }

    async fn add_profile(&self, name: &str, enabled: bool) -> DbResult<()> {
        let conn = self.conn.lock().await;
        let existing: Option<String> = conn
            .query_row(
                "SELECT privkey FROM profiles WHERE name = ?1",
                params![name],
                |row| row.get(0),
            )
            .optional()?;
        match existing {
            None => {
                // generate a new profile keypair
                let mut profile_key = self.key_template.clone_box();
                profile_key.generate();
                fatal(
                    conn.execute(
                        "INSERT INTO profiles (name, privkey, enabled) VALUES (?1, ?2, ?3)",
                        params![name, profile_key.to_b64(), enabled],
                    ),
                    "profile insert",
                );
            }
            Some(_) => {
                fatal(
                    conn.execute(
                        "UPDATE profiles SET enabled = ?1 WHERE name = ?2",
                        params![enabled, name],
                    ),
                    "profile update",
                );
            }
        }
        Ok(())
    }

    async fn delete_profile(&self, name: &str) -> DbResult<()> {
        let conn = self.conn.lock().await;
        fatal(
            conn.execute("DELETE FROM profiles WHERE name = ?1", params![name]),
            "profile delete",
        );
        Ok(())
    }

    async fn get_profile_privkey(&self, name: &str) -> DbResult<String> {
        let conn = self.conn.lock().await;
        let privkey: Option<String> = conn
            .query_row(
                "SELECT privkey FROM profiles WHERE name = ?1",
                params![name],
                |row| row.get(0),
            )
            .optional()?;
        Ok(privkey.unwrap_or_default())
    }

    async fn get_peer(&self, name: &str) -> DbResult<Option<Peer>> {
        let conn = self.conn.lock().await;
        let row = conn
            .query_row(
                "SELECT uri, enabled FROM peers WHERE name = ?1",
                params![name],
                |row| Ok((row.get::<_, String>(0)?, row.get::<_, bool>(1)?)),
            )
            .optional()?;
        Ok(row.map(|(uri, enabled)| Peer {
            name: name.to_owned(),
            uri,
            enabled,
            ..Default::default()
        }))
    }

    async fn get_peers(&self, group: &str) -> DbResult<Vec<Peer>> {
        let conn = self.conn.lock().await;
        let mut stmt =
            conn.prepare("SELECT name, uri, enabled, peergroup FROM peers WHERE peergroup = ?1")?;
        let peers = stmt
            .query_map(params![group], |row| {
                Ok(Peer {
                    name: row.get(0)?,
                    uri: row.get(1)?,
                    enabled: row.get(2)?,
                    group: row.get(3)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(peers)
    }

    async fn add_peer(&self, name: &str, enabled: bool, uri: &str, group: &str) -> DbResult<()> {
        let conn = self.conn.lock().await;
        let existing: Option<String> = conn
            .query_row(
                "SELECT name FROM peers WHERE name = ?1 AND peergroup = ?2",
                params![name, group],
                |row| row.get(0),
            )
            .optional()?;
        match existing {
            None => {
                debug!("🗃 new peer {}", name);
                fatal(
                    conn.execute(
                        "INSERT INTO peers (name, uri, enabled, peergroup) VALUES (?1, ?2, ?3, ?4)",
                        params![name, uri, enabled, group],
                    ),
                    "peer insert",
                );
            }
            Some(_) => {
                debug!("🗃 update peer {}", name);
                fatal(
                    conn.execute(
                        "UPDATE peers SET enabled = ?1, uri = ?2, peergroup = ?3 WHERE name = ?4",
                        params![enabled, uri, group, name],
                    ),
                    "peer update",
                );
            }
        }
        Ok(())
    }

    async fn delete_peer(&self, name: &str) -> DbResult<()> {
        let conn = self.conn.lock().await;
        fatal(
            conn.execute("DELETE FROM peers WHERE name = ?1", params![name]),
            "peer delete",
        );
        Ok(())
    }

    async fn outbox_enqueue(
        &self,
        channel: &str,
        msg: Vec<u8>,
        ts: i64,
        check_exists: bool,
    ) -> DbResult<()> {
        let conn = self.conn.lock().await;
        if check_exists {
            // save the message in the outbox only if not already present
            let present: Option<String> = conn
                .query_row(
                    "SELECT channel FROM outbox WHERE channel = ?1 AND msg = ?2",
                    params![channel, msg],
                    |row| row.get(0),
                )
                .optional()?;
            if present.is_some() {
                return Ok(());
            }
        }
        fatal(
            conn.execute(
                "INSERT INTO outbox (channel, msg, timestamp) VALUES (?1, ?2, ?3)",
                params![channel, msg, ts],
            ),
            "outbox enqueue",
        );
        self.metrics.incr("storage.outbox.enqueue").ok();
        Ok(())
    }

    async fn outbox_bulk_insert(
        &self,
        channel: &str,
        base_ts: i64,
        msgs: Vec<Vec<u8>>,
    ) -> DbResult<()> {
        let count = msgs.len();
        let mut conn = self.conn.lock().await;
        let tx = fatal(conn.transaction(), "outbox bulk insert");
        {
            let mut stmt = fatal(
                tx.prepare("INSERT INTO outbox (channel, msg, timestamp) VALUES (?1, ?2, ?3)"),
                "outbox bulk insert",
            );
            // timestamp increments by one per message to keep queue order stable
            for (i, msg) in msgs.into_iter().enumerate() {
                fatal(
                    stmt.execute(params![channel, msg, base_ts + i as i64]),
                    "outbox bulk insert",
                );
            }
        }
        fatal(tx.commit(), "outbox bulk insert");
        self.metrics.count("storage.outbox.enqueue", count as i64).ok();
        Ok(())
    }

    async fn get_messages(
        &self,
        last_time: i64,
        max_bytes: i64,
        channels: Vec<String>,
    ) -> DbResult<FetchMessageResponse> {
        for name in &channels {
            if !CHANNEL_NAME.is_match(name) {
                return Err(DbError::InvalidChannelName);
            }
        }

        let mut sql = String::from("SELECT msg, timestamp FROM outbox WHERE timestamp > ?1");
        if !channels.is_empty() {
            let placeholders = (0..channels.len())
                .map(|i| format!("?{}", i + 2))
                .collect::<Vec<_>>()
                .join(",");
            sql.push_str(&format!(" AND channel IN ({placeholders})"));
        }
        sql.push_str(" ORDER BY timestamp ASC");

        let mut args: Vec<Value> = Vec::with_capacity(1 + channels.len());
        args.push(Value::Integer(last_time));
        args.extend(channels.into_iter().map(Value::Text));

        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(args), |row| {
            Ok((row.get::<_, Vec<u8>>(0)?, row.get::<_, i64>(1)?))
        })?;

        let mut messages: Vec<Vec<u8>> = Vec::new();
        let mut last_time_returned = last_time;
        let mut bytes_read: i64 = 0;
        let mut capped = false;
        let mut skipped = 0usize;
        for row in rows {
            let (msg, ts) = row?;
            if bytes_read + msg.len() as i64 >= max_bytes {
                if messages.is_empty() {
                    return Err(DbError::ResultTooBig);
                }
                capped = true;
                skipped += 1;
            }
            // capped rows still advance the cursor; the scan only reports them
            if ts > last_time_returned {
                last_time_returned = ts;
            }
            if !capped {
                bytes_read += msg.len() as i64;
                messages.push(msg);
            }
        }
        if skipped > 0 {
            debug!(
                "🗃 skipping {} outbox rows past the {} byte cap",
                skipped, max_bytes
            );
        }
        self.metrics
            .count("storage.outbox.fetch", messages.len() as i64)
            .ok();
        Ok(FetchMessageResponse {
            messages,
            last_time: last_time_returned,
        })
    }

    async fn add_stream(&self, stream_id: u32, total_chunks: u32, channel: &str) -> DbResult<()> {
        let conn = self.conn.lock().await;
        let existing: Option<i64> = conn
            .query_row(
                "SELECT streamid FROM streams WHERE streamid = ?1",
                params![stream_id],
                |row| row.get(0),
            )
            .optional()?;
        match existing {
            None => {
                debug!("🗃 new stream header {}", stream_id);
                fatal(
                    conn.execute(
                        "INSERT INTO streams (streamid, parts, channel) VALUES (?1, ?2, ?3)",
                        params![stream_id, total_chunks, channel],
                    ),
                    "stream insert",
                );
            }
            Some(_) => {
                debug!("🗃 update stream header {}", stream_id);
                fatal(
                    conn.execute(
                        "UPDATE streams SET parts = ?1, channel = ?2 WHERE streamid = ?3",
                        params![total_chunks, channel, stream_id],
                    ),
                    "stream update",
                );
            }
        }
        Ok(())
    }

    async fn add_chunk(&self, stream_id: u32, chunk_num: u32, data: Vec<u8>) -> DbResult<()> {
        let conn = self.conn.lock().await;
        let existing: Option<i64> = conn
            .query_row(
                "SELECT chunknum FROM chunks WHERE streamid = ?1 AND chunknum = ?2",
                params![stream_id, chunk_num],
                |row| row.get(0),
            )
            .optional()?;
        match existing {
            None => {
                fatal(
                    conn.execute(
                        "INSERT INTO chunks (streamid, chunknum, data) VALUES (?1, ?2, ?3)",
                        params![stream_id, chunk_num, data],
                    ),
                    "chunk insert",
                );
            }
            Some(_) => {
                fatal(
                    conn.execute(
                        "UPDATE chunks SET data = ?1 WHERE streamid = ?2 AND chunknum = ?3",
                        params![data, stream_id, chunk_num],
                    ),
                    "chunk update",
                );
            }
        }
        Ok(())
    }

    async fn clear_stream(&self, stream_id: u32) -> DbResult<()> {
        let conn = self.conn.lock().await;
        fatal(
            conn.execute("DELETE FROM chunks WHERE streamid = ?1", params![stream_id]),
            "stream clear",
        );
        fatal(
            conn.execute("DELETE FROM streams WHERE streamid = ?1", params![stream_id]),
            "stream clear",
        );
        Ok(())
    }

    async fn get_streams(&self) -> DbResult<Vec<StreamHeader>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare("SELECT streamid, parts, channel FROM streams")?;
        let streams = stmt
            .query_map([], |row| {
                Ok(StreamHeader {
                    stream_id: row.get(0)?,
                    num_chunks: row.get(1)?,
                    channel: row.get(2)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(streams)
    }

    async fn get_chunk_count(&self, stream_id: u32) -> DbResult<u64> {
        let conn = self.conn.lock().await;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM chunks WHERE streamid = ?1",
            params![stream_id],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    async fn get_chunks(&self, stream_id: u32) -> DbResult<Vec<Chunk>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT streamid, chunknum, data FROM chunks WHERE streamid = ?1 ORDER BY chunknum ASC",
        )?;
        let chunks = stmt
            .query_map(params![stream_id], |row| {
                Ok(Chunk {
                    stream_id: row.get(0)?,
                    chunk_num: row.get(1)?,
                    data: row.get(2)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(chunks)
    }

    async fn flush_outbox(&self, max_age_seconds: i64) -> DbResult<()> {
        let cutoff = ns_since_epoch() - max_age_seconds * 1_000_000_000;
        let conn = self.conn.lock().await;
        fatal(
            conn.execute("DELETE FROM outbox WHERE timestamp < ?1", params![cutoff]),
            "outbox flush",
        );
        Ok(())
    }

    fn box_clone(&self) -> Box<dyn StoreClient> {
        Box::new(self.clone())
    }
}

#[cfg(test)]
mod tests {
    use cadence::NopMetricSink;

    use super::*;
    use crate::crypto::EcdhKeyPair;
    use crate::logging::init_test_logging;

    fn new_client(db_path: &str) -> SqliteClientImpl {
        let metrics = Arc::new(StatsdClient::builder("", NopMetricSink).build());
        SqliteClientImpl::new(db_path, Box::new(EcdhKeyPair::new()), metrics).unwrap()
    }

    async fn new_bootstrapped_client() -> SqliteClientImpl {
        init_test_logging();
        let client = new_client(":memory:");
        client.bootstrap().await.unwrap();
        client
    }

    #[tokio::test]
    async fn contact_upsert() {
        let client = new_bootstrapped_client().await;

        assert_eq!(client.get_contact_pubkey("alice").await.unwrap(), None);
        client.add_contact("alice", "K1").await.unwrap();
        assert_eq!(
            client.get_contact_pubkey("alice").await.unwrap(),
            Some("K1".to_owned())
        );

        // re-adding replaces the prior row instead of accumulating
        client.add_contact("alice", "K2").await.unwrap();
        let contacts = client.get_contacts().await.unwrap();
        assert_eq!(contacts.len(), 1);
        assert_eq!(contacts[0].name, "alice");
        assert_eq!(contacts[0].pubkey, "K2");

        client.delete_contact("alice").await.unwrap();
        // idempotent
        client.delete_contact("alice").await.unwrap();
        assert!(client.get_contacts().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn channel_upsert_and_derivation() {
        let client = new_bootstrapped_client().await;

        let mut chan_key = EcdhKeyPair::new();
        client.add_channel("ops", &chan_key.to_b64()).await.unwrap();
        assert_eq!(
            client.get_channel_privkey("ops").await.unwrap(),
            Some(chan_key.to_b64())
        );

        let channels = client.get_channels().await.unwrap();
        assert_eq!(channels.len(), 1);
        assert_eq!(channels[0].name, "ops");
        assert_eq!(channels[0].pubkey, chan_key.public_b64());

        // upsert with a new key replaces the row
        chan_key.generate();
        client.add_channel("ops", &chan_key.to_b64()).await.unwrap();
        let channels = client.get_channels().await.unwrap();
        assert_eq!(channels.len(), 1);
        assert_eq!(channels[0].pubkey, chan_key.public_b64());

        let privs = client.get_channel_privs().await.unwrap();
        assert_eq!(privs.len(), 1);
        assert_eq!(privs[0].privkey.to_b64(), chan_key.to_b64());
        assert_eq!(privs[0].pubkey, chan_key.public_b64());

        client.delete_channel("ops").await.unwrap();
        client.delete_channel("ops").await.unwrap();
        assert!(client.get_channels().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn profile_generate_and_toggle() {
        let client = new_bootstrapped_client().await;

        assert_eq!(client.get_profile("work").await.unwrap(), None);
        assert_eq!(client.get_profile_privkey("work").await.unwrap(), "");

        client.add_profile("work", false).await.unwrap();
        let profile = client.get_profile("work").await.unwrap().unwrap();
        assert!(!profile.enabled);
        let privkey = client.get_profile_privkey("work").await.unwrap();
        assert!(!privkey.is_empty());

        // re-adding toggles `enabled` but keeps the generated key
        client.add_profile("work", true).await.unwrap();
        let profile = client.get_profile("work").await.unwrap().unwrap();
        assert!(profile.enabled);
        assert_eq!(client.get_profile_privkey("work").await.unwrap(), privkey);

        let profiles = client.get_profiles().await.unwrap();
        assert_eq!(profiles.len(), 1);
        assert_eq!(profiles[0].name, "work");

        client.delete_profile("work").await.unwrap();
        client.delete_profile("work").await.unwrap();
        assert!(client.get_profiles().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn peer_upsert_and_groups() {
        let client = new_bootstrapped_client().await;

        client
            .add_peer("relay1", true, "https://relay1:8443", "")
            .await
            .unwrap();
        client
            .add_peer("relay2", false, "https://relay2:8443", "eu")
            .await
            .unwrap();

        let peer = client.get_peer("relay1").await.unwrap().unwrap();
        assert!(peer.enabled);
        assert_eq!(peer.uri, "https://relay1:8443");

        let default_group = client.get_peers("").await.unwrap();
        assert_eq!(default_group.len(), 1);
        let eu = client.get_peers("eu").await.unwrap();
        assert_eq!(eu.len(), 1);
        assert_eq!(eu[0].name, "relay2");
        assert_eq!(eu[0].group, "eu");

        // same name and group updates in place
        client
            .add_peer("relay1", false, "https://relay1:9443", "")
            .await
            .unwrap();
        let peers = client.get_peers("").await.unwrap();
        assert_eq!(peers.len(), 1);
        assert!(!peers[0].enabled);
        assert_eq!(peers[0].uri, "https://relay1:9443");

        client.delete_peer("relay1").await.unwrap();
        client.delete_peer("relay1").await.unwrap();
        assert_eq!(client.get_peer("relay1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn outbox_drain_ordering() {
        let client = new_bootstrapped_client().await;

        client
            .outbox_enqueue("", b"m0".to_vec(), 100, false)
            .await
            .unwrap();
        client
            .outbox_enqueue("", b"m1".to_vec(), 200, false)
            .await
            .unwrap();
        client
            .outbox_enqueue("ch", b"m2".to_vec(), 150, false)
            .await
            .unwrap();

        let all = client.get_messages(0, 1_000_000, vec![]).await.unwrap();
        assert_eq!(all.messages, vec![b"m0".to_vec(), b"m2".to_vec(), b"m1".to_vec()]);
        assert_eq!(all.last_time, 200);

        let ch = client
            .get_messages(0, 1_000_000, vec!["ch".to_owned()])
            .await
            .unwrap();
        assert_eq!(ch.messages, vec![b"m2".to_vec()]);
        assert_eq!(ch.last_time, 150);
    }

    #[tokio::test]
    async fn outbox_enqueue_dedup() {
        let client = new_bootstrapped_client().await;

        client
            .outbox_enqueue("ch", b"dup".to_vec(), 1, true)
            .await
            .unwrap();
        client
            .outbox_enqueue("ch", b"dup".to_vec(), 2, true)
            .await
            .unwrap();
        client
            .outbox_enqueue("ch", b"dup".to_vec(), 3, false)
            .await
            .unwrap();

        let fetched = client
            .get_messages(0, 1_000_000, vec!["ch".to_owned()])
            .await
            .unwrap();
        assert_eq!(fetched.messages.len(), 2);
    }

    #[tokio::test]
    async fn bulk_insert_timestamps() {
        let client = new_bootstrapped_client().await;

        client
            .outbox_bulk_insert(
                "c",
                1000,
                vec![b"b0".to_vec(), b"b1".to_vec(), b"b2".to_vec()],
            )
            .await
            .unwrap();

        // each row gets base + i: paginating one step past the base skips
        // exactly the first message
        let fetched = client.get_messages(1000, 1_000_000, vec![]).await.unwrap();
        assert_eq!(fetched.messages, vec![b"b1".to_vec(), b"b2".to_vec()]);
        assert_eq!(fetched.last_time, 1002);
        let fetched = client.get_messages(1001, 1_000_000, vec![]).await.unwrap();
        assert_eq!(fetched.messages, vec![b"b2".to_vec()]);
        assert_eq!(fetched.last_time, 1002);
        let fetched = client.get_messages(1002, 1_000_000, vec![]).await.unwrap();
        assert!(fetched.messages.is_empty());
        assert_eq!(fetched.last_time, 1002);
    }

    #[tokio::test]
    async fn drain_pagination_converges() {
        let client = new_bootstrapped_client().await;
        for ts in 1..=5i64 {
            client
                .outbox_enqueue("", format!("m{ts}").into_bytes(), ts, false)
                .await
                .unwrap();
        }

        let mut seen: Vec<Vec<u8>> = Vec::new();
        let mut last_time = 0;
        loop {
            let resp = client.get_messages(last_time, 1_000_000, vec![]).await.unwrap();
            if resp.messages.is_empty() {
                break;
            }
            seen.extend(resp.messages);
            assert!(resp.last_time > last_time);
            last_time = resp.last_time;
        }
        let expected: Vec<Vec<u8>> = (1..=5).map(|i| format!("m{i}").into_bytes()).collect();
        assert_eq!(seen, expected);
    }

    #[tokio::test]
    async fn byte_cap_skips_but_advances_cursor() {
        let client = new_bootstrapped_client().await;
        client
            .outbox_enqueue("", vec![1u8; 100], 1, false)
            .await
            .unwrap();
        client
            .outbox_enqueue("", vec![2u8; 100], 2, false)
            .await
            .unwrap();

        let resp = client.get_messages(0, 150, vec![]).await.unwrap();
        assert_eq!(resp.messages, vec![vec![1u8; 100]]);
        // the skipped row still advanced the cursor
        assert_eq!(resp.last_time, 2);
    }

    #[tokio::test]
    async fn oversize_first_message_errors() {
        let client = new_bootstrapped_client().await;
        client
            .outbox_enqueue("", vec![0u8; 1000], 1, false)
            .await
            .unwrap();

        let err = client.get_messages(0, 500, vec![]).await.unwrap_err();
        assert!(matches!(err, DbError::ResultTooBig));
    }

    #[tokio::test]
    async fn invalid_channel_name_rejected() {
        let client = new_bootstrapped_client().await;
        for bad in ["no-dashes", "no spaces", "drop';--", "ünicode"] {
            let err = client
                .get_messages(0, 1000, vec![bad.to_owned()])
                .await
                .unwrap_err();
            assert!(matches!(err, DbError::InvalidChannelName), "{bad}");
        }
        // the empty name and alphanumerics are allowed
        assert!(client
            .get_messages(0, 1000, vec!["".to_owned(), "Chan01".to_owned()])
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn stream_upsert_both_paths() {
        let client = new_bootstrapped_client().await;

        client.add_stream(7, 3, "c").await.unwrap();
        client.add_stream(7, 5, "d").await.unwrap();
        let streams = client.get_streams().await.unwrap();
        assert_eq!(streams.len(), 1);
        assert_eq!(streams[0].stream_id, 7);
        assert_eq!(streams[0].num_chunks, 5);
        assert_eq!(streams[0].channel, "d");
    }

    #[tokio::test]
    async fn chunk_reassembly() {
        let client = new_bootstrapped_client().await;

        client.add_stream(9, 3, "").await.unwrap();
        client.add_chunk(9, 1, b"bbb".to_vec()).await.unwrap();
        client.add_chunk(9, 0, b"aaa".to_vec()).await.unwrap();
        client.add_chunk(9, 2, b"ccc".to_vec()).await.unwrap();
        // chunk upsert replaces data in place
        client.add_chunk(9, 1, b"BBB".to_vec()).await.unwrap();

        assert_eq!(client.get_chunk_count(9).await.unwrap(), 3);
        let chunks = client.get_chunks(9).await.unwrap();
        assert_eq!(
            chunks.iter().map(|c| c.data.clone()).collect::<Vec<_>>(),
            vec![b"aaa".to_vec(), b"BBB".to_vec(), b"ccc".to_vec()]
        );

        client.clear_stream(9).await.unwrap();
        assert_eq!(client.get_chunk_count(9).await.unwrap(), 0);
        assert!(client.get_streams().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn flush_outbox_drops_old_rows() {
        let client = new_bootstrapped_client().await;
        let now = ns_since_epoch();
        let old = now - 120 * 1_000_000_000;
        client
            .outbox_enqueue("", b"old".to_vec(), old, false)
            .await
            .unwrap();
        client
            .outbox_enqueue("", b"new".to_vec(), now, false)
            .await
            .unwrap();

        client.flush_outbox(60).await.unwrap();
        let resp = client.get_messages(0, 1_000_000, vec![]).await.unwrap();
        assert_eq!(resp.messages, vec![b"new".to_vec()]);
    }

    #[tokio::test]
    async fn bootstrap_persists_keys() {
        init_test_logging();
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("node.db");
        let db_path = db_path.to_str().unwrap();

        let (content1, routing1) = {
            let client = new_client(db_path);
            client.bootstrap().await.unwrap()
        };
        assert_ne!(content1.to_b64(), routing1.to_b64());

        // a second bootstrap on the same file loads the same keys
        let client = new_client(db_path);
        let (content2, routing2) = client.bootstrap().await.unwrap();
        assert_eq!(content1.to_b64(), content2.to_b64());
        assert_eq!(routing1.to_b64(), routing2.to_b64());
        // and it remains idempotent
        client.bootstrap().await.unwrap();
    }

    #[tokio::test]
    async fn read_your_writes_after_add() {
        let client = new_bootstrapped_client().await;
        client.add_contact("c", "PK").await.unwrap();
        assert_eq!(
            client.get_contact_pubkey("c").await.unwrap(),
            Some("PK".to_owned())
        );
        client.add_peer("p", true, "uri", "g").await.unwrap();
        assert!(client.get_peer("p").await.unwrap().is_some());
        client.add_profile("pr", true).await.unwrap();
        assert!(client.get_profile("pr").await.unwrap().is_some());
    }
}
