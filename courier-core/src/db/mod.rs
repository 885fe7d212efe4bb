//! Durable store for the node's identities and outbound messages.
//!
//! Access is abstracted behind the [`client::StoreClient`] trait; the node
//! only holds a `Box<dyn StoreClient>`. The SQLite implementation in
//! [`sqlite`] is the primary backend. All backends must honor the same
//! transactional contracts: read-your-writes after any add, delete-then-insert
//! upserts, strictly ascending timestamp order out of the outbox, and
//! `base + i` timestamps from bulk inserts.

pub mod client;
pub mod error;
pub mod mock;
pub mod models;
pub mod sqlite;
