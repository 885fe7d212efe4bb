#![recursion_limit = "1024"]

#[macro_use]
extern crate slog;
#[macro_use]
extern crate slog_scope;

pub mod crypto;
pub mod db;
pub mod errors;
pub mod filter;
pub mod logging;
pub mod message;
pub mod metrics;
pub mod node;
pub mod router;
pub mod settings;

pub mod util;

const ONE_DAY_IN_SECONDS: i64 = 24 * 60 * 60;

/// Default age after which undelivered outbox rows are flushed, 7 days.
///
/// Outbox entries are ciphertext pending pull by peers. A peer that has not
/// synced within a week has either been retired or will re-request the
/// stream anyway, so holding the rows longer only grows the store.
pub const MAX_OUTBOX_AGE_SECS: i64 = 7 * ONE_DAY_IN_SECONDS;
