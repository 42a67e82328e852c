//! Database module: backlog, session and config storage.
//!
//! - `model`: well-known keys for the session and config tables.
//! - `repo`: SQL-only functions; each acquires a scoped pool connection.
//!
//! Nothing outside this module issues SQL against the repost tables.

pub mod model;
pub mod repo;

pub use repo::*;

pub use model::{INITIALIZED_AT_KEY, PENDING_CODE_HASH_KEY, SESSION_KEY};
