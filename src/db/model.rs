//! Keys for the two key/value tables.

/// Slot in `repost_session` holding the serialized MTProto session.
pub const SESSION_KEY: &str = "user_session";

/// `repost_config` entry holding the hash of an outstanding login code
/// request. An empty value means "invalidated, request a new code".
pub const PENDING_CODE_HASH_KEY: &str = "telegram_phone_code_hash";

/// `repost_config` entry written once startup ingestion has run.
pub const INITIALIZED_AT_KEY: &str = "initialized_at";
