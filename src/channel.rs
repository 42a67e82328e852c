//! Channel id conversion between MTProto (bare ids) and the Bot API
//! (`-100`-prefixed dialog ids).

const CHANNEL_PREFIX: &str = "-100";

/// Rewrite a bare channel id into the Bot API form.
///
/// Ids that already carry the prefix, zero, and other negative ids pass
/// through untouched, so the function is idempotent.
pub fn normalize_channel_id(raw: i64) -> i64 {
    if raw.to_string().starts_with(CHANNEL_PREFIX) {
        return raw;
    }
    if raw > 0 {
        // Only overflows for ids far beyond anything Telegram issues.
        return format!("{CHANNEL_PREFIX}{raw}").parse().unwrap_or(raw);
    }
    raw
}
