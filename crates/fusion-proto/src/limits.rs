//! Size bounds shared by the codec and the server.
//!
//! Wire bounds ([`MAX_STRING_BYTES`], [`MAX_BLOCK_BYTES`], [`MAX_LIST_LEN`])
//! are enforced by the decoder. Semantic bounds (usernames, server names,
//! messages) are checked by whoever accepts the value, using the `is_valid_*`
//! helpers: a value is valid when it is non-empty and strictly shorter than
//! its bound, in bytes.

/// Largest string the decoder accepts, in bytes.
pub const MAX_STRING_BYTES: usize = 1_024;

/// Largest file block payload, in bytes.
pub const MAX_BLOCK_BYTES: usize = 3_000;

/// Largest member list carried by fusion frames.
pub const MAX_LIST_LEN: usize = 1_024;

/// Exclusive bound on username length, in bytes.
pub const MAX_USERNAME_BYTES: usize = 30;

/// Exclusive bound on server name length, in bytes.
pub const MAX_SERVER_NAME_BYTES: usize = 100;

/// Exclusive bound on chat message length, in bytes.
pub const MAX_MESSAGE_BYTES: usize = 1_024;

fn within(value: &str, max: usize) -> bool {
    !value.is_empty() && value.len() < max
}

/// Returns true if `name` is acceptable as a username.
#[must_use]
pub fn is_valid_username(name: &str) -> bool {
    within(name, MAX_USERNAME_BYTES)
}

/// Returns true if `name` is acceptable as a server name.
#[must_use]
pub fn is_valid_server_name(name: &str) -> bool {
    within(name, MAX_SERVER_NAME_BYTES)
}

/// Returns true if `text` is acceptable as a chat message body.
#[must_use]
pub fn is_valid_message(text: &str) -> bool {
    within(text, MAX_MESSAGE_BYTES)
}
