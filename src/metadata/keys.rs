//! Binary-sortable index keys.
//!
//! Expiry index: `BE64(expire_at) | upload_id`. Lexicographic key order is
//! expiration order, so "everything expired at `now`" is the key range
//! `..BE64(now + 1)`.
//!
//! User index: `BE16(len(user_id)) | user_id | BE64(u64::MAX - created_micros) | upload_id`.
//! The length prefix keeps one user's range from swallowing another user
//! whose id shares a prefix. The inverted timestamp sorts newest first.

const TIMESTAMP_LEN: usize = 8;

pub fn expiry_key(expire_at: i64, upload_id: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(TIMESTAMP_LEN + upload_id.len());
    key.extend_from_slice(&clamp(expire_at).to_be_bytes());
    key.extend_from_slice(upload_id.as_bytes());
    key
}

/// Exclusive upper bound of the expiry keys that are due at `now`.
pub fn expiry_upper_bound(now: i64) -> Vec<u8> {
    clamp(now).saturating_add(1).to_be_bytes().to_vec()
}

pub fn upload_id_from_expiry_key(key: &[u8]) -> Option<&str> {
    key.get(TIMESTAMP_LEN..)
        .and_then(|id| std::str::from_utf8(id).ok())
}

pub fn user_prefix(user_id: &str) -> Vec<u8> {
    let len = u16::try_from(user_id.len()).unwrap_or(u16::MAX);
    let mut prefix = Vec::with_capacity(2 + user_id.len());
    prefix.extend_from_slice(&len.to_be_bytes());
    prefix.extend_from_slice(user_id.as_bytes());
    prefix
}

pub fn user_upload_key(user_id: &str, created_micros: i64, upload_id: &str) -> Vec<u8> {
    let mut key = user_prefix(user_id);
    key.extend_from_slice(&(u64::MAX - clamp(created_micros)).to_be_bytes());
    key.extend_from_slice(upload_id.as_bytes());
    key
}

pub fn upload_id_from_user_key(key: &[u8], prefix_len: usize) -> Option<&str> {
    key.get(prefix_len + TIMESTAMP_LEN..)
        .and_then(|id| std::str::from_utf8(id).ok())
}

/// Smallest key greater than every key starting with `prefix`.
pub fn prefix_successor(prefix: &[u8]) -> Option<Vec<u8>> {
    let mut end = prefix.to_vec();
    while let Some(last) = end.pop() {
        if last < u8::MAX {
            end.push(last + 1);
            return Some(end);
        }
    }
    None
}

fn clamp(value: i64) -> u64 {
    u64::try_from(value).unwrap_or(0)
}
