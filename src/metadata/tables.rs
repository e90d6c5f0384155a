use redb::TableDefinition;

/// Upload records: upload id -> Upload (JSON, legacy v1 readable)
pub const UPLOADS: TableDefinition<&str, &[u8]> = TableDefinition::new("uploads");

/// Expiry index: BE64(expire_at) | upload id -> ()
pub const UPLOAD_EXPIRY: TableDefinition<&[u8], ()> = TableDefinition::new("upload_expiry");

/// User index: BE16(len) | user id | BE64(!created) | upload id -> token ("" when none)
pub const USER_UPLOADS: TableDefinition<&[u8], &str> = TableDefinition::new("user_uploads");

/// User records: user id -> User (msgpack)
pub const USERS: TableDefinition<&str, &[u8]> = TableDefinition::new("users");

/// Token index: token -> user id
pub const USER_TOKENS: TableDefinition<&str, &str> = TableDefinition::new("user_tokens");
