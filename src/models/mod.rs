//! Records shared by the metadata backends, the data backends and the API.

mod compat;
mod file;
mod stats;
mod upload;
mod user;

pub use compat::{decode_upload, FileV1, UploadV1};
pub use file::{BackendDetails, File, FileStatus};
pub use stats::{ServerStats, TypeAggregator, TypeStats, UserStats, TOP_FILE_TYPES};
pub use upload::{FileParams, Upload, UploadParams};
pub use user::{Token, User};

use rand::distributions::Alphanumeric;
use rand::Rng;

pub const UPLOAD_ID_LENGTH: usize = 16;
pub const FILE_ID_LENGTH: usize = 16;
pub const UPLOAD_TOKEN_LENGTH: usize = 32;

/// Generate a random identifier of `len` characters from `[a-zA-Z0-9]`.
pub fn random_id(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn random_id_has_requested_length_and_alphabet() {
        let id = random_id(UPLOAD_TOKEN_LENGTH);
        assert_eq!(id.len(), UPLOAD_TOKEN_LENGTH);
        assert!(id.chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn random_ids_do_not_repeat() {
        let a = random_id(UPLOAD_ID_LENGTH);
        let b = random_id(UPLOAD_ID_LENGTH);
        assert_ne!(a, b);
    }
}
