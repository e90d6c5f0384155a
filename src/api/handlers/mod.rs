mod admin;
mod files;
mod uploads;
mod users;

use crate::access::{authorize, check_credentials, Caller, UploadAccess};
use crate::api::response::ApiError;
use crate::models::Upload;
use crate::AppState;

pub use admin::{health, list_users, server_config, server_stats, version};
pub use files::{add_file, get_file, remove_file, upload_file};
pub use uploads::{create_upload, delete_upload, get_upload};
pub use users::{
    create_token, delete_account, remove_user_uploads, revoke_token, user_info, user_stats,
    user_uploads,
};

/// Load a live upload and check the caller may touch it at all.
fn open_upload(
    state: &AppState,
    caller: &Caller,
    upload_id: &str,
) -> Result<(Upload, UploadAccess), ApiError> {
    let upload = state.manager.get_upload(upload_id)?;
    let access = authorize(&upload, caller);
    check_credentials(&upload, access)?;
    Ok((upload, access))
}
