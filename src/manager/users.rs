use tracing::{info, warn};

use super::UploadManager;
use crate::access::{authorize, check_admin, check_list, check_user, Caller};
use crate::error::Error;
use crate::models::{Token, User};

impl UploadManager {
    /// The caller's own account, as stored.
    pub fn user_info(&self, caller: &Caller) -> Result<User, Error> {
        let user = check_user(caller)?;
        self.metadata
            .get_user(&user.id)?
            .ok_or_else(|| user_not_found(&user.id))
    }

    /// Mint a token for the caller's account.
    pub fn create_token(&self, caller: &Caller, comment: Option<String>) -> Result<Token, Error> {
        let user = check_user(caller)?;
        let mut created = None;
        self.metadata.update_user(&user.id, &mut |stored| {
            let stored = stored.ok_or_else(|| user_not_found(&user.id))?;
            created = Some(stored.new_token(comment.clone()));
            Ok(())
        })?;

        let token = created.ok_or_else(|| user_not_found(&user.id))?;
        info!(user_id = %user.id, "token created");
        Ok(token)
    }

    pub fn revoke_token(&self, caller: &Caller, token: &str) -> Result<Token, Error> {
        let user = check_user(caller)?;
        let mut revoked = None;
        self.metadata.update_user(&user.id, &mut |stored| {
            let stored = stored.ok_or_else(|| user_not_found(&user.id))?;
            revoked = stored.remove_token(token);
            if revoked.is_none() {
                return Err(Error::NotFound(format!(
                    "unable to get token {token} from user {}",
                    user.id
                )));
            }
            Ok(())
        })?;

        info!(user_id = %user.id, "token revoked");
        revoked.ok_or_else(|| user_not_found(&user.id))
    }

    /// Drop the caller's account and its tokens. Its uploads live on until
    /// they expire.
    pub fn delete_account(&self, caller: &Caller) -> Result<(), Error> {
        let user = check_user(caller)?;
        self.metadata.remove_user(&user.id)?;
        info!(user_id = %user.id, "user removed");
        Ok(())
    }

    /// Delete every upload the caller may list, returns how many went.
    ///
    /// An upload that fails to delete is logged and kept, the others still go.
    pub async fn remove_user_uploads(
        &self,
        caller: &Caller,
        token: Option<&str>,
    ) -> Result<usize, Error> {
        let (user_id, token) = check_list(caller, token)?;
        let ids = self.metadata.get_user_uploads(&user_id, token.as_deref())?;

        let mut removed = 0;
        for id in ids {
            let Some(upload) = self.metadata.get_upload(&id)? else {
                continue;
            };
            match self.delete_upload(&upload, authorize(&upload, caller)).await {
                Ok(()) => removed += 1,
                Err(e) => warn!(upload_id = %id, error = %e, "unable to remove user upload"),
            }
        }
        Ok(removed)
    }

    /// Every account, without tokens. Admins only.
    pub fn users(&self, caller: &Caller) -> Result<Vec<User>, Error> {
        check_admin(caller)?;

        let mut users = Vec::new();
        for id in self.metadata.get_users()? {
            if let Some(mut user) = self.metadata.get_user(&id)? {
                user.tokens.clear();
                users.push(user);
            }
        }
        Ok(users)
    }
}

fn user_not_found(id: &str) -> Error {
    Error::NotFound(format!("user {id} not found"))
}
