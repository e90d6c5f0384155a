use std::collections::HashSet;

use redb::{ReadableTable, WriteTransaction};

use super::db::{Database, DatabaseError};
use super::tables::*;
use super::{UserTx, MISSING_USER_TX};
use crate::error::Error;
use crate::models::User;

impl Database {
    // ========================================================================
    // User operations
    // ========================================================================

    /// Store a new user and register its tokens
    pub fn put_user(&self, user: &User) -> Result<(), DatabaseError> {
        let write_txn = self.begin_write()?;
        {
            let mut table = write_txn.open_table(USERS)?;
            if table.get(user.id.as_str())?.is_some() {
                return Err(Error::AlreadyExists(format!("user {} already exists", user.id)).into());
            }
            let data = rmp_serde::to_vec_named(user)?;
            table.insert(user.id.as_str(), data.as_slice())?;
        }
        let tokens: Vec<&str> = user.tokens.iter().map(|t| t.token.as_str()).collect();
        register_tokens(&write_txn, &user.id, &tokens)?;
        write_txn.commit()?;
        Ok(())
    }

    pub fn read_user(&self, id: &str) -> Result<Option<User>, DatabaseError> {
        let read_txn = self.begin_read()?;
        let table = read_txn.open_table(USERS)?;

        match table.get(id)? {
            Some(data) => {
                let user: User = rmp_serde::from_slice(data.value())?;
                Ok(Some(user))
            }
            None => Ok(None),
        }
    }

    /// Resolve a token to its owner (token -> user id -> user)
    pub fn user_by_token(&self, token: &str) -> Result<Option<User>, DatabaseError> {
        let read_txn = self.begin_read()?;
        let token_table = read_txn.open_table(USER_TOKENS)?;

        let id = match token_table.get(token)? {
            Some(data) => data.value().to_string(),
            None => return Ok(None),
        };

        let users_table = read_txn.open_table(USERS)?;
        match users_table.get(id.as_str())? {
            Some(data) => {
                let user: User = rmp_serde::from_slice(data.value())?;
                Ok(Some(user))
            }
            None => Ok(None),
        }
    }

    /// Read-modify-write a user, keeping the token index in sync
    pub fn modify_user(&self, id: &str, tx: &mut UserTx<'_>) -> Result<User, DatabaseError> {
        let write_txn = self.begin_write()?;

        let existing = {
            let table = write_txn.open_table(USERS)?;
            let result = match table.get(id)? {
                Some(data) => {
                    let user: User = rmp_serde::from_slice(data.value())?;
                    Some(user)
                }
                None => None,
            };
            result
        };

        let Some(before) = existing else {
            tx(None)?;
            return Err(Error::Backend(MISSING_USER_TX.to_string()).into());
        };

        let mut after = before.clone();
        tx(Some(&mut after))?;
        if after.id != before.id {
            return Err(Error::Conflict(format!("user {} id is immutable", before.id)).into());
        }

        let old: HashSet<&str> = before.tokens.iter().map(|t| t.token.as_str()).collect();
        let new: HashSet<&str> = after.tokens.iter().map(|t| t.token.as_str()).collect();
        {
            let mut token_table = write_txn.open_table(USER_TOKENS)?;
            for token in old.difference(&new) {
                token_table.remove(*token)?;
            }
        }
        let added: Vec<&str> = new.difference(&old).copied().collect();
        register_tokens(&write_txn, id, &added)?;

        {
            let mut table = write_txn.open_table(USERS)?;
            let data = rmp_serde::to_vec_named(&after)?;
            table.insert(id, data.as_slice())?;
        }

        write_txn.commit()?;
        Ok(after)
    }

    /// Delete a user and its tokens
    pub fn delete_user(&self, id: &str) -> Result<(), DatabaseError> {
        let write_txn = self.begin_write()?;

        let existing = {
            let table = write_txn.open_table(USERS)?;
            let result = match table.get(id)? {
                Some(data) => {
                    let user: User = rmp_serde::from_slice(data.value())?;
                    Some(user)
                }
                None => None,
            };
            result
        };

        if let Some(user) = existing {
            {
                let mut token_table = write_txn.open_table(USER_TOKENS)?;
                for token in &user.tokens {
                    token_table.remove(token.token.as_str())?;
                }
            }
            let mut table = write_txn.open_table(USERS)?;
            table.remove(id)?;
        }

        write_txn.commit()?;
        Ok(())
    }

    pub fn user_ids(&self) -> Result<Vec<String>, DatabaseError> {
        let read_txn = self.begin_read()?;
        let table = read_txn.open_table(USERS)?;

        let mut ids = Vec::new();
        for entry in table.iter()? {
            let (key, _) = entry?;
            ids.push(key.value().to_string());
        }
        Ok(ids)
    }
}

/// Point `tokens` at `user_id`, refusing tokens that belong to someone else.
fn register_tokens(
    write_txn: &WriteTransaction,
    user_id: &str,
    tokens: &[&str],
) -> Result<(), DatabaseError> {
    let mut token_table = write_txn.open_table(USER_TOKENS)?;
    for token in tokens {
        let owner = token_table.get(*token)?.map(|v| v.value().to_string());
        if owner.as_deref().is_some_and(|owner| owner != user_id) {
            return Err(Error::Conflict(format!("token {token} is already in use")).into());
        }
        token_table.insert(*token, user_id)?;
    }
    Ok(())
}
