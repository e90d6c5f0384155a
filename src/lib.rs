//! file-drop - A transient file-sharing service
//!
//! This crate provides uploads that expire, one-shot downloads and streaming
//! hand-offs with:
//! - A per-file state machine applied through atomic metadata updates
//! - Swappable metadata engines (redb, in-memory) and data backends (local files, stream relay)
//! - A background sweeper purging expired uploads
//! - A REST API and a client library speaking to it over HTTP or in-process

pub mod access;
pub mod api;
pub mod cli;
pub mod client;
pub mod config;
pub mod data;
pub mod error;
pub mod manager;
pub mod metadata;
pub mod models;
pub mod state_machine;
pub mod sweeper;
#[cfg(test)]
pub mod testutil;

use std::sync::Arc;

use config::Config;
use manager::UploadManager;
use metadata::MetadataBackend;

/// Shared application state
pub struct AppState {
    pub config: Config,
    pub metadata: Arc<dyn MetadataBackend>,
    pub manager: Arc<UploadManager>,
}
