//! Storage client capability
//!
//! The upload orchestrator and object lister only ever talk to storage
//! through [`StorageClient`]. A put yields a [`TransferHandle`] whose event
//! stream carries progress, state changes and transport errors; a failed
//! transfer can be resumed under the same [`TransferId`].
//!
//! Two implementations ship with the crate:
//!
//! - [`S3StorageClient`] - AWS S3 via `aws-sdk-s3`
//! - [`mock::ScriptedStorage`] - in-memory, replays scripted events for tests

pub mod mock;
mod s3;

pub use s3::S3StorageClient;

use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use tokio::sync::mpsc::UnboundedReceiver;

/// Opaque identifier of a transfer, stable across resumes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TransferId(pub u64);

impl fmt::Display for TransferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle state reported by the storage client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransferState {
    /// Queued, waiting for a worker
    Waiting,
    /// Bytes are moving
    InProgress,
    /// Object stored
    Completed,
    /// Transfer canceled
    Canceled,
    /// Transfer failed; may be resumed
    Failed,
    /// Anything the client cannot classify
    Unknown,
}

impl TransferState {
    /// Caller-facing label
    pub fn label(&self) -> &'static str {
        match self {
            TransferState::Canceled => "CANCELED",
            TransferState::Completed => "COMPLETED",
            TransferState::Failed => "FAILED",
            _ => "UNKNOWN",
        }
    }
}

impl fmt::Display for TransferState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Event delivered to the listener attached to a transfer
#[derive(Debug, Clone, PartialEq)]
pub enum TransferEvent {
    /// Byte counts so far
    Progress { current: u64, total: u64 },
    /// Lifecycle transition
    StateChanged(TransferState),
    /// Transport-level exception
    Error(String),
}

/// Handle to an in-flight transfer.
///
/// Owns the receiving end of the transfer's event stream; taking a new
/// handle from [`StorageClient::resume`] re-attaches the listener.
#[derive(Debug)]
pub struct TransferHandle {
    /// Transfer identity
    pub id: TransferId,
    /// State at the moment the handle was issued
    pub state: TransferState,
    /// Event stream
    pub events: UnboundedReceiver<TransferEvent>,
}

/// One object as returned by a listing call
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawObject {
    pub key: String,
    pub e_tag: Option<String>,
    pub last_modified: Option<DateTime<Utc>>,
    pub storage_class: Option<String>,
    pub owner_display_name: Option<String>,
    pub owner_id: Option<String>,
    pub size: u64,
}

/// One page of a listing
#[derive(Debug, Clone, Default)]
pub struct ListPage {
    /// Objects in listing order
    pub objects: Vec<RawObject>,
    /// Continuation token; `None` once the listing is exhausted
    pub next_token: Option<String>,
}

/// Object-storage capability used by the core
#[async_trait]
pub trait StorageClient: Send + Sync {
    /// Start uploading `file` to `bucket/key`
    async fn put(
        &self,
        bucket: &str,
        key: &str,
        file: &Path,
        content_type: Option<&str>,
    ) -> Result<TransferHandle>;

    /// Resume a previously submitted transfer under the same identity
    async fn resume(&self, id: TransferId) -> Result<TransferHandle>;

    /// Forget a transfer that will not be resumed again
    fn release(&self, _id: TransferId) {}

    /// List one page of objects under `prefix`
    async fn list_objects(
        &self,
        bucket: &str,
        prefix: &str,
        continuation_token: Option<String>,
    ) -> Result<ListPage>;
}
