//! Scripted storage client for testing
//!
//! [`ScriptedStorage`] replays a queue of transfer attempts: the first
//! scripted attempt answers `put`, every following one answers a `resume`.
//! Listings are served from a fixed set of pages chained with
//! `page-N` continuation tokens.

use super::{ListPage, RawObject, StorageClient, TransferEvent, TransferHandle, TransferId, TransferState};
use crate::error::{Result, UplinkError};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc::unbounded_channel;

/// Outcome of one scripted put or resume call
#[derive(Debug, Clone)]
enum Attempt {
    /// Hand out a handle that replays these events
    Events(Vec<TransferEvent>),
    /// Fail the call itself
    Reject(String),
}

/// A recorded `put` call
#[derive(Debug, Clone, PartialEq)]
pub struct PutRecord {
    pub bucket: String,
    pub key: String,
    pub file: PathBuf,
    pub content_type: Option<String>,
}

#[derive(Debug, Default)]
struct ScriptState {
    attempts: VecDeque<Attempt>,
    pages: Vec<Vec<RawObject>>,
    fail_listing_at: Option<usize>,
    puts: Vec<PutRecord>,
    resumes: Vec<TransferId>,
    released: Vec<TransferId>,
    list_calls: Vec<Option<String>>,
    next_id: u64,
}

/// In-memory storage client that replays scripted events
///
/// # Example
///
/// ```
/// use photo_uplink::storage::mock::ScriptedStorage;
///
/// let storage = ScriptedStorage::new()
///     .then_events(ScriptedStorage::failed_events(10, 100))
///     .then_events(ScriptedStorage::completed_events(100));
/// assert_eq!(storage.remaining_attempts(), 2);
/// ```
#[derive(Debug, Clone, Default)]
pub struct ScriptedStorage {
    state: Arc<Mutex<ScriptState>>,
}

impl ScriptedStorage {
    /// Create an empty script; puts without a scripted attempt complete
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue an attempt that replays `events`
    pub fn then_events(self, events: Vec<TransferEvent>) -> Self {
        self.lock().attempts.push_back(Attempt::Events(events));
        self
    }

    /// Queue an attempt whose put/resume call itself fails
    pub fn then_reject(self, message: impl Into<String>) -> Self {
        self.lock().attempts.push_back(Attempt::Reject(message.into()));
        self
    }

    /// Serve these listing pages in order
    pub fn with_pages(self, pages: Vec<Vec<RawObject>>) -> Self {
        self.lock().pages = pages;
        self
    }

    /// Fail the listing call that would return page `index`
    pub fn fail_listing_on_page(self, index: usize) -> Self {
        self.lock().fail_listing_at = Some(index);
        self
    }

    /// Events of an attempt that uploads `total` bytes and completes
    pub fn completed_events(total: u64) -> Vec<TransferEvent> {
        vec![
            TransferEvent::StateChanged(TransferState::InProgress),
            TransferEvent::Progress { current: 0, total },
            TransferEvent::Progress {
                current: total / 2,
                total,
            },
            TransferEvent::Progress {
                current: total,
                total,
            },
            TransferEvent::StateChanged(TransferState::Completed),
        ]
    }

    /// Events of an attempt that moves `sent` bytes and then fails
    pub fn failed_events(sent: u64, total: u64) -> Vec<TransferEvent> {
        vec![
            TransferEvent::StateChanged(TransferState::InProgress),
            TransferEvent::Progress { current: 0, total },
            TransferEvent::Progress {
                current: sent,
                total,
            },
            TransferEvent::StateChanged(TransferState::Failed),
        ]
    }

    /// Recorded put calls
    pub fn puts(&self) -> Vec<PutRecord> {
        self.lock().puts.clone()
    }

    /// Number of resume calls made
    pub fn resume_count(&self) -> usize {
        self.lock().resumes.len()
    }

    /// Transfer ids passed to resume, in call order
    pub fn resumed_ids(&self) -> Vec<TransferId> {
        self.lock().resumes.clone()
    }

    /// Transfer ids passed to release, in call order
    pub fn released_ids(&self) -> Vec<TransferId> {
        self.lock().released.clone()
    }

    /// Continuation tokens passed to each listing call
    pub fn list_calls(&self) -> Vec<Option<String>> {
        self.lock().list_calls.clone()
    }

    /// Scripted attempts not consumed yet
    pub fn remaining_attempts(&self) -> usize {
        self.lock().attempts.len()
    }

    fn lock(&self) -> MutexGuard<'_, ScriptState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn replay(id: TransferId, attempt: Attempt) -> Result<TransferHandle> {
        match attempt {
            Attempt::Reject(message) => Err(UplinkError::Transport(message)),
            Attempt::Events(events) => {
                let (tx, rx) = unbounded_channel();
                for event in events {
                    let _ = tx.send(event);
                }
                Ok(TransferHandle {
                    id,
                    state: TransferState::Waiting,
                    events: rx,
                })
            }
        }
    }
}

fn page_token(index: usize) -> String {
    format!("page-{}", index)
}

fn page_index(token: Option<&str>) -> Result<usize> {
    match token {
        None => Ok(0),
        Some(token) => token
            .strip_prefix("page-")
            .and_then(|n| n.parse().ok())
            .ok_or_else(|| UplinkError::Listing(format!("Bad continuation token: {}", token))),
    }
}

#[async_trait]
impl StorageClient for ScriptedStorage {
    async fn put(
        &self,
        bucket: &str,
        key: &str,
        file: &Path,
        content_type: Option<&str>,
    ) -> Result<TransferHandle> {
        let (id, attempt) = {
            let mut state = self.lock();
            state.next_id += 1;
            state.puts.push(PutRecord {
                bucket: bucket.to_string(),
                key: key.to_string(),
                file: file.to_path_buf(),
                content_type: content_type.map(str::to_string),
            });
            let attempt = match state.attempts.pop_front() {
                Some(attempt) => attempt,
                None => {
                    let total = std::fs::metadata(file).map(|m| m.len()).unwrap_or(0);
                    Attempt::Events(Self::completed_events(total))
                }
            };
            (TransferId(state.next_id), attempt)
        };
        Self::replay(id, attempt)
    }

    async fn resume(&self, id: TransferId) -> Result<TransferHandle> {
        let attempt = {
            let mut state = self.lock();
            state.resumes.push(id);
            state.attempts.pop_front()
        };
        match attempt {
            Some(attempt) => Self::replay(id, attempt),
            None => Err(UplinkError::Transport(format!(
                "No scripted attempt left for transfer {}",
                id
            ))),
        }
    }

    fn release(&self, id: TransferId) {
        self.lock().released.push(id);
    }

    async fn list_objects(
        &self,
        _bucket: &str,
        _prefix: &str,
        continuation_token: Option<String>,
    ) -> Result<ListPage> {
        let mut state = self.lock();
        let index = page_index(continuation_token.as_deref())?;
        state.list_calls.push(continuation_token);

        if state.fail_listing_at == Some(index) {
            return Err(UplinkError::Listing(format!("Scripted failure on page {}", index)));
        }

        let objects = state.pages.get(index).cloned().unwrap_or_default();
        let next_token = (index + 1 < state.pages.len()).then(|| page_token(index + 1));
        Ok(ListPage {
            objects,
            next_token,
        })
    }
}
