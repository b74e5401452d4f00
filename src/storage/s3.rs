//! S3 storage client implementation

use super::{
    ListPage, RawObject, StorageClient, TransferEvent, TransferHandle, TransferId, TransferState,
};
use crate::config::{
    ServiceConfig, MAX_CONNECTIONS, MAX_LOW_LEVEL_RETRIES, REQUEST_TIMEOUT,
    TRANSFER_WORKER_POOL_SIZE,
};
use crate::error::{Result, UplinkError};
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::retry::RetryConfig;
use aws_sdk_s3::config::timeout::TimeoutConfig;
use aws_sdk_s3::config::Region;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client as AwsS3Client;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc::{unbounded_channel, UnboundedSender};
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

/// What a transfer needs to be driven again after a failure
#[derive(Debug, Clone)]
struct TransferRecord {
    bucket: String,
    key: String,
    file: PathBuf,
    content_type: Option<String>,
    state: TransferState,
}

type TransferTable = Arc<Mutex<HashMap<TransferId, TransferRecord>>>;

/// S3-backed storage client.
///
/// Puts run as tokio tasks, at most [`TRANSFER_WORKER_POOL_SIZE`] at a time.
/// Every request (puts and listings) additionally holds one of
/// [`MAX_CONNECTIONS`] permits while it is on the wire.
pub struct S3StorageClient {
    client: AwsS3Client,
    workers: Arc<Semaphore>,
    connections: Arc<Semaphore>,
    transfers: TransferTable,
    next_id: AtomicU64,
}

impl S3StorageClient {
    /// Build a client for the given service configuration
    ///
    /// Credentials come from the default provider chain. The region is
    /// validated before anything else so an unknown region never reaches
    /// the SDK.
    pub async fn connect(config: &ServiceConfig) -> Result<Self> {
        let region = config.region()?;

        let aws_config = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(region.code()))
            .load()
            .await;

        let timeout_config = TimeoutConfig::builder()
            .connect_timeout(REQUEST_TIMEOUT)
            .read_timeout(REQUEST_TIMEOUT)
            .operation_attempt_timeout(REQUEST_TIMEOUT)
            .build();

        // SDK attempts include the first one
        let retry_config = RetryConfig::standard().with_max_attempts(MAX_LOW_LEVEL_RETRIES + 1);

        let s3_config = aws_sdk_s3::config::Builder::from(&aws_config)
            .timeout_config(timeout_config)
            .retry_config(retry_config)
            .build();

        info!(
            bucket = %config.bucket,
            region = %region,
            identity_pool = %config.identity_pool_id,
            "Storage client ready"
        );

        Ok(Self::from_client(AwsS3Client::from_conf(s3_config)))
    }

    /// Wrap an already configured SDK client
    pub fn from_client(client: AwsS3Client) -> Self {
        Self {
            client,
            workers: Arc::new(Semaphore::new(TRANSFER_WORKER_POOL_SIZE)),
            connections: Arc::new(Semaphore::new(MAX_CONNECTIONS)),
            transfers: Arc::new(Mutex::new(HashMap::new())),
            next_id: AtomicU64::new(1),
        }
    }

    /// Number of transfers still held for a possible resume
    pub fn pending_transfers(&self) -> usize {
        lock(&self.transfers).len()
    }

    fn spawn_transfer(&self, id: TransferId, record: TransferRecord) -> TransferHandle {
        let (tx, rx) = unbounded_channel();
        let task = TransferTask {
            client: self.client.clone(),
            workers: Arc::clone(&self.workers),
            connections: Arc::clone(&self.connections),
            transfers: Arc::clone(&self.transfers),
        };
        tokio::spawn(task.run(id, record, tx));

        TransferHandle {
            id,
            state: TransferState::Waiting,
            events: rx,
        }
    }
}

fn lock(transfers: &TransferTable) -> MutexGuard<'_, HashMap<TransferId, TransferRecord>> {
    transfers.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Shared pieces a spawned transfer needs
struct TransferTask {
    client: AwsS3Client,
    workers: Arc<Semaphore>,
    connections: Arc<Semaphore>,
    transfers: TransferTable,
}

impl TransferTask {
    async fn run(self, id: TransferId, record: TransferRecord, tx: UnboundedSender<TransferEvent>) {
        let _worker = match self.workers.acquire().await {
            Ok(permit) => permit,
            Err(e) => {
                lock(&self.transfers).remove(&id);
                let _ = tx.send(TransferEvent::Error(format!("Transfer pool closed: {}", e)));
                return;
            }
        };

        self.set_state(id, TransferState::InProgress);
        let _ = tx.send(TransferEvent::StateChanged(TransferState::InProgress));

        match self.upload(&record, &tx).await {
            Ok(()) => {
                lock(&self.transfers).remove(&id);
                debug!(transfer_id = %id, key = %record.key, "Transfer completed");
                let _ = tx.send(TransferEvent::StateChanged(TransferState::Completed));
            }
            Err(e) if e.is_retryable() => {
                self.set_state(id, TransferState::Failed);
                warn!(transfer_id = %id, key = %record.key, "Transfer failed: {}", e);
                let _ = tx.send(TransferEvent::StateChanged(TransferState::Failed));
            }
            Err(e) => {
                lock(&self.transfers).remove(&id);
                warn!(transfer_id = %id, key = %record.key, "Transfer error: {}", e);
                let _ = tx.send(TransferEvent::Error(e.to_string()));
            }
        }
    }

    async fn upload(
        &self,
        record: &TransferRecord,
        tx: &UnboundedSender<TransferEvent>,
    ) -> Result<()> {
        let body = tokio::fs::read(&record.file).await?;
        let total = body.len() as u64;
        let _ = tx.send(TransferEvent::Progress { current: 0, total });

        let _connection = self
            .connections
            .acquire()
            .await
            .map_err(|e| UplinkError::Transport(e.to_string()))?;

        let mut request = self
            .client
            .put_object()
            .bucket(&record.bucket)
            .key(&record.key)
            .body(ByteStream::from(body));

        if let Some(content_type) = &record.content_type {
            request = request.content_type(content_type);
        }

        request.send().await?;
        let _ = tx.send(TransferEvent::Progress {
            current: total,
            total,
        });
        Ok(())
    }

    fn set_state(&self, id: TransferId, state: TransferState) {
        if let Some(record) = lock(&self.transfers).get_mut(&id) {
            record.state = state;
        }
    }
}

#[async_trait]
impl StorageClient for S3StorageClient {
    async fn put(
        &self,
        bucket: &str,
        key: &str,
        file: &Path,
        content_type: Option<&str>,
    ) -> Result<TransferHandle> {
        let id = TransferId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let record = TransferRecord {
            bucket: bucket.to_string(),
            key: key.to_string(),
            file: file.to_path_buf(),
            content_type: content_type.map(str::to_string),
            state: TransferState::Waiting,
        };

        lock(&self.transfers).insert(id, record.clone());
        debug!(transfer_id = %id, bucket, key, "Transfer submitted");
        Ok(self.spawn_transfer(id, record))
    }

    async fn resume(&self, id: TransferId) -> Result<TransferHandle> {
        let record = {
            let mut transfers = lock(&self.transfers);
            let record = transfers
                .get_mut(&id)
                .ok_or_else(|| UplinkError::Transport(format!("Unknown transfer {}", id)))?;
            if record.state == TransferState::InProgress {
                return Err(UplinkError::Transport(format!(
                    "Transfer {} is still in progress",
                    id
                )));
            }
            record.state = TransferState::Waiting;
            record.clone()
        };

        debug!(transfer_id = %id, key = %record.key, "Transfer resumed");
        Ok(self.spawn_transfer(id, record))
    }

    fn release(&self, id: TransferId) {
        if lock(&self.transfers).remove(&id).is_some() {
            debug!(transfer_id = %id, "Transfer released");
        }
    }

    async fn list_objects(
        &self,
        bucket: &str,
        prefix: &str,
        continuation_token: Option<String>,
    ) -> Result<ListPage> {
        let _connection = self
            .connections
            .acquire()
            .await
            .map_err(|e| UplinkError::Transport(e.to_string()))?;

        let mut request = self
            .client
            .list_objects_v2()
            .bucket(bucket)
            .prefix(prefix)
            .fetch_owner(true);

        if let Some(token) = continuation_token {
            request = request.continuation_token(token);
        }

        let response = request.send().await?;

        let objects = response
            .contents()
            .iter()
            .filter_map(|obj| {
                let key = obj.key()?.to_string();
                Some(RawObject {
                    key,
                    e_tag: obj.e_tag().map(str::to_string),
                    last_modified: obj
                        .last_modified()
                        .and_then(|dt| DateTime::<Utc>::from_timestamp(dt.secs(), dt.subsec_nanos())),
                    storage_class: obj.storage_class().map(|sc| sc.as_str().to_string()),
                    owner_display_name: obj
                        .owner()
                        .and_then(|owner| owner.display_name())
                        .map(str::to_string),
                    owner_id: obj.owner().and_then(|owner| owner.id()).map(str::to_string),
                    size: obj.size().unwrap_or(0).max(0) as u64,
                })
            })
            .collect();

        let next_token = if response.is_truncated().unwrap_or(false) {
            response.next_continuation_token().map(str::to_string)
        } else {
            None
        };

        Ok(ListPage {
            objects,
            next_token,
        })
    }
}
