//! Upload orchestration
//!
//! [`UploadOrchestrator::begin_upload`] prepares the image, submits it to
//! the storage client and drives the transfer's event stream through the
//! [`state`] machine until exactly one terminal outcome is reported to the
//! [`UploadListener`].
//!
//! Failures reported as a `Failed` state are resumed under the same
//! transfer id, with backoff from the [`RetryPolicy`], until the resume
//! budget runs out. Transport errors are a separate channel: they are
//! reported immediately and never retried.
//!
//! The orchestrator itself holds no per-upload state, so one instance can
//! run any number of uploads concurrently.

pub mod state;

pub use state::{Action, UploadContext, UploadState};

use crate::client_factory::ClientFactory;
use crate::config::{RetryPolicy, ServiceConfig};
use crate::error::{Result, UplinkError};
use crate::photo::{ImagePreprocessor, ImageSpec, PreparedFile};
use crate::storage::{StorageClient, TransferEvent, TransferHandle, TransferId, TransferState};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// One logical upload: where to, what, and under which prefix
#[derive(Debug, Clone, PartialEq)]
pub struct UploadRequest {
    pub config: ServiceConfig,
    pub image: ImageSpec,
    /// Key prefix inside the bucket, without a trailing slash
    pub folder_path: String,
}

impl UploadRequest {
    pub fn new(config: ServiceConfig, image: ImageSpec, folder_path: impl Into<String>) -> Self {
        Self {
            config,
            image,
            folder_path: folder_path.into(),
        }
    }
}

/// Caller-side callbacks for one upload.
///
/// Progress may fire any number of times; afterwards exactly one of
/// `on_success`, `on_error` or `on_state_changed` fires.
pub trait UploadListener: Send + Sync {
    /// Submission has started
    fn show_progress(&self) {}

    /// Byte counts, nondecreasing and never above `total`
    fn on_progress_changed(&self, _id: TransferId, _current: f32, _total: f32) {}

    /// Object stored at `url`
    fn on_success(&self, _url: &str) {}

    /// Preprocessing or transport failure
    fn on_error(&self, _message: &str, _request: &UploadRequest) {}

    /// Terminal state: `CANCELED` or `FAILED`
    fn on_state_changed(&self, _label: &str) {}
}

/// Listener that ignores every callback
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopListener;

impl UploadListener for NoopListener {}

/// How an upload ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadOutcome {
    Completed { url: String },
    Canceled,
    /// Resume budget exhausted
    Failed,
    /// Preprocessing or transport error
    Errored { message: String },
}

/// Object key for `file_name` under `folder_path`
pub fn object_key(folder_path: &str, file_name: &str) -> String {
    format!("{}/{}", folder_path, file_name)
}

/// Public URL of an uploaded object
pub fn public_url(base_url: &str, folder_path: &str, file_name: &str) -> String {
    format!("{}{}", base_url, object_key(folder_path, file_name))
}

/// Stateless upload service over a shared [`ClientFactory`]
#[derive(Clone)]
pub struct UploadOrchestrator {
    factory: Arc<ClientFactory>,
    preprocessor: ImagePreprocessor,
    policy: RetryPolicy,
}

impl UploadOrchestrator {
    pub fn new(factory: Arc<ClientFactory>) -> Self {
        Self {
            factory,
            preprocessor: ImagePreprocessor::new(),
            policy: RetryPolicy::default(),
        }
    }

    pub fn with_preprocessor(mut self, preprocessor: ImagePreprocessor) -> Self {
        self.preprocessor = preprocessor;
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Prepare and upload one image.
    ///
    /// Configuration errors (empty source path, unknown region, client
    /// construction) are returned as `Err` before any file or network
    /// activity and fire no callback. Every other failure is reported
    /// through `listener` and reflected in the returned outcome.
    ///
    /// On success `listener.on_success` fires first, then `on_success`.
    pub async fn begin_upload<F>(
        &self,
        mut request: UploadRequest,
        listener: &dyn UploadListener,
        on_success: F,
    ) -> Result<UploadOutcome>
    where
        F: FnOnce(String),
    {
        if request.image.source_path.as_os_str().is_empty() {
            return Err(UplinkError::Config(
                "Could not find the filepath of the selected file".to_string(),
            ));
        }
        let client = self.factory.get_client(&request.config).await?;

        let prepared = match self.prepare(&mut request).await {
            Ok(prepared) => prepared,
            Err(e) => {
                warn!("Image preparation failed: {}", e);
                return Ok(report_error(e.to_string(), &request, listener));
            }
        };

        let key = object_key(&request.folder_path, &prepared.file_name);
        info!(
            bucket = %request.config.bucket,
            key = %key,
            bytes = prepared.size_bytes,
            degraded = prepared.degraded,
            "Submitting upload"
        );

        let handle = match client
            .put(
                &request.config.bucket,
                &key,
                &prepared.path,
                Some(&prepared.media_type),
            )
            .await
        {
            Ok(handle) => handle,
            Err(e) => return Ok(report_error(e.to_string(), &request, listener)),
        };

        let mut ctx = UploadContext::new(self.policy.max_resumes);
        ctx.submitted();
        listener.show_progress();

        let outcome = self
            .drive(client.as_ref(), handle, &mut ctx, &request, &prepared, listener)
            .await;

        if let UploadOutcome::Completed { url } = &outcome {
            on_success(url.clone());
        }
        Ok(outcome)
    }

    /// Run preprocessing on a blocking thread; writes the possibly
    /// re-pointed image back into `request`
    async fn prepare(&self, request: &mut UploadRequest) -> Result<PreparedFile> {
        let preprocessor = self.preprocessor.clone();
        let mut image = request.image.clone();

        let (image, result) = tokio::task::spawn_blocking(move || {
            let result = preprocessor.prepare(&mut image);
            (image, result)
        })
        .await
        .map_err(|e| UplinkError::Transform(format!("Preparation task failed: {}", e)))?;

        request.image = image;
        result
    }

    /// Event loop from submission to a terminal outcome
    async fn drive(
        &self,
        client: &dyn StorageClient,
        mut handle: TransferHandle,
        ctx: &mut UploadContext,
        request: &UploadRequest,
        prepared: &PreparedFile,
        listener: &dyn UploadListener,
    ) -> UploadOutcome {
        loop {
            let event = handle.events.recv().await.unwrap_or_else(|| {
                TransferEvent::Error(format!("Transfer {} ended without a final state", handle.id))
            });

            match ctx.step(&event) {
                Action::Ignore => {}
                Action::ReportProgress { current, total } => {
                    listener.on_progress_changed(handle.id, current as f32, total as f32);
                }
                Action::Resume { attempt } => {
                    let delay = self.policy.delay_for(attempt);
                    warn!(
                        transfer_id = %handle.id,
                        attempt,
                        max = self.policy.max_resumes,
                        "Transfer failed, resuming in {:?}",
                        delay
                    );
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                    match client.resume(handle.id).await {
                        Ok(resumed) => {
                            handle = resumed;
                            ctx.resumed();
                        }
                        Err(e) => {
                            ctx.step(&TransferEvent::Error(e.to_string()));
                            client.release(handle.id);
                            return report_error(e.to_string(), request, listener);
                        }
                    }
                }
                Action::Complete => {
                    let url = public_url(
                        &request.config.base_url,
                        &request.folder_path,
                        &prepared.file_name,
                    );
                    info!(transfer_id = %handle.id, resumes = ctx.resumes(), url = %url, "Upload completed");
                    listener.on_success(&url);
                    return UploadOutcome::Completed { url };
                }
                Action::Cancel => {
                    info!(transfer_id = %handle.id, "Upload canceled");
                    client.release(handle.id);
                    listener.on_state_changed(TransferState::Canceled.label());
                    return UploadOutcome::Canceled;
                }
                Action::Fail => {
                    warn!(transfer_id = %handle.id, resumes = ctx.resumes(), "Upload failed after retries");
                    client.release(handle.id);
                    listener.on_state_changed(TransferState::Failed.label());
                    return UploadOutcome::Failed;
                }
                Action::Error(message) => {
                    debug!(transfer_id = %handle.id, "Transport error");
                    client.release(handle.id);
                    return report_error(message, request, listener);
                }
            }
        }
    }
}

impl std::fmt::Debug for UploadOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UploadOrchestrator")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

fn report_error(
    message: String,
    request: &UploadRequest,
    listener: &dyn UploadListener,
) -> UploadOutcome {
    warn!("Upload error: {}", message);
    listener.on_error(&message, request);
    UploadOutcome::Errored { message }
}
