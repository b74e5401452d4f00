/*!
 * photo-uplink - photo preparation and resumable S3 upload
 *
 * A small upload pipeline for captured photos with:
 * - EXIF orientation normalisation baked into the pixels
 * - Memory-bounded subsampled decode and re-encode
 * - Bottom-anchored text watermarks
 * - Resumable transfers with a bounded retry budget
 * - Paginated prefix listing
 * - One memoised storage client per service configuration
 *
 * Version: 0.1.0
 */

pub mod client_factory;
pub mod config;
pub mod error;
pub mod listing;
pub mod logging;
pub mod photo;
pub mod storage;
pub mod upload;

// Re-export commonly used types
pub use client_factory::ClientFactory;
pub use config::{LogConfig, LogLevel, Region, RetryPolicy, ServiceConfig};
pub use error::{Result, UplinkError};
pub use listing::{ObjectLister, ObjectSummary};
pub use photo::{EncodingFormat, ImagePreprocessor, ImageSpec, PreparedFile, WatermarkLine};
pub use storage::{StorageClient, TransferEvent, TransferId, TransferState};
pub use upload::{UploadListener, UploadOrchestrator, UploadOutcome, UploadRequest};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert_eq!(VERSION, env!("CARGO_PKG_VERSION"));
    }
}
