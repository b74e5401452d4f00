/*!
 * Error types for photo-uplink
 */

use aws_sdk_s3::error::{ProvideErrorMetadata, SdkError};
use std::io;
use thiserror::Error;

/// Result type alias for uplink operations
pub type Result<T> = std::result::Result<T, UplinkError>;

/// Errors that can occur while preparing, uploading or listing images
#[derive(Error, Debug, Clone)]
pub enum UplinkError {
    /// Invalid configuration (unknown region, empty source path, bad config file)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Source image could not be decoded
    #[error("Failed to decode image: {0}")]
    Decode(String),

    /// Bitmap could not be re-encoded to the requested format
    #[error("Failed to encode image: {0}")]
    Encode(String),

    /// Orientation or watermark transform failed
    #[error("Image transform failed: {0}")]
    Transform(String),

    /// EXIF metadata could not be read or written
    #[error("Image metadata error: {0}")]
    Metadata(String),

    /// Transfer-level failure reported outside the state machine
    #[error("Transport error: {0}")]
    Transport(String),

    /// Network error
    #[error("Network error: {0}")]
    Network(String),

    /// Timeout error
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// Storage service error with specific error code
    #[error("Storage service error ({code}): {message}")]
    Service { code: String, message: String },

    /// Access denied error
    #[error("Access denied: {0}")]
    AccessDenied(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(String),

    /// Listing could not be completed
    #[error("Listing failed: {0}")]
    Listing(String),
}

impl UplinkError {
    /// Check if a failed transfer is worth resuming
    pub fn is_retryable(&self) -> bool {
        match self {
            UplinkError::Network(_) | UplinkError::Timeout(_) => true,
            UplinkError::Service { code, .. } => is_retryable_code(code),
            UplinkError::Transport(msg) => {
                let lower = msg.to_lowercase();
                lower.contains("connection reset")
                    || lower.contains("connection timed out")
                    || lower.contains("broken pipe")
                    || lower.contains("connection refused")
                    || lower.contains("temporarily unavailable")
            }
            _ => false,
        }
    }

    /// Errors raised before any file or network activity
    pub fn is_config(&self) -> bool {
        matches!(self, UplinkError::Config(_))
    }
}

impl From<io::Error> for UplinkError {
    fn from(err: io::Error) -> Self {
        UplinkError::Io(err.to_string())
    }
}

/// Check if a storage service error code is retryable
pub(crate) fn is_retryable_code(code: &str) -> bool {
    matches!(
        code,
        "RequestTimeout"
            | "ServiceUnavailable"
            | "InternalError"
            | "SlowDown"
            | "RequestTimeTooSkewed"
    )
}

impl<E, R> From<SdkError<E, R>> for UplinkError
where
    E: ProvideErrorMetadata + std::error::Error + 'static,
    R: std::fmt::Debug,
{
    fn from(error: SdkError<E, R>) -> Self {
        match error {
            SdkError::TimeoutError(e) => UplinkError::Timeout(format!("{:?}", e)),
            SdkError::DispatchFailure(e) => {
                if e.is_timeout() {
                    UplinkError::Timeout(format!("Dispatch timed out: {:?}", e))
                } else {
                    UplinkError::Network(format!("Network dispatch failure: {:?}", e))
                }
            }
            SdkError::ResponseError(e) => {
                UplinkError::Network(format!("Response error: {:?}", e))
            }
            SdkError::ServiceError(e) => {
                let err = e.err();
                let code = err.code().unwrap_or("Unknown").to_string();
                let message = err.message().unwrap_or_default().to_string();
                if code == "AccessDenied" {
                    UplinkError::AccessDenied(message)
                } else {
                    UplinkError::Service { code, message }
                }
            }
            other => UplinkError::Transport(format!("{:?}", other)),
        }
    }
}
