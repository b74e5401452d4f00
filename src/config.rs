/*!
 * Configuration types for photo-uplink
 */

use crate::error::{Result, UplinkError};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Per-request timeout applied to every storage call
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Low-level retry attempts performed by the storage SDK itself
pub const MAX_LOW_LEVEL_RETRIES: u32 = 3;

/// Upper bound on in-flight storage requests per client
pub const MAX_CONNECTIONS: usize = 10;

/// Number of uploads a client drives concurrently.
///
/// Four keeps a burst of photos moving on a flaky mobile uplink without
/// saturating the radio; one serialises batches, ten starves the listing path.
pub const TRANSFER_WORKER_POOL_SIZE: usize = 4;

/// Default target width when `ImageSpec::target_width` is unset
pub const DEFAULT_IMAGE_WIDTH: u32 = 1024;

/// Default target height when `ImageSpec::target_height` is unset
pub const DEFAULT_IMAGE_HEIGHT: u32 = 768;

/// Default JPEG quality
pub const DEFAULT_JPEG_QUALITY: u8 = 80;

/// Default media type for prepared uploads
pub const DEFAULT_MEDIA_TYPE: &str = "image/jpeg";

/// Regions a client can be built for
const KNOWN_REGIONS: &[&str] = &[
    "us-east-1",
    "us-east-2",
    "us-west-1",
    "us-west-2",
    "af-south-1",
    "ap-east-1",
    "ap-south-1",
    "ap-south-2",
    "ap-southeast-1",
    "ap-southeast-2",
    "ap-southeast-3",
    "ap-southeast-4",
    "ap-northeast-1",
    "ap-northeast-2",
    "ap-northeast-3",
    "ca-central-1",
    "ca-west-1",
    "eu-central-1",
    "eu-central-2",
    "eu-west-1",
    "eu-west-2",
    "eu-west-3",
    "eu-south-1",
    "eu-south-2",
    "eu-north-1",
    "il-central-1",
    "me-south-1",
    "me-central-1",
    "sa-east-1",
];

/// A recognised storage region
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Region(&'static str);

impl Region {
    /// Resolve a region identifier, failing for anything not in the known table
    pub fn parse(id: &str) -> Result<Self> {
        KNOWN_REGIONS
            .iter()
            .copied()
            .find(|known| *known == id)
            .map(Region)
            .ok_or_else(|| UplinkError::Config(format!("Unrecognized region: {}", id)))
    }

    /// Region identifier, e.g. `ap-southeast-1`
    pub fn code(&self) -> &'static str {
        self.0
    }
}

impl FromStr for Region {
    type Err = UplinkError;

    fn from_str(s: &str) -> Result<Self> {
        Region::parse(s)
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

/// Storage service configuration.
///
/// Doubles as the memoisation key in [`crate::ClientFactory`]: two configs
/// that compare equal share one client.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Bucket name
    pub bucket: String,

    /// Identity pool the session credentials are issued against
    pub identity_pool_id: String,

    /// Region identifier (e.g. "ap-southeast-1")
    pub region: String,

    /// Prefix for public object URLs, usually ending in `/`
    pub base_url: String,
}

impl ServiceConfig {
    /// Start building a configuration for a bucket
    pub fn builder(bucket: impl Into<String>) -> ServiceConfigBuilder {
        ServiceConfigBuilder::new(bucket)
    }

    /// Load a configuration from a TOML file
    pub fn from_toml_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            UplinkError::Config(format!("Cannot read {}: {}", path.display(), e))
        })?;
        let config: ServiceConfig = toml::from_str(&raw)
            .map_err(|e| UplinkError::Config(format!("Invalid config file: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Resolve the configured region
    pub fn region(&self) -> Result<Region> {
        Region::parse(&self.region)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.bucket.is_empty() {
            return Err(UplinkError::Config(
                "Bucket name cannot be empty".to_string(),
            ));
        }
        self.region()?;
        Ok(())
    }
}

/// Builder for [`ServiceConfig`]
#[derive(Debug, Clone)]
pub struct ServiceConfigBuilder {
    config: ServiceConfig,
}

impl ServiceConfigBuilder {
    /// Create a new builder with bucket name
    pub fn new(bucket: impl Into<String>) -> Self {
        Self {
            config: ServiceConfig {
                bucket: bucket.into(),
                identity_pool_id: String::new(),
                region: String::new(),
                base_url: String::new(),
            },
        }
    }

    /// Set the identity pool id
    pub fn identity_pool_id(mut self, pool_id: impl Into<String>) -> Self {
        self.config.identity_pool_id = pool_id.into();
        self
    }

    /// Set the region
    pub fn region(mut self, region: impl Into<String>) -> Self {
        self.config.region = region.into();
        self
    }

    /// Set the public base URL
    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.config.base_url = base_url.into();
        self
    }

    /// Build and validate the configuration
    pub fn build(self) -> Result<ServiceConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Resume policy applied by the upload orchestrator
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Resumptions allowed after the first failure
    pub max_resumes: u32,

    /// Delay before the first resume
    pub initial_delay: Duration,

    /// Cap on the delay between resumes
    pub max_delay: Duration,

    /// Jitter factor (0.0-1.0)
    pub jitter_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_resumes: 2,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
            jitter_factor: 0.3,
        }
    }
}

impl RetryPolicy {
    /// Resume straight away, no backoff
    pub fn immediate() -> Self {
        Self {
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            jitter_factor: 0.0,
            ..Default::default()
        }
    }

    /// Delay before resume number `attempt` (1-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let multiplier = 2_u32.saturating_pow(attempt.saturating_sub(1));
        let capped = self.initial_delay.saturating_mul(multiplier).min(self.max_delay);

        if self.jitter_factor > 0.0 && !capped.is_zero() {
            let jitter = rand::rng().random_range(0.0..self.jitter_factor);
            capped + Duration::from_secs_f64(capped.as_secs_f64() * jitter)
        } else {
            capped
        }
    }
}

/// Log level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Only errors
    Error,

    /// Warnings and errors
    Warn,

    /// Info, warnings, and errors
    #[default]
    Info,

    /// Debug and above
    Debug,

    /// All messages including traces
    Trace,
}

impl LogLevel {
    /// Convert to tracing::Level
    pub fn to_tracing_level(&self) -> tracing::Level {
        match self {
            LogLevel::Error => tracing::Level::ERROR,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Trace => tracing::Level::TRACE,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LogConfig {
    /// Log level
    #[serde(default)]
    pub level: LogLevel,

    /// Log file path (None = stdout)
    #[serde(default)]
    pub file: Option<PathBuf>,

    /// Enable verbose logging (shorthand for level = debug)
    #[serde(default)]
    pub verbose: bool,
}
