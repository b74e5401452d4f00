//! Storage client registry
//!
//! Building a storage client resolves credentials and sets up connection
//! pools, so it happens at most once per distinct [`ServiceConfig`]. The
//! factory is created once at startup and shared by reference (usually an
//! `Arc`) with every orchestrator and lister that needs a client.

use crate::config::ServiceConfig;
use crate::error::{Result, UplinkError};
use crate::storage::{S3StorageClient, StorageClient};
use futures::future::BoxFuture;
use futures::FutureExt;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

type ClientBuilder =
    Arc<dyn Fn(ServiceConfig) -> BoxFuture<'static, Result<Arc<dyn StorageClient>>> + Send + Sync>;

/// Memoising registry of storage clients keyed by configuration
pub struct ClientFactory {
    clients: Mutex<HashMap<ServiceConfig, Arc<dyn StorageClient>>>,
    builder: ClientBuilder,
}

impl ClientFactory {
    /// Factory that builds [`S3StorageClient`]s
    pub fn new() -> Self {
        Self::with_builder(|config: ServiceConfig| async move {
            let client = S3StorageClient::connect(&config).await?;
            Ok::<Arc<dyn StorageClient>, UplinkError>(Arc::new(client))
        })
    }

    /// Factory with a custom client builder
    pub fn with_builder<F, Fut>(builder: F) -> Self
    where
        F: Fn(ServiceConfig) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Arc<dyn StorageClient>>> + Send + 'static,
    {
        Self {
            clients: Mutex::new(HashMap::new()),
            builder: Arc::new(move |config| builder(config).boxed()),
        }
    }

    /// Factory that hands out one pre-built client for every configuration
    pub fn with_client(client: Arc<dyn StorageClient>) -> Self {
        Self::with_builder(move |_config| {
            let client = Arc::clone(&client);
            async move { Ok::<_, UplinkError>(client) }
        })
    }

    /// Get the client for `config`, building it on first use.
    ///
    /// An unrecognised region fails here, before the builder runs.
    pub async fn get_client(&self, config: &ServiceConfig) -> Result<Arc<dyn StorageClient>> {
        config.region()?;

        // Held across the build so concurrent callers never build twice
        let mut clients = self.clients.lock().await;
        if let Some(client) = clients.get(config) {
            return Ok(Arc::clone(client));
        }

        debug!(bucket = %config.bucket, region = %config.region, "Building storage client");
        let client = (self.builder)(config.clone()).await?;
        clients.insert(config.clone(), Arc::clone(&client));
        Ok(client)
    }
}

impl Default for ClientFactory {
    fn default() -> Self {
        Self::new()
    }
}
