//! Prefix-scoped object listing
//!
//! [`ObjectLister::try_list_all`] pages through a listing until the client
//! stops returning continuation tokens and reports failures as `Err`.
//! [`ObjectLister::list_all_objects`] is the fire-and-forget form: it runs on
//! a background task and hands its callback an empty list when the listing
//! fails, so callers of that form cannot tell "no objects" from "listing
//! failed". Prefer `try_list_all` where the difference matters.

use crate::client_factory::ClientFactory;
use crate::config::ServiceConfig;
use crate::error::{Result, UplinkError};
use crate::storage::RawObject;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Listed object plus the base URL it is served from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectSummary {
    pub key: String,
    pub e_tag: Option<String>,
    pub last_modified: Option<DateTime<Utc>>,
    pub storage_class: Option<String>,
    pub owner_display_name: Option<String>,
    pub owner_id: Option<String>,
    pub size: u64,
    pub base_url: String,
}

impl ObjectSummary {
    pub fn from_raw(raw: RawObject, base_url: &str) -> Self {
        Self {
            key: raw.key,
            e_tag: raw.e_tag,
            last_modified: raw.last_modified,
            storage_class: raw.storage_class,
            owner_display_name: raw.owner_display_name,
            owner_id: raw.owner_id,
            size: raw.size,
            base_url: base_url.to_string(),
        }
    }

    /// Public URL of the object
    pub fn url(&self) -> String {
        format!("{}/{}", self.base_url, self.key)
    }
}

/// Virtual-hosted-style endpoint for `bucket` in `region`
pub fn object_base_url(bucket: &str, region: &str) -> String {
    format!("https://{}.s3.{}.amazonaws.com", bucket, region)
}

/// Lists every object under a prefix
#[derive(Clone)]
pub struct ObjectLister {
    factory: Arc<ClientFactory>,
}

impl ObjectLister {
    pub fn new(factory: Arc<ClientFactory>) -> Self {
        Self { factory }
    }

    /// All objects under `prefix`, in listing order.
    ///
    /// A continuation token handed out twice is a listing error.
    pub async fn try_list_all(
        &self,
        bucket: &str,
        region: &str,
        pool_id: &str,
        prefix: &str,
    ) -> Result<Vec<ObjectSummary>> {
        let config = listing_config(bucket, region, pool_id);
        let client = self.factory.get_client(&config).await?;

        let mut summaries = Vec::new();
        let mut token: Option<String> = None;
        let mut seen_tokens = HashSet::new();
        let mut pages = 0usize;

        loop {
            let page = client.list_objects(bucket, prefix, token.take()).await?;
            pages += 1;
            debug!(page = pages, objects = page.objects.len(), "Listing page received");

            summaries.extend(
                page.objects
                    .into_iter()
                    .map(|raw| ObjectSummary::from_raw(raw, &config.base_url)),
            );

            match page.next_token {
                Some(next) if !seen_tokens.insert(next.clone()) => {
                    return Err(UplinkError::Listing(format!(
                        "Continuation token repeated after {} pages: {}",
                        pages, next
                    )));
                }
                Some(next) => token = Some(next),
                None => break,
            }
        }

        info!(bucket, prefix, pages, objects = summaries.len(), "Listing complete");
        Ok(summaries)
    }

    /// Run the listing on a background task and deliver the result to
    /// `on_result` exactly once; failures deliver an empty list.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    pub fn list_all_objects<F>(
        &self,
        bucket: impl Into<String>,
        region: impl Into<String>,
        pool_id: impl Into<String>,
        prefix: impl Into<String>,
        on_result: F,
    ) -> JoinHandle<()>
    where
        F: FnOnce(Vec<ObjectSummary>) + Send + 'static,
    {
        let lister = self.clone();
        let (bucket, region, pool_id, prefix) =
            (bucket.into(), region.into(), pool_id.into(), prefix.into());

        tokio::spawn(async move {
            let objects = match lister.try_list_all(&bucket, &region, &pool_id, &prefix).await {
                Ok(objects) => objects,
                Err(e) => {
                    warn!(bucket = %bucket, prefix = %prefix, "Listing failed, returning no objects: {}", e);
                    Vec::new()
                }
            };
            on_result(objects);
        })
    }
}

fn listing_config(bucket: &str, region: &str, pool_id: &str) -> ServiceConfig {
    ServiceConfig {
        bucket: bucket.to_string(),
        identity_pool_id: pool_id.to_string(),
        region: region.to_string(),
        base_url: object_base_url(bucket, region),
    }
}
