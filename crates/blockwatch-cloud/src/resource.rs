//! Resource API abstraction and the page iterator.
//!
//! `ResourceApi` is the seam between the exporter and the network: the
//! HTTP client implements it against a real cloud, tests implement it in
//! memory. `Pager` drives `fetch_page` until the listing is exhausted.

use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;

use blockwatch_core::EndpointOptions;

use crate::error::{CloudError, CloudResult};

/// Catalog service a client is bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServiceType {
    BlockStorage,
    Identity,
}

impl ServiceType {
    /// Catalog `type` values that identify this service, most preferred first.
    pub fn catalog_types(&self) -> &'static [&'static str] {
        match self {
            ServiceType::BlockStorage => &["block-storage", "volumev3"],
            ServiceType::Identity => &["identity"],
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceType::BlockStorage => "block-storage",
            ServiceType::Identity => "identity",
        }
    }
}

/// Resources the exporter reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Volumes,
    Snapshots,
    Services,
    Projects,
    QuotaSet,
    QuotaUsage,
}

impl ResourceKind {
    pub fn service(&self) -> ServiceType {
        match self {
            ResourceKind::Projects => ServiceType::Identity,
            _ => ServiceType::BlockStorage,
        }
    }

    /// JSON key holding the record (or list of records) in a response body.
    pub fn body_key(&self) -> &'static str {
        match self {
            ResourceKind::Volumes => "volumes",
            ResourceKind::Snapshots => "snapshots",
            ResourceKind::Services => "services",
            ResourceKind::Projects => "projects",
            ResourceKind::QuotaSet | ResourceKind::QuotaUsage => "quota_set",
        }
    }

    /// Relative path of the listing (or, with an id, the single record).
    pub fn path(&self, id: Option<&str>) -> String {
        match self {
            ResourceKind::Volumes => "volumes/detail".to_string(),
            ResourceKind::Snapshots => "snapshots/detail".to_string(),
            ResourceKind::Services => "os-services".to_string(),
            ResourceKind::Projects => "projects".to_string(),
            ResourceKind::QuotaSet | ResourceKind::QuotaUsage => {
                format!("os-quota-sets/{}", id.unwrap_or_default())
            }
        }
    }
}

/// Filters for a listing request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListOptions {
    /// Privileged cluster-wide view across every project.
    pub all_tenants: bool,
}

impl ListOptions {
    pub fn all_tenants() -> Self {
        Self { all_tenants: true }
    }

    pub fn query(&self) -> Vec<(&'static str, &'static str)> {
        let mut query = Vec::new();
        if self.all_tenants {
            query.push(("all_tenants", "true"));
        }
        query
    }
}

/// One page of a listing.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Page {
    pub items: Vec<Value>,
    /// Opaque marker for the following page, `None` on the last page.
    pub next: Option<String>,
}

/// Client for one cloud service.
#[async_trait]
pub trait ResourceApi: Send + Sync {
    /// Fetch a single page of `kind`. `marker` is the `next` value of the
    /// previous page, `None` for the first one.
    async fn fetch_page(
        &self,
        kind: ResourceKind,
        options: &ListOptions,
        marker: Option<&str>,
    ) -> CloudResult<Page>;

    /// Fetch a single record by id, unwrapped from its body key.
    async fn get(&self, kind: ResourceKind, id: &str) -> CloudResult<Value>;

    /// Build a client for another service that shares this client's
    /// authenticated session.
    fn scoped(
        &self,
        service: ServiceType,
        options: &EndpointOptions,
    ) -> CloudResult<Arc<dyn ResourceApi>>;
}

/// Start a listing. Nothing is fetched until [`Pager::all_pages`].
pub fn list<'a>(api: &'a dyn ResourceApi, kind: ResourceKind, options: ListOptions) -> Pager<'a> {
    Pager { api, kind, options }
}

/// Iterator over the pages of one listing.
pub struct Pager<'a> {
    api: &'a dyn ResourceApi,
    kind: ResourceKind,
    options: ListOptions,
}

impl Pager<'_> {
    /// Fetch every page, following `next` markers until the last page.
    ///
    /// Stops on the first error; pages fetched before it are discarded.
    pub async fn all_pages(self) -> CloudResult<Vec<Page>> {
        let mut pages = Vec::new();
        let mut marker: Option<String> = None;

        loop {
            let page = self
                .api
                .fetch_page(self.kind, &self.options, marker.as_deref())
                .await?;
            let next = page.next.clone();
            let empty = page.items.is_empty();
            pages.push(page);

            match next {
                // A server repeating its marker would otherwise loop forever.
                Some(n) if !empty && marker.as_deref() != Some(n.as_str()) => marker = Some(n),
                _ => break,
            }
        }

        debug!(kind = ?self.kind, pages = pages.len(), "listing drained");
        Ok(pages)
    }

    /// Fetch every page and decode the records as `T`.
    pub async fn extract<T: DeserializeOwned>(self) -> CloudResult<Vec<T>> {
        extract(self.all_pages().await?)
    }
}

/// Decode every item of every page as `T`.
pub fn extract<T: DeserializeOwned>(pages: Vec<Page>) -> CloudResult<Vec<T>> {
    pages
        .into_iter()
        .flat_map(|page| page.items)
        .map(|item| serde_json::from_value(item).map_err(CloudError::from))
        .collect()
}

/// Fetch a single record and decode it as `T`.
pub async fn get_as<T: DeserializeOwned>(
    api: &dyn ResourceApi,
    kind: ResourceKind,
    id: &str,
) -> CloudResult<T> {
    let value = api.get(kind, id).await?;
    Ok(serde_json::from_value(value)?)
}
