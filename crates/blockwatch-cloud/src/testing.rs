//! In-memory `ResourceApi` for tests.
//!
//! Listings are served page by page (the marker is the next page index),
//! records by `(kind, id)`. Failures can be injected per page or per
//! record and surface as `CloudError::Status` with code 503.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;

use blockwatch_core::EndpointOptions;

use crate::error::{CloudError, CloudResult};
use crate::resource::{ListOptions, Page, ResourceApi, ResourceKind, ServiceType};

#[derive(Default)]
pub struct FakeApi {
    pages: HashMap<ResourceKind, Vec<Vec<Value>>>,
    records: HashMap<(ResourceKind, String), Value>,
    failing_pages: HashSet<(ResourceKind, usize)>,
    failing_records: HashSet<(ResourceKind, String)>,
    identity: Option<Arc<FakeApi>>,
    page_calls: AtomicUsize,
    get_calls: Mutex<Vec<(ResourceKind, String)>>,
    scoped_calls: Mutex<Vec<(ServiceType, EndpointOptions)>>,
    seen_options: Mutex<Vec<(ResourceKind, ListOptions)>>,
}

impl FakeApi {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `kind` as the given pages, in order.
    pub fn with_pages(mut self, kind: ResourceKind, pages: Vec<Vec<Value>>) -> Self {
        self.pages.insert(kind, pages);
        self
    }

    pub fn with_record(mut self, kind: ResourceKind, id: &str, record: Value) -> Self {
        self.records.insert((kind, id.to_string()), record);
        self
    }

    /// Make the page at `index` of `kind` fail.
    pub fn fail_page(mut self, kind: ResourceKind, index: usize) -> Self {
        self.failing_pages.insert((kind, index));
        self
    }

    /// Make `get(kind, id)` fail.
    pub fn fail_record(mut self, kind: ResourceKind, id: &str) -> Self {
        self.failing_records.insert((kind, id.to_string()));
        self
    }

    /// Client handed out by `scoped(ServiceType::Identity, ..)`.
    pub fn with_identity(mut self, identity: FakeApi) -> Self {
        self.identity = Some(Arc::new(identity));
        self
    }

    pub fn identity(&self) -> Option<&Arc<FakeApi>> {
        self.identity.as_ref()
    }

    pub fn page_calls(&self) -> usize {
        self.page_calls.load(Ordering::SeqCst)
    }

    pub fn get_calls(&self) -> Vec<(ResourceKind, String)> {
        lock(&self.get_calls).clone()
    }

    pub fn scoped_calls(&self) -> Vec<(ServiceType, EndpointOptions)> {
        lock(&self.scoped_calls).clone()
    }

    pub fn seen_options(&self, kind: ResourceKind) -> Vec<ListOptions> {
        lock(&self.seen_options)
            .iter()
            .filter(|(k, _)| *k == kind)
            .map(|(_, o)| o.clone())
            .collect()
    }
}

#[async_trait]
impl ResourceApi for FakeApi {
    async fn fetch_page(
        &self,
        kind: ResourceKind,
        options: &ListOptions,
        marker: Option<&str>,
    ) -> CloudResult<Page> {
        self.page_calls.fetch_add(1, Ordering::SeqCst);
        lock(&self.seen_options).push((kind, options.clone()));

        let index = match marker {
            Some(m) => m
                .parse::<usize>()
                .map_err(|_| CloudError::Decode(format!("bad marker {m:?}")))?,
            None => 0,
        };
        if self.failing_pages.contains(&(kind, index)) {
            return Err(unavailable(format!("{}?page={index}", kind.path(None))));
        }

        let pages = self.pages.get(&kind).map(Vec::as_slice).unwrap_or_default();
        let items = pages.get(index).cloned().unwrap_or_default();
        let next = (index + 1 < pages.len()).then(|| (index + 1).to_string());
        Ok(Page { items, next })
    }

    async fn get(&self, kind: ResourceKind, id: &str) -> CloudResult<Value> {
        lock(&self.get_calls).push((kind, id.to_string()));
        let key = (kind, id.to_string());
        if self.failing_records.contains(&key) {
            return Err(unavailable(kind.path(Some(id))));
        }
        self.records.get(&key).cloned().ok_or_else(|| CloudError::Status {
            status: 404,
            url: kind.path(Some(id)),
            message: "not found".to_string(),
        })
    }

    fn scoped(
        &self,
        service: ServiceType,
        options: &EndpointOptions,
    ) -> CloudResult<Arc<dyn ResourceApi>> {
        lock(&self.scoped_calls).push((service, options.clone()));
        match (service, &self.identity) {
            (ServiceType::Identity, Some(identity)) => Ok(identity.clone()),
            _ => Err(CloudError::Endpoint {
                service: service.as_str().to_string(),
                detail: "fake has no client for this service".to_string(),
            }),
        }
    }
}

fn unavailable(url: String) -> CloudError {
    CloudError::Status {
        status: 503,
        url,
        message: "injected failure".to_string(),
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}
