//! blockwatch-cloud — OpenStack client used by the exporter.
//!
//! Authenticates against Keystone, resolves service endpoints from the
//! catalog, and lists Block Storage and Identity resources page by page.
//!
//! # Architecture
//!
//! ```text
//! Session (token + catalog, shared via Arc)
//!   └── client_for(service, options) → HttpApi
//!
//! ResourceApi (trait)
//!   ├── fetch_page() ← one HTTP round trip
//!   ├── get()        ← single record
//!   └── scoped()     ← sibling client on the same session
//!
//! list(api, kind, options) → Pager
//!   └── all_pages() / extract::<T>()
//! ```

pub mod auth;
pub mod client;
pub mod error;
pub mod resource;
pub mod types;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use auth::Session;
pub use client::HttpApi;
pub use error::{CloudError, CloudResult};
pub use resource::{
    ListOptions, Page, Pager, ResourceApi, ResourceKind, ServiceType, extract, get_as, list,
};
pub use types::*;
