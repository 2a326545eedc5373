//! blockwatch-exporter — metric collection framework and the Cinder exporter.
//!
//! An [`Exporter`] is a registry of named metrics for one service. Each
//! enabled metric either owns a collection routine or is filled in by a
//! sibling's routine. Per scrape, every routine runs as its own task,
//! queries the cloud through [`blockwatch_cloud::ResourceApi`], and writes
//! samples into a shared [`SampleSink`]. A failing routine only loses its
//! own samples.
//!
//! # Architecture
//!
//! ```text
//! Scraper::scrape()
//!   ├── sample_channel() → (SampleSink, receiver)
//!   ├── Exporter::collect(sink, timeout)      ← one per service
//!   │     ├── JoinSet: one task per routine   ← catch_unwind, deadline
//!   │     └── up / collector_success gauges
//!   └── render_prometheus(families, samples)
//!
//! build_router(scraper) → GET /metrics
//! ```

pub mod cinder;
pub mod endpoint;
pub mod error;
pub mod exposition;
pub mod registry;
pub mod sample;
pub mod scraper;
pub mod server;
pub mod status;

pub use cinder::{CINDER_SERVICE, new_cinder_exporter};
pub use endpoint::{IDENTITY_SERVICE, resolve_endpoint};
pub use error::{ExporterError, ExporterResult};
pub use exposition::{CONTENT_TYPE, render_prometheus};
pub use registry::{
    BoxFuture, CollectFn, CollectionReport, Emission, Exporter, ExporterContext,
    MetricDeclaration, RoutineOutcome,
};
pub use sample::{MetricDesc, Sample, SampleSink, ValueKind, sample_channel};
pub use scraper::{Scrape, Scraper};
pub use server::build_router;
pub use status::{StatusVocabulary, VOLUME_STATUS};
