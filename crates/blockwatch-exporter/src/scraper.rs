//! One scrape cycle across every exporter.

use std::time::{Duration, Instant};

use futures_util::future::join_all;
use tracing::{info, warn};

use crate::exposition::render_prometheus;
use crate::registry::{CollectionReport, Exporter};
use crate::sample::sample_channel;

/// Result of [`Scraper::scrape`].
#[derive(Debug)]
pub struct Scrape {
    /// Rendered exposition.
    pub body: String,
    pub reports: Vec<CollectionReport>,
    pub samples: usize,
}

impl Scrape {
    pub fn success(&self) -> bool {
        self.reports.iter().all(CollectionReport::success)
    }
}

/// Runs every exporter against one shared sample channel.
#[derive(Debug)]
pub struct Scraper {
    exporters: Vec<Exporter>,
    timeout: Duration,
}

impl Scraper {
    /// `timeout` bounds each exporter's collection.
    pub fn new(exporters: Vec<Exporter>, timeout: Duration) -> Self {
        Self { exporters, timeout }
    }

    pub fn exporters(&self) -> &[Exporter] {
        &self.exporters
    }

    /// Collect from every exporter concurrently and render the samples.
    pub async fn scrape(&self) -> Scrape {
        let started = Instant::now();
        let (sink, mut rx) = sample_channel();

        let reports = join_all(
            self.exporters
                .iter()
                .map(|exporter| exporter.collect(&sink, self.timeout)),
        )
        .await;

        // Every routine has returned; once the last sender is gone the
        // receiver yields the buffered samples and then `None`.
        drop(sink);
        let mut samples = Vec::new();
        while let Some(sample) = rx.recv().await {
            samples.push(sample);
        }

        let families: Vec<_> = self.exporters.iter().flat_map(Exporter::families).collect();
        let body = render_prometheus(&families, &samples);

        let scrape = Scrape {
            body,
            reports,
            samples: samples.len(),
        };
        if scrape.success() {
            info!(
                samples = scrape.samples,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "scrape complete"
            );
        } else {
            let failed: Vec<_> = scrape
                .reports
                .iter()
                .flat_map(|r| r.failures().map(|o| format!("{}/{}", r.exporter, o.name)))
                .collect();
            warn!(
                samples = scrape.samples,
                elapsed_ms = started.elapsed().as_millis() as u64,
                failed = ?failed,
                "scrape complete with failed collectors"
            );
        }
        scrape
    }
}
