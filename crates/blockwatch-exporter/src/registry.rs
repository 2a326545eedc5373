//! Metric registry and per-service base exporter.
//!
//! An [`Exporter`] owns the declarations of one service's metrics, drops
//! the disabled ones at construction, and on every scrape runs each
//! remaining collection routine as its own task. Routines only read the
//! shared [`ExporterContext`] and write to the scrape's [`SampleSink`].
//!
//! A routine's error (or panic) is contained: it shows up in the
//! [`CollectionReport`] and in the `up` / `collector_success` gauges,
//! never in the other routines' output.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::FutureExt;
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, error, info, warn};

use blockwatch_cloud::ResourceApi;
use blockwatch_core::EndpointOptions;

use crate::error::{ExporterError, ExporterResult};
use crate::sample::{MetricDesc, SampleSink};

pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;

/// A collection routine.
pub type CollectFn = fn(Arc<ExporterContext>, SampleSink) -> BoxFuture<ExporterResult<()>>;

const UP: &str = "up";
const COLLECTOR_SUCCESS: &str = "collector_success";

/// Deadline offset used when `now + timeout` does not fit in an `Instant`.
const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

type Joined = Result<(String, ExporterResult<()>), JoinError>;

/// How a declared metric gets its samples.
#[derive(Clone, Copy)]
pub enum Emission {
    /// Run this routine on every scrape.
    Routine(CollectFn),
    /// Emitted by the routine of the named sibling metric.
    Sibling(&'static str),
}

impl fmt::Debug for Emission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Emission::Routine(_) => f.write_str("Routine"),
            Emission::Sibling(owner) => f.debug_tuple("Sibling").field(owner).finish(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct MetricDeclaration {
    pub desc: MetricDesc,
    pub emission: Emission,
}

/// What a routine can see: the primary client, endpoint options for
/// secondary clients, and the enabled metrics.
#[derive(Clone)]
pub struct ExporterContext {
    service: String,
    prefix: String,
    client: Arc<dyn ResourceApi>,
    endpoints: HashMap<String, EndpointOptions>,
    metrics: HashMap<String, MetricDesc>,
}

impl fmt::Debug for ExporterContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExporterContext")
            .field("service", &self.service)
            .field("prefix", &self.prefix)
            .field("endpoints", &self.endpoints.keys().collect::<Vec<_>>())
            .field("metrics", &self.metrics.len())
            .finish_non_exhaustive()
    }
}

impl ExporterContext {
    /// Logical service name ("cinder").
    pub fn service(&self) -> &str {
        &self.service
    }

    pub fn client(&self) -> &dyn ResourceApi {
        self.client.as_ref()
    }

    pub fn endpoints(&self) -> &HashMap<String, EndpointOptions> {
        &self.endpoints
    }

    /// Descriptor of an enabled metric, `None` if it is disabled.
    pub fn metric(&self, name: &str) -> Option<&MetricDesc> {
        self.metrics.get(name)
    }
}

/// Outcome of one routine within a scrape.
#[derive(Debug)]
pub struct RoutineOutcome {
    pub name: String,
    pub result: ExporterResult<()>,
}

/// Summary of one [`Exporter::collect`] call.
#[derive(Debug)]
pub struct CollectionReport {
    pub exporter: String,
    pub outcomes: Vec<RoutineOutcome>,
    pub duration: Duration,
}

impl CollectionReport {
    pub fn success(&self) -> bool {
        self.outcomes.iter().all(|o| o.result.is_ok())
    }

    pub fn failures(&self) -> impl Iterator<Item = &RoutineOutcome> {
        self.outcomes.iter().filter(|o| o.result.is_err())
    }
}

/// Registry of one service's metrics.
pub struct Exporter {
    context: Arc<ExporterContext>,
    declarations: Vec<MetricDeclaration>,
    disabled: HashSet<String>,
    up: MetricDesc,
    collector_success: MetricDesc,
}

impl fmt::Debug for Exporter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Exporter")
            .field("service", &self.context.service)
            .field(
                "metrics",
                &self
                    .declarations
                    .iter()
                    .map(|d| d.desc.name.as_str())
                    .collect::<Vec<_>>(),
            )
            .finish_non_exhaustive()
    }
}

impl Exporter {
    /// Create an exporter with no metrics.
    ///
    /// `disabled_metrics` entries match either the bare metric name or
    /// `{service}-{name}`.
    pub fn new(
        service: impl Into<String>,
        prefix: impl Into<String>,
        client: Arc<dyn ResourceApi>,
        endpoints: HashMap<String, EndpointOptions>,
        disabled_metrics: &[String],
    ) -> Self {
        let service = service.into();
        let prefix = prefix.into();

        let up = MetricDesc {
            name: UP.to_string(),
            fq_name: fq_name(&prefix, &service, UP),
            help: format!("Whether every {service} collector succeeded in the last scrape."),
            labels: Vec::new(),
        };
        let collector_success = MetricDesc {
            name: COLLECTOR_SUCCESS.to_string(),
            fq_name: fq_name(&prefix, &service, COLLECTOR_SUCCESS),
            help: format!("Whether each {service} collector succeeded in the last scrape."),
            labels: vec!["collector".to_string()],
        };

        Self {
            context: Arc::new(ExporterContext {
                service,
                prefix,
                client,
                endpoints,
                metrics: HashMap::new(),
            }),
            declarations: Vec::new(),
            disabled: disabled_metrics.iter().cloned().collect(),
            up,
            collector_success,
        }
    }

    pub fn service(&self) -> &str {
        &self.context.service
    }

    /// Whether `name` is listed as disabled.
    pub fn is_disabled(&self, name: &str) -> bool {
        self.disabled.contains(name)
            || self
                .disabled
                .contains(&format!("{}-{}", self.context.service, name))
    }

    /// Declare a metric. Returns `Ok(false)` if it is disabled and was
    /// therefore not added.
    pub fn add_metric(
        &mut self,
        name: &str,
        emission: Emission,
        labels: &[&str],
        help: &str,
    ) -> ExporterResult<bool> {
        if name == UP
            || name == COLLECTOR_SUCCESS
            || self.declarations.iter().any(|d| d.desc.name == name)
        {
            return Err(ExporterError::DuplicateMetric(name.to_string()));
        }

        if self.is_disabled(name) {
            info!(exporter = %self.context.service, metric = name, "metric disabled");
            return Ok(false);
        }

        if let Emission::Sibling(owner) = emission {
            if self.is_disabled(owner) {
                warn!(
                    exporter = %self.context.service,
                    metric = name,
                    owner,
                    "metric is emitted by a disabled sibling and will stay empty"
                );
            }
        }

        let desc = MetricDesc {
            name: name.to_string(),
            fq_name: fq_name(&self.context.prefix, &self.context.service, name),
            help: help.to_string(),
            labels: labels.iter().map(|l| l.to_string()).collect(),
        };

        Arc::make_mut(&mut self.context)
            .metrics
            .insert(name.to_string(), desc.clone());
        self.declarations.push(MetricDeclaration { desc, emission });
        debug!(exporter = %self.context.service, metric = name, "metric declared");
        Ok(true)
    }

    /// Enabled declarations, in declaration order.
    pub fn enabled_metrics(&self) -> impl Iterator<Item = &MetricDeclaration> {
        self.declarations.iter()
    }

    /// Every metric family this exporter can expose, including its own
    /// health gauges, in exposition order.
    pub fn families(&self) -> Vec<&MetricDesc> {
        self.declarations
            .iter()
            .map(|d| &d.desc)
            .chain([&self.up, &self.collector_success])
            .collect()
    }

    /// Run every routine concurrently and wait for all of them, or until
    /// `timeout` elapses, whichever comes first. Routines still running
    /// at the deadline are aborted and reported as failed.
    ///
    /// Every task holding a clone of `sink` has finished when this returns.
    pub async fn collect(&self, sink: &SampleSink, timeout: Duration) -> CollectionReport {
        let started = Instant::now();
        let now = tokio::time::Instant::now();
        let deadline = now.checked_add(timeout).unwrap_or_else(|| now + FAR_FUTURE);
        let service = self.context.service.clone();

        let mut tasks = JoinSet::new();
        let mut tally = Tally::default();
        for decl in &self.declarations {
            let Emission::Routine(routine) = decl.emission else {
                continue;
            };
            let name = decl.desc.name.clone();
            let context = Arc::clone(&self.context);
            let sink = sink.clone();
            tally.outstanding.insert(name.clone());

            tasks.spawn(async move {
                let result = AssertUnwindSafe(routine(context, sink))
                    .catch_unwind()
                    .await
                    .unwrap_or_else(|panic| Err(ExporterError::Panicked(panic_message(&*panic))));
                (name, result)
            });
        }

        loop {
            match tokio::time::timeout_at(deadline, tasks.join_next()).await {
                Ok(Some(joined)) => tally.record(&service, joined),
                Ok(None) => break,
                Err(_) => {
                    tally.settle(&service, &mut tasks).await;
                    break;
                }
            }
        }
        let mut outcomes = tally.finish();

        let order: HashMap<&str, usize> = self
            .declarations
            .iter()
            .enumerate()
            .map(|(i, d)| (d.desc.name.as_str(), i))
            .collect();
        outcomes.sort_by_key(|o| order.get(o.name.as_str()).copied().unwrap_or(usize::MAX));

        let report = CollectionReport {
            exporter: service,
            outcomes,
            duration: started.elapsed(),
        };
        self.emit_health(sink, &report);
        report
    }

    fn emit_health(&self, sink: &SampleSink, report: &CollectionReport) {
        for outcome in &report.outcomes {
            let value = match &outcome.result {
                Ok(()) => {
                    debug!(exporter = %report.exporter, collector = %outcome.name, "collection succeeded");
                    1.0
                }
                Err(e) => {
                    error!(exporter = %report.exporter, collector = %outcome.name, error = %e, "collection failed");
                    0.0
                }
            };
            if let Err(e) = sink.gauge(&self.collector_success, value, &[&outcome.name]) {
                warn!(error = %e, "failed to emit collector status");
            }
        }

        let up = if report.success() { 1.0 } else { 0.0 };
        if let Err(e) = sink.gauge(&self.up, up, &[]) {
            warn!(error = %e, "failed to emit up");
        }
    }
}

/// Routine outcomes of one scrape, as they are joined.
#[derive(Default)]
struct Tally {
    outstanding: HashSet<String>,
    outcomes: Vec<RoutineOutcome>,
}

impl Tally {
    fn record(&mut self, service: &str, joined: Joined) {
        match joined {
            Ok((name, result)) => {
                self.outstanding.remove(&name);
                self.outcomes.push(RoutineOutcome { name, result });
            }
            Err(e) => {
                error!(exporter = %service, error = %e, "collector task did not complete");
            }
        }
    }

    /// Called at the deadline: keep routines that finished but were not
    /// joined yet, abort the others.
    async fn settle(
        &mut self,
        service: &str,
        tasks: &mut JoinSet<(String, ExporterResult<()>)>,
    ) {
        while let Some(joined) = tasks.try_join_next() {
            self.record(service, joined);
        }
        warn!(
            exporter = %service,
            pending = self.outstanding.len(),
            "scrape deadline reached, aborting collectors"
        );
        tasks.shutdown().await;
    }

    /// Outcomes so far; routines never joined count as timed out.
    fn finish(self) -> Vec<RoutineOutcome> {
        let mut outcomes = self.outcomes;
        outcomes.extend(self.outstanding.into_iter().map(|name| RoutineOutcome {
            name,
            result: Err(ExporterError::DeadlineExceeded),
        }));
        outcomes
    }
}

fn fq_name(prefix: &str, service: &str, name: &str) -> String {
    if prefix.is_empty() {
        format!("{service}_{name}")
    } else {
        format!("{prefix}_{service}_{name}")
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
