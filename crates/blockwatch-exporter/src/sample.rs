//! Samples and the channel they travel on.
//!
//! Collection routines write into a [`SampleSink`]; the scraper holds the
//! matching receiver and assembles the response once every routine of the
//! scrape has returned. The channel is unbounded, so writes never wait.

use tokio::sync::mpsc;
use tracing::trace;

use crate::error::{ExporterError, ExporterResult};

/// Prometheus value type of a sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    Gauge,
    Counter,
}

impl ValueKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValueKind::Gauge => "gauge",
            ValueKind::Counter => "counter",
        }
    }
}

/// Describes one enabled metric: its exposed name and label schema.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricDesc {
    /// Name as declared in the exporter (`volume_status`).
    pub name: String,
    /// Exposed name (`openstack_cinder_volume_status`).
    pub fq_name: String,
    pub help: String,
    pub labels: Vec<String>,
}

/// A single data point.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    /// Exposed metric name.
    pub metric: String,
    pub kind: ValueKind,
    pub value: f64,
    /// Label values, positionally matching the metric's label schema.
    pub labels: Vec<String>,
}

/// Write side of a scrape's sample channel.
#[derive(Debug, Clone)]
pub struct SampleSink {
    tx: mpsc::UnboundedSender<Sample>,
}

/// Create a sink and the receiver that collects from it.
pub fn sample_channel() -> (SampleSink, mpsc::UnboundedReceiver<Sample>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (SampleSink { tx }, rx)
}

impl SampleSink {
    /// Emit one sample for `desc`.
    ///
    /// Fails if the label count differs from the schema, or if the
    /// receiving side is gone.
    pub fn emit(
        &self,
        desc: &MetricDesc,
        kind: ValueKind,
        value: f64,
        labels: &[&str],
    ) -> ExporterResult<()> {
        if labels.len() != desc.labels.len() {
            return Err(ExporterError::LabelMismatch {
                metric: desc.fq_name.clone(),
                expected: desc.labels.len(),
                got: labels.len(),
            });
        }

        trace!(metric = %desc.fq_name, value, "sample");
        self.tx
            .send(Sample {
                metric: desc.fq_name.clone(),
                kind,
                value,
                labels: labels.iter().map(|l| l.to_string()).collect(),
            })
            .map_err(|_| ExporterError::SinkClosed(desc.fq_name.clone()))
    }

    pub fn gauge(&self, desc: &MetricDesc, value: f64, labels: &[&str]) -> ExporterResult<()> {
        self.emit(desc, ValueKind::Gauge, value, labels)
    }

    pub fn counter(&self, desc: &MetricDesc, value: f64, labels: &[&str]) -> ExporterResult<()> {
        self.emit(desc, ValueKind::Counter, value, labels)
    }
}
