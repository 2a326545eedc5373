//! Cinder (block storage) exporter.
//!
//! Routines and the metrics they emit:
//!
//! - `list_volumes`: `volumes`, `volume_status{id, name, status, bootable, tenant_id, size, volume_type}`
//! - `list_snapshots`: `snapshots`
//! - `list_agent_state`: `agent_state{hostname, service, adminState, zone}`
//! - `list_limits`: `limits_max{tenant}`, `limits_used{tenant}`

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use blockwatch_cloud::{
    ListOptions, Project, QuotaSet, QuotaUsageSet, ResourceApi, ResourceKind, ServiceRecord,
    ServiceType, Snapshot, Volume, get_as, list,
};
use blockwatch_core::EndpointOptions;

use crate::endpoint::{IDENTITY_SERVICE, resolve_endpoint};
use crate::error::ExporterResult;
use crate::registry::{Emission, Exporter, ExporterContext};
use crate::sample::SampleSink;
use crate::status::VOLUME_STATUS;

/// Logical service name, also the key of its endpoint options.
pub const CINDER_SERVICE: &str = "cinder";

/// Build the Cinder exporter. `client` must be bound to the block storage
/// endpoint.
pub fn new_cinder_exporter(
    prefix: &str,
    client: Arc<dyn ResourceApi>,
    endpoints: HashMap<String, EndpointOptions>,
    disabled_metrics: &[String],
) -> ExporterResult<Exporter> {
    let mut exporter = Exporter::new(CINDER_SERVICE, prefix, client, endpoints, disabled_metrics);

    exporter.add_metric(
        "volumes",
        Emission::Routine(|ctx, sink| Box::pin(list_volumes(ctx, sink))),
        &[],
        "Number of volumes across all projects.",
    )?;
    exporter.add_metric(
        "snapshots",
        Emission::Routine(|ctx, sink| Box::pin(list_snapshots(ctx, sink))),
        &[],
        "Number of volume snapshots across all projects.",
    )?;
    exporter.add_metric(
        "agent_state",
        Emission::Routine(|ctx, sink| Box::pin(list_agent_state(ctx, sink))),
        &["hostname", "service", "adminState", "zone"],
        "Whether a Cinder service reports itself up (1) or down (0).",
    )?;
    exporter.add_metric(
        "volume_status",
        Emission::Sibling("volumes"),
        &["id", "name", "status", "bootable", "tenant_id", "size", "volume_type"],
        "Volume status as an ordinal code, -1 if the status is unknown.",
    )?;
    exporter.add_metric(
        "limits_max",
        Emission::Routine(|ctx, sink| Box::pin(list_limits(ctx, sink))),
        &["tenant"],
        "Block storage quota in GiB per project.",
    )?;
    exporter.add_metric(
        "limits_used",
        Emission::Sibling("limits_max"),
        &["tenant"],
        "Block storage in use in GiB per project.",
    )?;

    Ok(exporter)
}

async fn list_volumes(ctx: Arc<ExporterContext>, sink: SampleSink) -> ExporterResult<()> {
    let volumes: Vec<Volume> = list(ctx.client(), ResourceKind::Volumes, ListOptions::all_tenants())
        .extract()
        .await?;

    if let Some(desc) = ctx.metric("volumes") {
        sink.gauge(desc, volumes.len() as f64, &[])?;
    }

    if let Some(desc) = ctx.metric("volume_status") {
        for volume in &volumes {
            let size = volume.size.to_string();
            sink.gauge(
                desc,
                f64::from(VOLUME_STATUS.ordinal(&volume.status)),
                &[
                    &volume.id,
                    &volume.name,
                    &volume.status,
                    &volume.bootable,
                    &volume.tenant.tenant_id,
                    &size,
                    &volume.volume_type,
                ],
            )?;
        }
    }

    Ok(())
}

async fn list_snapshots(ctx: Arc<ExporterContext>, sink: SampleSink) -> ExporterResult<()> {
    let snapshots: Vec<Snapshot> =
        list(ctx.client(), ResourceKind::Snapshots, ListOptions::all_tenants())
            .extract()
            .await?;

    if let Some(desc) = ctx.metric("snapshots") {
        sink.gauge(desc, snapshots.len() as f64, &[])?;
    }
    Ok(())
}

async fn list_agent_state(ctx: Arc<ExporterContext>, sink: SampleSink) -> ExporterResult<()> {
    let services: Vec<ServiceRecord> =
        list(ctx.client(), ResourceKind::Services, ListOptions::default())
            .extract()
            .await?;

    let Some(desc) = ctx.metric("agent_state") else {
        return Ok(());
    };
    for service in &services {
        // Exact match: "Up" is not up.
        let state = if service.state == "up" { 1.0 } else { 0.0 };
        sink.counter(
            desc,
            state,
            &[&service.host, &service.binary, &service.status, &service.zone],
        )?;
    }
    Ok(())
}

/// Quota ceiling and usage per project. Projects are listed through an
/// identity client sharing the primary client's session; the first failed
/// project lookup ends the routine.
async fn list_limits(ctx: Arc<ExporterContext>, sink: SampleSink) -> ExporterResult<()> {
    let options = identity_options(ctx.endpoints(), ctx.service())?;
    let identity = ctx.client().scoped(ServiceType::Identity, &options)?;

    let projects: Vec<Project> =
        list(identity.as_ref(), ResourceKind::Projects, ListOptions::default())
            .extract()
            .await?;
    debug!(projects = projects.len(), "collecting quota limits");

    for project in &projects {
        let quota: QuotaSet = get_as(ctx.client(), ResourceKind::QuotaSet, &project.id).await?;
        let usage: QuotaUsageSet =
            get_as(ctx.client(), ResourceKind::QuotaUsage, &project.id).await?;

        if let Some(desc) = ctx.metric("limits_max") {
            sink.gauge(desc, quota.gigabytes as f64, &[&project.name])?;
        }
        if let Some(desc) = ctx.metric("limits_used") {
            sink.gauge(desc, usage.gigabytes.in_use as f64, &[&project.name])?;
        }
    }
    Ok(())
}

/// Options for the identity client. When only the service's own options
/// exist, just their region and interface carry over: an explicit URL
/// there points at the service, and identity is located in the catalog.
fn identity_options(
    endpoints: &HashMap<String, EndpointOptions>,
    service: &str,
) -> ExporterResult<EndpointOptions> {
    let mut options = resolve_endpoint(endpoints, IDENTITY_SERVICE, service)?.clone();
    if !endpoints.contains_key(IDENTITY_SERVICE) {
        options.url = None;
    }
    Ok(options)
}
