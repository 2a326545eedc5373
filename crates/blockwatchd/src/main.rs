//! blockwatchd — the blockwatch daemon.
//!
//! Authenticates against Keystone, builds the Cinder exporter from the
//! configuration, and serves `/metrics` for Prometheus.
//!
//! # Usage
//!
//! ```text
//! blockwatchd serve --config /etc/blockwatch/blockwatch.toml
//! blockwatchd metrics --config /etc/blockwatch/blockwatch.toml
//! ```

use std::fmt::Write;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use clap::{Parser, Subcommand};
use serde_json::Value;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use blockwatch_cloud::{
    CloudError, CloudResult, ListOptions, Page, ResourceApi, ResourceKind, ServiceType, Session,
};
use blockwatch_core::{BlockwatchConfig, EndpointOptions};
use blockwatch_exporter::{
    CINDER_SERVICE, Emission, Exporter, Scraper, build_router, new_cinder_exporter,
};

const DEFAULT_LOG_FILTER: &str = "info,blockwatchd=debug,blockwatch=debug";

#[derive(Parser)]
#[command(name = "blockwatchd", about = "OpenStack block storage exporter for Prometheus")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Serve the Prometheus scrape endpoint.
    Serve {
        /// Path to the configuration file.
        #[arg(long, short)]
        config: PathBuf,

        /// Listen address, overrides `exporter.listen`.
        #[arg(long)]
        listen: Option<SocketAddr>,

        /// Emit logs as JSON lines.
        #[arg(long)]
        log_json: bool,
    },
    /// Print the metrics the configuration enables, without contacting the cloud.
    Metrics {
        /// Path to the configuration file.
        #[arg(long, short)]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Serve {
            config,
            listen,
            log_json,
        } => {
            init_tracing(log_json);
            run_serve(&config, listen).await
        }
        Command::Metrics { config } => {
            let config = load_config(&config)?;
            let exporter = new_cinder_exporter(
                &config.exporter.prefix,
                Arc::new(Offline),
                config.endpoints.clone(),
                &config.exporter.disabled_metrics,
            )?;
            print!("{}", describe(&exporter));
            Ok(())
        }
    }
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn load_config(path: &Path) -> anyhow::Result<BlockwatchConfig> {
    let config = BlockwatchConfig::from_file(path)
        .with_context(|| format!("failed to load {}", path.display()))?;
    config
        .validate()
        .with_context(|| format!("invalid configuration in {}", path.display()))?;
    Ok(config)
}

async fn run_serve(config_path: &Path, listen: Option<SocketAddr>) -> anyhow::Result<()> {
    info!(config = %config_path.display(), "blockwatch daemon starting");

    let config = load_config(config_path)?;
    let addr = match listen {
        Some(addr) => addr,
        None => config.exporter.listen_addr()?,
    };
    let timeout = config.exporter.scrape_timeout()?;

    // ── Cloud session ──────────────────────────────────────────

    let session = Session::authenticate(&config.cloud)
        .await
        .context("keystone authentication failed")?;
    info!(auth_url = %config.cloud.auth_url, "authenticated");

    let options = config
        .endpoints
        .get(CINDER_SERVICE)
        .cloned()
        .unwrap_or_default();
    let client = session
        .client_for(ServiceType::BlockStorage, &options)
        .context("no block storage endpoint")?;
    info!(endpoint = %client.endpoint(), "block storage client ready");

    // ── Exporter ───────────────────────────────────────────────

    let exporter = new_cinder_exporter(
        &config.exporter.prefix,
        Arc::new(client),
        config.endpoints.clone(),
        &config.exporter.disabled_metrics,
    )?;
    info!(
        metrics = exporter.enabled_metrics().count(),
        timeout_ms = timeout.as_millis() as u64,
        "cinder exporter initialized"
    );
    let scraper = Arc::new(Scraper::new(vec![exporter], timeout));

    // ── HTTP server ────────────────────────────────────────────

    let router = build_router(scraper);
    info!(%addr, "metrics server starting");
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("blockwatch daemon stopped");
    Ok(())
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("shutdown signal received"),
        Err(e) => {
            error!(error = %e, "failed to install CTRL+C handler");
            std::future::pending::<()>().await;
        }
    }
}

/// One line per enabled metric: exposed name, labels, and the routine
/// that emits it when it is not its own.
fn describe(exporter: &Exporter) -> String {
    let mut out = String::new();
    for decl in exporter.enabled_metrics() {
        let _ = write!(out, "{}", decl.desc.fq_name);
        if !decl.desc.labels.is_empty() {
            let _ = write!(out, "{{{}}}", decl.desc.labels.join(", "));
        }
        if let Emission::Sibling(owner) = decl.emission {
            let _ = write!(out, " (emitted by {owner})");
        }
        out.push('\n');
    }
    out
}

/// Client for commands that never collect.
struct Offline;

#[async_trait]
impl ResourceApi for Offline {
    async fn fetch_page(
        &self,
        kind: ResourceKind,
        _options: &ListOptions,
        _marker: Option<&str>,
    ) -> CloudResult<Page> {
        Err(offline(kind.service()))
    }

    async fn get(&self, kind: ResourceKind, _id: &str) -> CloudResult<Value> {
        Err(offline(kind.service()))
    }

    fn scoped(
        &self,
        service: ServiceType,
        _options: &EndpointOptions,
    ) -> CloudResult<Arc<dyn ResourceApi>> {
        Err(offline(service))
    }
}

fn offline(service: ServiceType) -> CloudError {
    CloudError::Endpoint {
        service: service.as_str().to_string(),
        detail: "not connected".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn exporter(disabled: &[&str]) -> Exporter {
        let disabled: Vec<String> = disabled.iter().map(|s| s.to_string()).collect();
        new_cinder_exporter("openstack", Arc::new(Offline), HashMap::new(), &disabled).unwrap()
    }

    #[test]
    fn cli_parses_serve() {
        let cli = Cli::try_parse_from([
            "blockwatchd",
            "serve",
            "--config",
            "/etc/blockwatch.toml",
            "--listen",
            "127.0.0.1:9999",
            "--log-json",
        ])
        .unwrap();
        match cli.command {
            Command::Serve {
                config,
                listen,
                log_json,
            } => {
                assert_eq!(config, PathBuf::from("/etc/blockwatch.toml"));
                assert_eq!(listen, Some("127.0.0.1:9999".parse().unwrap()));
                assert!(log_json);
            }
            Command::Metrics { .. } => panic!("expected serve"),
        }
    }

    #[test]
    fn cli_requires_config() {
        assert!(Cli::try_parse_from(["blockwatchd", "metrics"]).is_err());
    }

    #[test]
    fn describe_lists_enabled_metrics() {
        let text = describe(&exporter(&["cinder-agent_state", "snapshots"]));
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(
            lines,
            [
                "openstack_cinder_volumes",
                "openstack_cinder_volume_status{id, name, status, bootable, tenant_id, size, volume_type} (emitted by volumes)",
                "openstack_cinder_limits_max{tenant}",
                "openstack_cinder_limits_used{tenant} (emitted by limits_max)",
            ]
        );
    }

    #[tokio::test]
    async fn offline_client_refuses_requests() {
        let err = Offline
            .fetch_page(ResourceKind::Volumes, &ListOptions::all_tenants(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, CloudError::Endpoint { .. }));
        assert!(Offline
            .scoped(ServiceType::Identity, &EndpointOptions::default())
            .is_err());
    }

    #[test]
    fn load_config_rejects_invalid_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(
            &path,
            "[exporter]\nprefix = \"bad prefix\"\n[cloud]\nauth_url = \"http://k\"\nusername = \"u\"\n",
        )
        .unwrap();
        let err = load_config(&path).unwrap_err();
        assert!(format!("{err:#}").contains("invalid configuration"));
    }

    #[test]
    fn load_config_reports_missing_file() {
        let err = load_config(Path::new("/nonexistent/blockwatch.toml")).unwrap_err();
        assert!(err.to_string().contains("failed to load"));
    }
}
