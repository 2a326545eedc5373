//! Keystone v3 session: password authentication and the service catalog.
//!
//! One `Session` is shared (via `Arc`) by every client built from it, so
//! clients for different services reuse the same token. A rejected token
//! is replaced in place by [`Session::reauthenticate`].

use std::sync::Arc;

use reqwest::Url;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::RwLock;
use tracing::{debug, info};

use blockwatch_core::{CloudConfig, EndpointOptions};

use crate::client::HttpApi;
use crate::error::{CloudError, CloudResult};
use crate::resource::ServiceType;

const USER_AGENT: &str = "blockwatch/0.1";

/// A catalog entry from the token response.
#[derive(Debug, Clone, Deserialize)]
pub struct CatalogEntry {
    #[serde(rename = "type")]
    pub service_type: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub endpoints: Vec<CatalogEndpoint>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CatalogEndpoint {
    pub interface: String,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub region_id: Option<String>,
    pub url: String,
}

#[derive(Deserialize)]
struct TokenResponse {
    token: TokenBody,
}

#[derive(Deserialize)]
struct TokenBody {
    #[serde(default)]
    catalog: Vec<CatalogEntry>,
}

/// An authenticated Keystone session.
pub struct Session {
    http: reqwest::Client,
    credentials: CloudConfig,
    auth_url: Url,
    token: RwLock<String>,
    catalog: Vec<CatalogEntry>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("auth_url", &self.auth_url.as_str())
            .field("services", &self.catalog.len())
            .finish_non_exhaustive()
    }
}

impl Session {
    /// Authenticate with the password method and load the service catalog.
    pub async fn authenticate(credentials: &CloudConfig) -> CloudResult<Arc<Self>> {
        let http = reqwest::Client::builder().user_agent(USER_AGENT).build()?;
        let auth_url = base_url(&credentials.auth_url)?;
        let (token, catalog) = issue_token(&http, &auth_url, credentials).await?;

        info!(
            auth_url = %auth_url,
            services = catalog.len(),
            "authenticated against identity service"
        );

        Ok(Arc::new(Self {
            http,
            credentials: credentials.clone(),
            auth_url,
            token: RwLock::new(token),
            catalog,
        }))
    }

    /// Replace `rejected` with a freshly issued token.
    ///
    /// Renewal happens under the write lock. Callers that were rejected
    /// with the same token queue behind the first one and find the token
    /// already replaced, so one expiry costs one login.
    pub async fn reauthenticate(&self, rejected: &str) -> CloudResult<()> {
        let mut token = self.token.write().await;
        if *token != rejected {
            debug!("identity token already renewed");
            return Ok(());
        }
        let (fresh, _) = issue_token(&self.http, &self.auth_url, &self.credentials).await?;
        *token = fresh;
        info!("identity token renewed");
        Ok(())
    }

    pub(crate) async fn token(&self) -> String {
        self.token.read().await.clone()
    }

    pub(crate) fn http(&self) -> &reqwest::Client {
        &self.http
    }

    pub fn catalog(&self) -> &[CatalogEntry] {
        &self.catalog
    }

    /// Locate the base URL of `service`.
    ///
    /// An explicit `url` wins; otherwise the catalog is searched by service
    /// type, interface and region, with unset options inheriting the
    /// `[cloud]` defaults. Identity falls back to the auth URL.
    pub fn endpoint_for(
        &self,
        service: ServiceType,
        options: &EndpointOptions,
    ) -> CloudResult<Url> {
        if let Some(url) = &options.url {
            return base_url(url);
        }

        let interface = options.interface.unwrap_or(self.credentials.interface);
        let region = options
            .region
            .as_deref()
            .or(self.credentials.region.as_deref());

        for service_type in service.catalog_types() {
            let endpoint = self
                .catalog
                .iter()
                .filter(|entry| entry.service_type == *service_type)
                .flat_map(|entry| entry.endpoints.iter())
                .find(|ep| {
                    ep.interface == interface.as_str()
                        && region.is_none_or(|r| {
                            ep.region_id.as_deref() == Some(r) || ep.region.as_deref() == Some(r)
                        })
                });
            if let Some(ep) = endpoint {
                return base_url(&ep.url);
            }
        }

        if service == ServiceType::Identity {
            return Ok(self.auth_url.clone());
        }

        Err(CloudError::Endpoint {
            service: service.as_str().to_string(),
            detail: format!(
                "interface={} region={}",
                interface.as_str(),
                region.unwrap_or("*")
            ),
        })
    }

    /// Build a client for `service` that shares this session's token.
    pub fn client_for(
        self: &Arc<Self>,
        service: ServiceType,
        options: &EndpointOptions,
    ) -> CloudResult<HttpApi> {
        let endpoint = self.endpoint_for(service, options)?;
        debug!(service = service.as_str(), %endpoint, "client endpoint resolved");
        Ok(HttpApi::new(Arc::clone(self), service, endpoint))
    }
}

async fn issue_token(
    http: &reqwest::Client,
    auth_url: &Url,
    credentials: &CloudConfig,
) -> CloudResult<(String, Vec<CatalogEntry>)> {
    let url = auth_url
        .join("auth/tokens")
        .map_err(|e| CloudError::Url(e.to_string()))?;

    let mut auth = json!({
        "identity": {
            "methods": ["password"],
            "password": {
                "user": {
                    "name": credentials.username,
                    "domain": { "name": credentials.user_domain_name },
                    "password": credentials.password,
                }
            }
        }
    });
    if !credentials.project_name.is_empty() {
        auth["scope"] = json!({
            "project": {
                "name": credentials.project_name,
                "domain": { "name": credentials.project_domain_name },
            }
        });
    }

    let response = http
        .post(url)
        .json(&json!({ "auth": auth }))
        .send()
        .await?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(CloudError::Auth(format!("{status}: {body}")));
    }

    let token = response
        .headers()
        .get("x-subject-token")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .ok_or_else(|| CloudError::Auth("response carried no X-Subject-Token".to_string()))?;

    let body: TokenResponse = response.json().await?;
    Ok((token, body.token.catalog))
}

/// Parse `url`, guaranteeing a trailing slash so relative joins append.
pub(crate) fn base_url(url: &str) -> CloudResult<Url> {
    let mut url = Url::parse(url).map_err(|e| CloudError::Url(format!("{url}: {e}")))?;
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
}
