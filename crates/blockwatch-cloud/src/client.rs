//! HTTP implementation of [`ResourceApi`].

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::{StatusCode, Url};
use serde_json::Value;
use tracing::{debug, warn};

use blockwatch_core::EndpointOptions;

use crate::auth::Session;
use crate::error::{CloudError, CloudResult};
use crate::resource::{ListOptions, Page, ResourceApi, ResourceKind, ServiceType};

/// Longest error body kept in `CloudError::Status`.
const MAX_ERROR_BODY: usize = 512;

/// Client for one service endpoint, sharing an authenticated [`Session`].
#[derive(Debug, Clone)]
pub struct HttpApi {
    session: Arc<Session>,
    service: ServiceType,
    endpoint: Url,
}

impl HttpApi {
    pub fn new(session: Arc<Session>, service: ServiceType, endpoint: Url) -> Self {
        Self {
            session,
            service,
            endpoint,
        }
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    pub fn service(&self) -> ServiceType {
        self.service
    }

    fn url_for(&self, path: &str) -> CloudResult<Url> {
        self.endpoint
            .join(path)
            .map_err(|e| CloudError::Url(format!("{path}: {e}")))
    }

    /// GET `url` as JSON, renewing the token once if it was rejected.
    async fn get_json(&self, url: Url) -> CloudResult<Value> {
        let token = self.session.token().await;
        let mut response = self.send(&url, &token).await?;
        if response.status() == StatusCode::UNAUTHORIZED {
            debug!(%url, "token rejected, re-authenticating");
            self.session.reauthenticate(&token).await?;
            let token = self.session.token().await;
            response = self.send(&url, &token).await?;
        }

        let status = response.status();
        if !status.is_success() {
            let mut message = response.text().await.unwrap_or_default();
            if message.len() > MAX_ERROR_BODY {
                let mut cut = MAX_ERROR_BODY;
                while !message.is_char_boundary(cut) {
                    cut -= 1;
                }
                message.truncate(cut);
            }
            warn!(%url, status = status.as_u16(), "cloud API request failed");
            return Err(CloudError::Status {
                status: status.as_u16(),
                url: url.to_string(),
                message,
            });
        }

        Ok(response.json().await?)
    }

    async fn send(&self, url: &Url, token: &str) -> CloudResult<reqwest::Response> {
        let response = self
            .session
            .http()
            .get(url.clone())
            .header("X-Auth-Token", token)
            .header("Accept", "application/json")
            .send()
            .await?;
        Ok(response)
    }
}

#[async_trait]
impl ResourceApi for HttpApi {
    async fn fetch_page(
        &self,
        kind: ResourceKind,
        options: &ListOptions,
        marker: Option<&str>,
    ) -> CloudResult<Page> {
        let url = match marker {
            Some(next) => Url::parse(next).map_err(|e| CloudError::Url(format!("{next}: {e}")))?,
            None => {
                let mut url = self.url_for(&kind.path(None))?;
                let query = options.query();
                if !query.is_empty() {
                    url.query_pairs_mut().extend_pairs(query);
                }
                url
            }
        };

        let body = self.get_json(url).await?;
        let items = body
            .get(kind.body_key())
            .and_then(Value::as_array)
            .cloned()
            .ok_or_else(|| {
                CloudError::Decode(format!("response has no {:?} array", kind.body_key()))
            })?;

        Ok(Page {
            next: next_marker(&body, kind),
            items,
        })
    }

    async fn get(&self, kind: ResourceKind, id: &str) -> CloudResult<Value> {
        let mut url = self.url_for(&kind.path(Some(id)))?;
        if kind == ResourceKind::QuotaUsage {
            url.query_pairs_mut().append_pair("usage", "true");
        }

        let mut body = self.get_json(url).await?;
        body.get_mut(kind.body_key())
            .map(Value::take)
            .ok_or_else(|| CloudError::Decode(format!("response has no {:?}", kind.body_key())))
    }

    fn scoped(
        &self,
        service: ServiceType,
        options: &EndpointOptions,
    ) -> CloudResult<Arc<dyn ResourceApi>> {
        Ok(Arc::new(self.session.client_for(service, options)?))
    }
}

/// The `next` link of a listing, in either the Cinder
/// (`"<key>_links": [{"rel": "next", "href": ..}]`) or the Keystone
/// (`"links": {"next": ..}`) shape.
fn next_marker(body: &Value, kind: ResourceKind) -> Option<String> {
    let cinder = body
        .get(format!("{}_links", kind.body_key()))
        .and_then(Value::as_array)
        .and_then(|links| {
            links
                .iter()
                .find(|link| link.get("rel").and_then(Value::as_str) == Some("next"))
        })
        .and_then(|link| link.get("href"))
        .and_then(Value::as_str);

    let keystone = body
        .get("links")
        .and_then(|links| links.get("next"))
        .and_then(Value::as_str);

    cinder.or(keystone).map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::list;
    use crate::types::{QuotaUsageSet, Volume};
    use blockwatch_core::{CloudConfig, Interface};
    use serde_json::json;
    use wiremock::matchers::{header, method, path, query_param, query_param_is_missing};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn session(server: &MockServer) -> Arc<Session> {
        let uri = server.uri();
        Mock::given(method("POST"))
            .and(path("/v3/auth/tokens"))
            .respond_with(
                ResponseTemplate::new(201)
                    .insert_header("X-Subject-Token", "tok-1")
                    .set_body_json(json!({
                        "token": {
                            "catalog": [
                                {
                                    "type": "block-storage",
                                    "endpoints": [
                                        { "interface": "public", "url": format!("{uri}/volume/v3/p-1") }
                                    ]
                                },
                                {
                                    "type": "identity",
                                    "endpoints": [
                                        { "interface": "public", "url": format!("{uri}/identity/v3") }
                                    ]
                                }
                            ]
                        }
                    })),
            )
            .expect(1)
            .mount(server)
            .await;

        let credentials = CloudConfig {
            auth_url: format!("{uri}/v3"),
            username: "admin".to_string(),
            password: "secret".to_string(),
            project_name: "admin".to_string(),
            user_domain_name: "Default".to_string(),
            project_domain_name: "Default".to_string(),
            region: None,
            interface: Interface::Public,
        };
        Session::authenticate(&credentials).await.unwrap()
    }

    fn volume(id: &str) -> Value {
        json!({ "id": id, "name": id, "status": "available", "size": 1 })
    }

    #[tokio::test]
    async fn volumes_paginate_over_links() {
        let server = MockServer::start().await;
        let session = session(&server).await;
        let uri = server.uri();

        Mock::given(method("GET"))
            .and(path("/volume/v3/p-1/volumes/detail"))
            .and(query_param("all_tenants", "true"))
            .and(query_param_is_missing("marker"))
            .and(header("X-Auth-Token", "tok-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "volumes": [volume("v-1"), volume("v-2")],
                "volumes_links": [
                    { "rel": "next", "href": format!("{uri}/volume/v3/p-1/volumes/detail?all_tenants=true&marker=v-2") }
                ]
            })))
            .expect(1)
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/volume/v3/p-1/volumes/detail"))
            .and(query_param("marker", "v-2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "volumes": [volume("v-3")]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let api = session
            .client_for(ServiceType::BlockStorage, &EndpointOptions::default())
            .unwrap();
        let volumes: Vec<Volume> = list(&api, ResourceKind::Volumes, ListOptions::all_tenants())
            .extract()
            .await
            .unwrap();

        let ids: Vec<_> = volumes.iter().map(|v| v.id.as_str()).collect();
        assert_eq!(ids, ["v-1", "v-2", "v-3"]);
    }

    #[tokio::test]
    async fn scoped_identity_client_reuses_session() {
        let server = MockServer::start().await;
        let session = session(&server).await;

        Mock::given(method("GET"))
            .and(path("/identity/v3/projects"))
            .and(query_param_is_missing("all_tenants"))
            .and(header("X-Auth-Token", "tok-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "projects": [{ "id": "p-1", "name": "alpha" }],
                "links": { "next": null }
            })))
            .mount(&server)
            .await;

        let block = session
            .client_for(ServiceType::BlockStorage, &EndpointOptions::default())
            .unwrap();
        let identity = block
            .scoped(ServiceType::Identity, &EndpointOptions::default())
            .unwrap();

        let page = identity
            .fetch_page(ResourceKind::Projects, &ListOptions::default(), None)
            .await
            .unwrap();
        assert_eq!(page.items.len(), 1);
        assert_eq!(page.next, None);
        // `expect(1)` on the token mock verifies no second login on drop.
    }

    #[tokio::test]
    async fn quota_usage_is_unwrapped() {
        let server = MockServer::start().await;
        let session = session(&server).await;

        Mock::given(method("GET"))
            .and(path("/volume/v3/p-1/os-quota-sets/p-9"))
            .and(query_param("usage", "true"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "quota_set": { "id": "p-9", "gigabytes": { "in_use": 42, "limit": 100, "reserved": 0 } }
            })))
            .mount(&server)
            .await;

        let api = session
            .client_for(ServiceType::BlockStorage, &EndpointOptions::default())
            .unwrap();
        let usage: QuotaUsageSet =
            crate::resource::get_as(&api, ResourceKind::QuotaUsage, "p-9")
                .await
                .unwrap();
        assert_eq!(usage.gigabytes.in_use, 42);
    }

    #[tokio::test]
    async fn error_status_is_reported() {
        let server = MockServer::start().await;
        let session = session(&server).await;

        Mock::given(method("GET"))
            .and(path("/volume/v3/p-1/os-services"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let api = session
            .client_for(ServiceType::BlockStorage, &EndpointOptions::default())
            .unwrap();
        let err = api
            .fetch_page(ResourceKind::Services, &ListOptions::default(), None)
            .await
            .unwrap_err();
        match err {
            CloudError::Status {
                status, message, ..
            } => {
                assert_eq!(status, 500);
                assert_eq!(message, "boom");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn missing_collection_key_is_decode_error() {
        let server = MockServer::start().await;
        let session = session(&server).await;

        Mock::given(method("GET"))
            .and(path("/volume/v3/p-1/snapshots/detail"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "oops": [] })))
            .mount(&server)
            .await;

        let api = session
            .client_for(ServiceType::BlockStorage, &EndpointOptions::default())
            .unwrap();
        let err = api
            .fetch_page(ResourceKind::Snapshots, &ListOptions::default(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, CloudError::Decode(_)));
    }

    /// Keystone issues `tok-old`, then exactly one `tok-new`; the block
    /// storage API rejects `tok-old`.
    async fn expiring_session(server: &MockServer) -> Arc<Session> {
        let uri = server.uri();
        let catalog = json!({
            "token": {
                "catalog": [{
                    "type": "volumev3",
                    "endpoints": [{ "interface": "public", "url": format!("{uri}/volume/v3/p-1") }]
                }]
            }
        });

        Mock::given(method("POST"))
            .and(path("/v3/auth/tokens"))
            .respond_with(
                ResponseTemplate::new(201)
                    .insert_header("X-Subject-Token", "tok-old")
                    .set_body_json(catalog.clone()),
            )
            .up_to_n_times(1)
            .mount(server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v3/auth/tokens"))
            .respond_with(
                ResponseTemplate::new(201)
                    .insert_header("X-Subject-Token", "tok-new")
                    .set_body_json(catalog),
            )
            .expect(1)
            .mount(server)
            .await;

        Mock::given(method("GET"))
            .and(path("/volume/v3/p-1/os-services"))
            .and(header("X-Auth-Token", "tok-old"))
            .respond_with(ResponseTemplate::new(401))
            .mount(server)
            .await;
        Mock::given(method("GET"))
            .and(path("/volume/v3/p-1/os-services"))
            .and(header("X-Auth-Token", "tok-new"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "services": [] })))
            .mount(server)
            .await;

        let credentials = CloudConfig {
            auth_url: format!("{uri}/v3"),
            username: "admin".to_string(),
            password: "secret".to_string(),
            project_name: String::new(),
            user_domain_name: "Default".to_string(),
            project_domain_name: "Default".to_string(),
            region: None,
            interface: Interface::Public,
        };
        Session::authenticate(&credentials).await.unwrap()
    }

    #[tokio::test]
    async fn rejected_token_is_renewed_once() {
        let server = MockServer::start().await;
        let session = expiring_session(&server).await;
        let api = session
            .client_for(ServiceType::BlockStorage, &EndpointOptions::default())
            .unwrap();

        let page = api
            .fetch_page(ResourceKind::Services, &ListOptions::default(), None)
            .await
            .unwrap();
        assert!(page.items.is_empty());
        assert_eq!(session.token().await, "tok-new");
    }

    #[tokio::test]
    async fn concurrent_rejections_share_one_renewal() {
        let server = MockServer::start().await;
        let session = expiring_session(&server).await;
        let api = session
            .client_for(ServiceType::BlockStorage, &EndpointOptions::default())
            .unwrap();

        let options = ListOptions::default();
        let (a, b, c) = tokio::join!(
            api.fetch_page(ResourceKind::Services, &options, None),
            api.fetch_page(ResourceKind::Services, &options, None),
            api.fetch_page(ResourceKind::Services, &options, None),
        );
        assert!(a.is_ok() && b.is_ok() && c.is_ok());
        // The `expect(1)` on the tok-new login is checked when the server drops.
    }

    #[test]
    fn next_marker_shapes() {
        let cinder = json!({
            "snapshots": [],
            "snapshots_links": [{ "rel": "next", "href": "http://c/next" }]
        });
        assert_eq!(
            next_marker(&cinder, ResourceKind::Snapshots).as_deref(),
            Some("http://c/next")
        );

        let keystone = json!({ "projects": [], "links": { "next": "http://k/next", "self": "x" } });
        assert_eq!(
            next_marker(&keystone, ResourceKind::Projects).as_deref(),
            Some("http://k/next")
        );

        let last = json!({ "projects": [], "links": { "next": null } });
        assert_eq!(next_marker(&last, ResourceKind::Projects), None);
    }
}
