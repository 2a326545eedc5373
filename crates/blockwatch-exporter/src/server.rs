//! HTTP surface: the Prometheus scrape endpoint.
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | GET | `/metrics` | Run one scrape, Prometheus exposition |
//! | GET | `/` | Index page |

use std::sync::Arc;

use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse};
use axum::routing::get;

use crate::exposition::CONTENT_TYPE;
use crate::scraper::Scraper;

/// Build the exporter router.
pub fn build_router(scraper: Arc<Scraper>) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/metrics", get(prometheus_metrics))
        .with_state(scraper)
}

/// GET /metrics
pub async fn prometheus_metrics(State(scraper): State<Arc<Scraper>>) -> impl IntoResponse {
    // Failed collectors are reported in the body, the scrape itself succeeds.
    let scrape = scraper.scrape().await;
    (StatusCode::OK, [("content-type", CONTENT_TYPE)], scrape.body)
}

/// GET /
pub async fn index() -> Html<&'static str> {
    Html(
        "<html><head><title>blockwatch</title></head><body>\
         <h1>blockwatch</h1><p><a href=\"/metrics\">Metrics</a></p>\
         </body></html>",
    )
}
