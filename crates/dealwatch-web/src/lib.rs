//! Axum JSON API over the latest product generation + manual ingest trigger.

use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use dealwatch_core::ProductSnapshot;
use dealwatch_ingest::IngestPipeline;
use dealwatch_storage::SnapshotStore;
use serde::Deserialize;
use serde_json::json;
use tokio::net::TcpListener;
use tracing::{info, warn};

pub const CRATE_NAME: &str = "dealwatch-web";

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn SnapshotStore>,
    pub pipeline: IngestPipeline,
}

impl AppState {
    pub fn new(store: Arc<dyn SnapshotStore>, pipeline: IngestPipeline) -> Self {
        Self { store, pipeline }
    }
}

#[derive(Debug, Deserialize, Default)]
struct ProductsQuery {
    sort: Option<String>,
    rocket_only: Option<bool>,
    free_shipping_only: Option<bool>,
    page: Option<usize>,
    per_page: Option<usize>,
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/products", get(products_handler))
        .route("/ingest/run", post(ingest_run_handler))
        .route("/healthz", get(healthz_handler))
        .with_state(Arc::new(state))
}

pub async fn serve_from_env(state: AppState) -> anyhow::Result<()> {
    let port: u16 = std::env::var("DEALWATCH_WEB_PORT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(8000);
    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    info!(port, "web listener up");
    axum::serve(listener, app(state)).await?;
    Ok(())
}

async fn healthz_handler() -> &'static str {
    "ok"
}

async fn products_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ProductsQuery>,
) -> Response {
    let rows = match state.store.latest_snapshots().await {
        Ok(rows) => rows,
        Err(err) => return server_error(err.to_string()),
    };
    let (page_rows, generation, page, total_pages, total) = filtered_page(rows, &query);

    Json(json!({
        "generation": generation,
        "total": total,
        "page": page,
        "total_pages": total_pages,
        "products": page_rows,
    }))
    .into_response()
}

async fn ingest_run_handler(State(state): State<Arc<AppState>>) -> Response {
    match state.pipeline.run_once().await {
        Ok(summary) => {
            info!(run_id = %summary.run_id, generation = summary.generation, "manual ingest complete");
            Json(summary).into_response()
        }
        Err(err) => {
            warn!(error = %err, "manual ingest failed");
            (
                StatusCode::BAD_GATEWAY,
                Json(json!({ "error": err.to_string() })),
            )
                .into_response()
        }
    }
}

fn server_error(message: String) -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "error": message })),
    )
        .into_response()
}

fn filtered_page(
    rows: Vec<ProductSnapshot>,
    query: &ProductsQuery,
) -> (Vec<ProductSnapshot>, Option<i64>, usize, usize, usize) {
    let generation = rows.first().map(|r| r.generation);

    let mut filtered = rows
        .into_iter()
        .filter(|r| !query.rocket_only.unwrap_or(false) || r.is_rocket)
        .filter(|r| !query.free_shipping_only.unwrap_or(false) || r.is_free_shipping)
        .collect::<Vec<_>>();

    match query.sort.as_deref() {
        // biggest price drops first
        Some("gap") => filtered.sort_by(|a, b| a.price_gap.total_cmp(&b.price_gap)),
        Some("price") => filtered.sort_by_key(|r| r.product_price),
        // "recent" and anything else keep the store's newest-write-first order
        _ => {}
    }

    let total = filtered.len();
    let per_page = query.per_page.unwrap_or(20).max(1);
    let total_pages = total.max(1).div_ceil(per_page);
    let page = query.page.unwrap_or(1).clamp(1, total_pages);
    let start = (page - 1) * per_page;
    let page_rows = filtered
        .into_iter()
        .skip(start)
        .take(per_page)
        .collect::<Vec<_>>();

    (page_rows, generation, page, total_pages, total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::body::Body;
    use chrono::{TimeZone, Utc};
    use dealwatch_core::ProductRecord;
    use dealwatch_ingest::ProductSource;
    use dealwatch_storage::SqliteStore;
    use http_body_util::BodyExt;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use tower::ServiceExt;

    struct ScriptedSource {
        batches: Mutex<VecDeque<Vec<ProductRecord>>>,
    }

    #[async_trait]
    impl ProductSource for ScriptedSource {
        async fn fetch_batch(&self) -> anyhow::Result<Vec<ProductRecord>> {
            self.batches
                .lock()
                .expect("lock")
                .pop_front()
                .ok_or_else(|| anyhow::anyhow!("partner unavailable"))
        }
    }

    fn snapshot(product_id: i64, price: i64, gap: f64, rocket: bool) -> ProductSnapshot {
        ProductSnapshot {
            product_id,
            product_name: format!("product {product_id}"),
            product_price: price,
            category_name: "Electronics".into(),
            is_rocket: rocket,
            is_free_shipping: false,
            product_image: String::new(),
            product_url: String::new(),
            price_gap: gap,
            generation: 0,
            inserted_at: Utc.with_ymd_and_hms(2026, 8, 29, 6, 0, 0).single().unwrap(),
        }
    }

    async fn state_with(
        snapshots: Vec<ProductSnapshot>,
        batches: Vec<Vec<ProductRecord>>,
    ) -> AppState {
        let store = SqliteStore::in_memory().await.expect("store");
        store.migrate().await.expect("migrate");
        for snapshot in &snapshots {
            store.upsert_snapshot(snapshot).await.expect("seed");
        }
        let store = Arc::new(store);
        let pipeline = IngestPipeline::new(
            store.clone(),
            Arc::new(ScriptedSource {
                batches: Mutex::new(batches.into()),
            }),
        );
        AppState::new(store, pipeline)
    }

    async fn get_json(app: Router, uri: &str) -> (StatusCode, serde_json::Value) {
        let resp = app
            .oneshot(
                axum::http::Request::builder()
                    .uri(uri)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = resp.status();
        let body = resp.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&body).unwrap())
    }

    #[tokio::test]
    async fn healthz_is_ok() {
        let app = app(state_with(vec![], vec![]).await);
        let resp = app
            .oneshot(
                axum::http::Request::builder()
                    .uri("/healthz")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn products_lists_latest_generation_sorted_by_gap() {
        let app = app(
            state_with(
                vec![
                    snapshot(1, 100, 5.0, false),
                    snapshot(2, 200, -30.0, true),
                    snapshot(3, 300, 0.0, false),
                ],
                vec![],
            )
            .await,
        );

        let (status, body) = get_json(app, "/products?sort=gap").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["total"], 3);
        assert_eq!(body["generation"], 0);
        let products = body["products"].as_array().unwrap();
        assert_eq!(products[0]["product_id"], 2);
        assert_eq!(products[0]["price_gap"], -30.0);
        assert_eq!(products[2]["product_id"], 1);
    }

    #[tokio::test]
    async fn products_filters_and_paginates() {
        let app = app(
            state_with(
                vec![
                    snapshot(1, 100, 0.0, true),
                    snapshot(2, 200, 0.0, false),
                    snapshot(3, 300, 0.0, true),
                ],
                vec![],
            )
            .await,
        );

        let (status, body) =
            get_json(app, "/products?rocket_only=true&per_page=1&page=2&sort=price").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["total"], 2);
        assert_eq!(body["total_pages"], 2);
        let products = body["products"].as_array().unwrap();
        assert_eq!(products.len(), 1);
        assert_eq!(products[0]["product_id"], 3);
    }

    #[tokio::test]
    async fn manual_trigger_runs_the_pipeline() {
        let state = state_with(
            vec![],
            vec![vec![ProductRecord {
                product_id: 1,
                product_name: "USB-C Hub".into(),
                product_price: 25900,
                category_name: "Electronics".into(),
                is_rocket: true,
                is_free_shipping: false,
                product_image: String::new(),
                product_url: String::new(),
            }]],
        )
        .await;
        let app = app(state);

        let resp = app
            .clone()
            .oneshot(
                axum::http::Request::builder()
                    .method("POST")
                    .uri("/ingest/run")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = resp.into_body().collect().await.unwrap().to_bytes();
        let summary: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(summary["generation"], 0);
        assert_eq!(summary["inserted"], 1);

        let (status, body) = get_json(app, "/products").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["total"], 1);
    }

    #[tokio::test]
    async fn manual_trigger_failure_is_bad_gateway() {
        let app = app(state_with(vec![], vec![]).await);
        let resp = app
            .oneshot(
                axum::http::Request::builder()
                    .method("POST")
                    .uri("/ingest/run")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);
    }
}
