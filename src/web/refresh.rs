//! The refresh trigger endpoint.

use crate::refresh::{self, PgChartStore, RefreshError, RefreshJob, RefreshParams};
use crate::state::AppState;
use crate::web::error::ApiError;
use axum::extract::{Query, State};
use axum::response::Json;
use serde::Deserialize;
use serde_json::{Value, json};
use std::sync::Arc;
use tracing::info;

fn default_page_size() -> i64 {
    refresh::DEFAULT_PAGE_SIZE
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshQuery {
    /// Starting row offset into the chart table.
    #[serde(default)]
    page: i64,
    /// `pageSize` is the documented name; `pagination` is accepted for
    /// callers of the old dashboard endpoint.
    #[serde(default = "default_page_size", alias = "pagination")]
    page_size: i64,
}

/// `POST /api/refresh`
///
/// Runs a full refresh pass synchronously and returns a success marker with
/// counts, or an error payload naming the failed step. Only one refresh may
/// run at a time; concurrent triggers get a 409.
pub(super) async fn trigger_refresh(
    State(state): State<AppState>,
    Query(query): Query<RefreshQuery>,
) -> Result<Json<Value>, ApiError> {
    if query.page < 0 || query.page_size < 1 {
        return Err(ApiError::bad_request(
            "page must be >= 0 and pageSize must be >= 1",
        ));
    }

    let Ok(_guard) = state.refresh_lock.try_lock() else {
        return Err(ApiError::conflict("a refresh is already running"));
    };

    info!(
        page = query.page,
        page_size = query.page_size,
        "refresh triggered"
    );

    let store = Arc::new(PgChartStore::new(state.db_pool.clone()));
    let job = RefreshJob::new(store, state.ranking_api.clone());
    let outcome = job
        .run(RefreshParams {
            offset: query.page,
            page_size: query.page_size,
        })
        .await?;

    Ok(Json(json!({
        "status": "ok",
        "pages": outcome.pages,
        "chartsProcessed": outcome.charts_processed,
        "chartsFailed": outcome.charts_failed.len(),
        "failedCharts": outcome.charts_failed,
        "rowsUpserted": outcome.rows_upserted,
    })))
}

impl From<RefreshError> for ApiError {
    fn from(e: RefreshError) -> Self {
        let detail = json!({
            "step": e.step(),
            "chartsFailed": e.charts_failed(),
        });
        let chain = anyhow::Error::from(e);
        tracing::error!(error = ?chain, "refresh job failed");
        ApiError::new(
            axum::http::StatusCode::INTERNAL_SERVER_ERROR,
            "refresh_failed",
            format!("{chain:#}"),
        )
        .with_detail(detail)
    }
}
