//! API route handlers
//!
//! - export table and chart series
//! - synchronizer status mirror
//! - raw CSV download and health

use axum::extract::{Query, State};
use axum::http::{header, StatusCode};
use axum::response::{Html, IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::PathBuf;
use std::sync::Arc;

use super::envelope::{ApiErrorResponse, ApiResponse};
use crate::config::defaults::MISSING_VALUE;
use crate::storage::export::{DATETIME_COLUMN, TIMESTAMP_COLUMN};
use crate::storage::{read_table, CsvTable};
use crate::sync::SharedStatus;

const DOWNLOAD_NAME: &str = "owen_data.csv";
const INDEX_HTML: &str = include_str!("index.html");

// ============================================================================
// API State
// ============================================================================

/// Shared state for API handlers
#[derive(Clone)]
pub struct DashboardState {
    /// Status mirror written by the synchronizer
    pub status: SharedStatus,
    /// CSV export read by the data and download endpoints
    pub csv_path: Arc<PathBuf>,
    /// Default number of rows for `/api/v1/data`
    pub table_rows: usize,
}

impl DashboardState {
    pub fn new(status: SharedStatus, csv_path: impl Into<PathBuf>, table_rows: usize) -> Self {
        Self {
            status,
            csv_path: Arc::new(csv_path.into()),
            table_rows,
        }
    }
}

// ============================================================================
// Data Endpoint
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct DataQuery {
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize, PartialEq)]
pub struct Dataset {
    pub label: String,
    /// `null` where the cell is not a number.
    pub data: Vec<Option<f64>>,
}

#[derive(Debug, Serialize, PartialEq)]
pub struct ChartData {
    pub labels: Vec<String>,
    pub datasets: Vec<Dataset>,
}

#[derive(Debug, Serialize)]
pub struct DataPayload {
    pub columns: Vec<String>,
    /// Newest first.
    pub table: Vec<Map<String, Value>>,
    /// Chronological.
    pub chart: ChartData,
}

fn parse_cell(cell: &str) -> Option<f64> {
    cell.trim().parse::<f64>().ok()
}

fn is_blank(cell: &str) -> bool {
    let cell = cell.trim();
    cell.is_empty() || cell == MISSING_VALUE
}

/// A column is numeric when every non-blank cell parses and at least one does.
fn is_numeric_column(rows: &[Vec<String>], idx: usize) -> bool {
    let mut seen = false;
    for cell in rows.iter().filter_map(|r| r.get(idx)) {
        if is_blank(cell) {
            continue;
        }
        if parse_cell(cell).is_none() {
            return false;
        }
        seen = true;
    }
    seen
}

/// Shape the last `limit` rows of the export for the dashboard.
/// `None` when there are no data rows.
pub fn build_payload(table: CsvTable, limit: usize) -> Option<DataPayload> {
    if table.rows.is_empty() {
        return None;
    }
    let CsvTable { columns, rows } = table;
    let start = rows.len().saturating_sub(limit);
    let window = &rows[start..];
    let cell = |row: &Vec<String>, idx: usize| row.get(idx).cloned().unwrap_or_default();

    let table = window
        .iter()
        .rev()
        .map(|row| {
            columns
                .iter()
                .enumerate()
                .map(|(i, col)| (col.clone(), Value::String(cell(row, i))))
                .collect()
        })
        .collect();

    let labels = match columns.iter().position(|c| c == DATETIME_COLUMN) {
        Some(idx) => window.iter().map(|r| cell(r, idx)).collect(),
        None => Vec::new(),
    };

    let mut series: Vec<usize> = (0..columns.len())
        .filter(|&i| columns[i] != TIMESTAMP_COLUMN && is_numeric_column(window, i))
        .collect();
    if series.is_empty() {
        series = (0..columns.len())
            .filter(|&i| columns[i] != TIMESTAMP_COLUMN && columns[i] != DATETIME_COLUMN)
            .collect();
    }
    let datasets = series
        .into_iter()
        .map(|i| Dataset {
            label: columns[i].clone(),
            data: window.iter().map(|r| r.get(i).and_then(|c| parse_cell(c))).collect(),
        })
        .collect();

    Some(DataPayload {
        columns,
        table,
        chart: ChartData { labels, datasets },
    })
}

/// GET /api/v1/data?limit=N
pub async fn get_data(
    State(state): State<DashboardState>,
    Query(query): Query<DataQuery>,
) -> Response {
    let limit = query.limit.unwrap_or(state.table_rows).max(1);
    let path = Arc::clone(&state.csv_path);

    let table = match tokio::task::spawn_blocking(move || read_table(&path)).await {
        Ok(Ok(table)) => table,
        Ok(Err(e)) => {
            tracing::warn!(error = %e, "Failed to read export");
            return ApiErrorResponse::internal(e.to_string());
        }
        Err(e) => return ApiErrorResponse::internal(e.to_string()),
    };

    match table.and_then(|t| build_payload(t, limit)) {
        Some(payload) => ApiResponse::ok(payload),
        None => ApiResponse::empty("Data file has not been created yet or is empty"),
    }
}

// ============================================================================
// Status, Health, Download, Index
// ============================================================================

/// GET /api/v1/status
pub async fn get_status(State(state): State<DashboardState>) -> Response {
    let status = state.status.read().await.clone();
    ApiResponse::ok(status)
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

/// GET /health
pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// GET /download
pub async fn download_csv(State(state): State<DashboardState>) -> Response {
    match tokio::fs::read(state.csv_path.as_path()).await {
        Ok(bytes) => (
            StatusCode::OK,
            [
                (header::CONTENT_TYPE, "text/csv; charset=utf-8".to_string()),
                (
                    header::CONTENT_DISPOSITION,
                    format!("attachment; filename=\"{}\"", DOWNLOAD_NAME),
                ),
            ],
            bytes,
        )
            .into_response(),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            ApiErrorResponse::not_found("Data file not found")
        }
        Err(e) => ApiErrorResponse::internal(e.to_string()),
    }
}

/// GET /
pub async fn index() -> Html<&'static str> {
    Html(INDEX_HTML)
}
