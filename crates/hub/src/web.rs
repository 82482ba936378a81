//! HTTP surface: one handler per operation, mapped onto the shared
//! telemetry state, the sqlite store, and the image store.

use anyhow::Context;
use axum::extract::{Path, Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;

use crate::db::{Db, PhaseRecord, Report};
use crate::error::{AppError, Result};
use crate::images::ImageStore;
use crate::state::{SensorSnapshot, SharedState, SENSOR_COUNT, SENSOR_UNAVAILABLE};

/// Storage format for phase start timestamps. Lexicographic order equals
/// chronological order, which the history query relies on.
const START_DATE_FMT: &str = "%Y-%m-%dT%H:%M:%S";

#[derive(Clone)]
pub struct AppState {
    pub db: Db,
    pub images: Arc<ImageStore>,
    pub telemetry: SharedState,
}

// ---------------------------------------------------------------------------
// Routes
// ---------------------------------------------------------------------------

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/sensors", post(ingest_snapshot).get(read_snapshot))
        .route("/api/events", post(append_event).get(read_events))
        .route("/api/phases", post(set_phase).get(phase_history))
        .route("/api/phases/current", get(current_phase))
        .route("/api/water/today", get(water_today))
        .route("/api/reports", post(create_report).get(list_reports))
        .route(
            "/api/reports/{id}",
            get(get_report).put(update_report).delete(delete_report),
        )
        .with_state(state)
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

// ---------------------------------------------------------------------------
// Sensor state cache
// ---------------------------------------------------------------------------

/// Query-parameter ingest: `moisture` and `status` are required, the nine
/// `sensorN` keys optional. The cached snapshot is replaced wholesale.
async fn ingest_snapshot(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<SensorSnapshot>> {
    let moisture_raw = params
        .get("moisture")
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| AppError::InvalidInput("missing required field: moisture".into()))?;
    let moisture: f64 = moisture_raw
        .parse()
        .map_err(|_| AppError::InvalidInput(format!("moisture is not numeric: {moisture_raw}")))?;

    let status = params
        .get("status")
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| AppError::InvalidInput("missing required field: status".into()))?;

    let sensors: [String; SENSOR_COUNT] = std::array::from_fn(|i| {
        params
            .get(&format!("sensor{}", i + 1))
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| SENSOR_UNAVAILABLE.to_string())
    });

    let snapshot = SensorSnapshot {
        average_moisture: Some(moisture),
        relay_status: Some(status.to_string()),
        sensors,
    };

    state.telemetry.write().await.replace_snapshot(snapshot.clone());
    Ok(Json(snapshot))
}

/// Current snapshot verbatim, including the all-unset initial value.
async fn read_snapshot(State(state): State<AppState>) -> Json<SensorSnapshot> {
    Json(state.telemetry.read().await.snapshot.clone())
}

// ---------------------------------------------------------------------------
// Event log buffer
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct AppendEventBody {
    #[serde(default)]
    moisture: Option<f64>,
    #[serde(default)]
    relay_status: Option<String>,
    #[serde(default)]
    last_sensor: Option<String>,
}

/// Fields are stored as given; the timestamp is always server-assigned.
async fn append_event(
    State(state): State<AppState>,
    Json(body): Json<AppendEventBody>,
) -> Json<crate::state::EventLogEntry> {
    let entry = state.telemetry.write().await.append_event(
        body.moisture,
        body.relay_status,
        body.last_sensor,
    );
    Json(entry)
}

async fn read_events(State(state): State<AppState>) -> Json<Vec<crate::state::EventLogEntry>> {
    Json(state.telemetry.read().await.events())
}

// ---------------------------------------------------------------------------
// Phase timeline
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct SetPhaseBody {
    #[serde(default)]
    phase: Option<String>,
    #[serde(default)]
    start_date: Option<String>,
}

async fn set_phase(
    State(state): State<AppState>,
    Json(body): Json<SetPhaseBody>,
) -> Result<Json<PhaseRecord>> {
    let phase = required(body.phase, "phase")?;
    let raw = required(body.start_date, "start_date")?;

    // Format check runs before any row is inserted.
    let start_date = normalize_start_date(&raw)
        .ok_or_else(|| AppError::InvalidInput(format!("start_date is not a valid date: {raw}")))?;

    let record = state.db.insert_phase(&phase, &start_date).await?;
    Ok(Json(record))
}

async fn current_phase(State(state): State<AppState>) -> Result<Json<PhaseRecord>> {
    let record = state
        .db
        .current_phase()
        .await?
        .ok_or_else(|| AppError::NotFound("no phase recorded".into()))?;
    Ok(Json(record))
}

async fn phase_history(State(state): State<AppState>) -> Result<Json<Vec<PhaseRecord>>> {
    Ok(Json(state.db.phase_history().await?))
}

/// Accepts RFC 3339, "YYYY-MM-DDTHH:MM:SS", or a bare "YYYY-MM-DD"
/// (midnight). Normalized so stored values sort chronologically as text.
fn normalize_start_date(raw: &str) -> Option<String> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.naive_utc().format(START_DATE_FMT).to_string());
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(raw, START_DATE_FMT) {
        return Some(dt.format(START_DATE_FMT).to_string());
    }
    if let Ok(d) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return Some(d.and_hms_opt(0, 0, 0)?.format(START_DATE_FMT).to_string());
    }
    None
}

// ---------------------------------------------------------------------------
// Daily water-usage ledger
// ---------------------------------------------------------------------------

async fn water_today(State(state): State<AppState>) -> Result<Json<crate::db::DailyWaterUsage>> {
    Ok(Json(state.db.usage_for_today().await?))
}

// ---------------------------------------------------------------------------
// Report archive
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct CreateReportBody {
    #[serde(default)]
    title: String,
    #[serde(default)]
    date: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    image: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UpdateReportBody {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    date: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    image: Option<String>,
}

/// Create path accepts the scalars as given; only `update` enforces them.
/// The optional image is a filename already staged by the upload
/// collaborator.
async fn create_report(
    State(state): State<AppState>,
    Json(body): Json<CreateReportBody>,
) -> Result<Json<Report>> {
    let report = state
        .db
        .insert_report(&body.title, &body.date, &body.description, body.image.as_deref())
        .await?;
    Ok(Json(report))
}

async fn get_report(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<Report>> {
    let report = state
        .db
        .get_report(id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("no report with id {id}")))?;
    Ok(Json(report))
}

async fn list_reports(State(state): State<AppState>) -> Result<Json<Vec<Report>>> {
    Ok(Json(state.db.list_reports().await?))
}

async fn update_report(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(body): Json<UpdateReportBody>,
) -> Result<Json<Report>> {
    let title = required(body.title, "title")?;
    let date = required(body.date, "date")?;
    let description = required(body.description, "description")?;

    let existing = state
        .db
        .get_report(id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("no report with id {id}")))?;

    // A newly supplied image replaces the reference; omission preserves
    // the existing one. The replaced asset stays on disk.
    let image = body.image.or(existing.image);

    let updated = state
        .db
        .update_report(id, &title, &date, &description, image.as_deref())
        .await?;
    Ok(Json(updated))
}

/// Asset removal is attempted first and is best-effort; the row deletion
/// is the authoritative outcome.
async fn delete_report(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<serde_json::Value>> {
    if let Some(report) = state.db.get_report(id).await? {
        if let Some(image) = &report.image {
            state.images.remove(image);
        }
    }

    state.db.delete_report(id).await?;
    Ok(Json(json!({ "id": id, "status": "deleted" })))
}

fn required(field: Option<String>, name: &str) -> Result<String> {
    field
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| AppError::InvalidInput(format!("{name} is required")))
}

// ---------------------------------------------------------------------------
// Server entry-point
// ---------------------------------------------------------------------------

pub async fn serve(state: AppState, port: u16) -> anyhow::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;

    info!(%addr, "http server listening");

    axum::serve(listener, router(state))
        .await
        .context("http server error")?;
    Ok(())
}

// ===========================================================================
// Tests
// ===========================================================================
