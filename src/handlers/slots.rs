use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use super::{date_field, now, require_barber, time_field, JsonBody};
use crate::errors::AppError;
use crate::models::{Slot, TimeRange};
use crate::services::scheduling;
use crate::state::AppState;

// POST /api/slots
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSlotRequest {
    #[serde(default)]
    pub date: String,
    #[serde(default)]
    pub start_time: String,
    #[serde(default)]
    pub end_time: String,
}

pub async fn create_slot(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    JsonBody(req): JsonBody<CreateSlotRequest>,
) -> Result<(StatusCode, Json<Slot>), AppError> {
    let session = require_barber(&state, &headers)?;
    let date = date_field("date", &req.date)?;
    let start = time_field("startTime", &req.start_time)?;
    let end = time_field("endTime", &req.end_time)?;

    let slot = {
        let db = state.db()?;
        scheduling::create_slot(&db, &session.user_id, date, start, end, now())?
    };
    Ok((StatusCode::CREATED, Json(slot)))
}

// POST /api/slots/bulk
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSlotsRequest {
    #[serde(default)]
    pub date: String,
    #[serde(default)]
    pub start_time: String,
    #[serde(default)]
    pub end_time: String,
    pub interval_minutes: Option<u32>,
}

pub async fn create_slots(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    JsonBody(req): JsonBody<CreateSlotsRequest>,
) -> Result<(StatusCode, Json<Vec<Slot>>), AppError> {
    let session = require_barber(&state, &headers)?;
    let date = date_field("date", &req.date)?;
    let window = TimeRange::new(
        time_field("startTime", &req.start_time)?,
        time_field("endTime", &req.end_time)?,
    );
    let interval = req
        .interval_minutes
        .ok_or_else(|| AppError::Validation("intervalMinutes is required".to_string()))?;

    let slots = {
        let mut db = state.db()?;
        scheduling::create_slots(&mut db, &session.user_id, date, window, interval, now())?
    };
    Ok((StatusCode::CREATED, Json(slots)))
}

// DELETE /api/slots/:id
pub async fn delete_slot(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(slot_id): Path<String>,
) -> Result<Json<Value>, AppError> {
    let session = require_barber(&state, &headers)?;
    {
        let db = state.db()?;
        scheduling::delete_slot(&db, &session.user_id, &slot_id)?;
    }
    Ok(Json(json!({ "success": true })))
}

// GET /api/barbers/:barber_id/slots
#[derive(Deserialize)]
pub struct SlotsQuery {
    pub from: Option<String>,
    pub to: Option<String>,
}

pub async fn list_slots(
    State(state): State<Arc<AppState>>,
    Path(barber_id): Path<String>,
    Query(query): Query<SlotsQuery>,
) -> Result<Json<Vec<Slot>>, AppError> {
    let from = query.from.as_deref().map(|v| date_field("from", v)).transpose()?;
    let to = query.to.as_deref().map(|v| date_field("to", v)).transpose()?;

    let slots = {
        let db = state.db()?;
        scheduling::list_slots(&db, &barber_id, from, to)?
    };
    Ok(Json(slots))
}
