use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use serde::Deserialize;

use super::{
    date_field, now, optional_session, require_session, required, time_field, JsonBody,
};
use crate::errors::AppError;
use crate::models::{Booking, Role, TimeRange, UserSession};
use crate::services::auth::normalize_phone;
use crate::services::scheduling::{self, Actor, Booker, NewBooking, NewSchedule};
use crate::state::AppState;

fn actor(session: &UserSession) -> Actor {
    Actor {
        user_id: session.user_id.clone(),
        role: session.role,
    }
}

// POST /api/bookings
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateBookingRequest {
    #[serde(default)]
    pub barber_id: String,
    #[serde(default)]
    pub slot_id: String,
    #[serde(default)]
    pub date: String,
    #[serde(default)]
    pub start_time: String,
    #[serde(default)]
    pub end_time: String,
    pub service_id: Option<String>,
    pub service_type: Option<String>,
    pub duration: Option<i32>,
    pub price: Option<i64>,
    pub notes: Option<String>,
    // Guest bookings
    pub name: Option<String>,
    pub phone: Option<String>,
    // Manual bookings entered by the barber
    pub manual_customer_name: Option<String>,
    pub manual_customer_phone: Option<String>,
}

fn booker_for(
    state: &AppState,
    session: Option<UserSession>,
    req: &CreateBookingRequest,
) -> Result<Booker, AppError> {
    let country_code = &state.config.phone_country_code;
    match session {
        None => Ok(Booker::Guest {
            name: required("name", req.name.as_deref())?.to_string(),
            phone: normalize_phone(required("phone", req.phone.as_deref())?, country_code)?,
        }),
        Some(s) if s.role == Role::Customer => Ok(Booker::Customer {
            customer_id: s.user_id,
        }),
        Some(s) => Ok(Booker::Barber {
            barber_id: s.user_id,
            customer_name: required("manualCustomerName", req.manual_customer_name.as_deref())?
                .to_string(),
            customer_phone: normalize_phone(
                required("manualCustomerPhone", req.manual_customer_phone.as_deref())?,
                country_code,
            )?,
        }),
    }
}

pub async fn create_booking(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    JsonBody(req): JsonBody<CreateBookingRequest>,
) -> Result<(StatusCode, Json<Booking>), AppError> {
    let session = optional_session(&state, &headers)?;

    let barber_id = required("barberId", Some(req.barber_id.as_str()))?.to_string();
    let slot_id = required("slotId", Some(req.slot_id.as_str()))?.to_string();
    let date = date_field("date", &req.date)?;
    let range = TimeRange::new(
        time_field("startTime", &req.start_time)?,
        time_field("endTime", &req.end_time)?,
    );
    if matches!(req.duration, Some(d) if d <= 0) {
        return Err(AppError::Validation("duration must be positive".to_string()));
    }
    if matches!(req.price, Some(p) if p < 0) {
        return Err(AppError::Validation("price cannot be negative".to_string()));
    }
    let booker = booker_for(&state, session, &req)?;

    let request = NewBooking {
        barber_id,
        slot_id,
        date,
        range,
        service_id: req.service_id,
        service_type: req.service_type,
        duration: req.duration,
        price: req.price,
        notes: req.notes,
        booker,
    };

    let booking = {
        let mut db = state.db()?;
        scheduling::create_booking(&mut db, request, now())?
    };
    Ok((StatusCode::CREATED, Json(booking)))
}

// GET /api/bookings
pub async fn list_bookings(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<Vec<Booking>>, AppError> {
    let session = require_session(&state, &headers)?;
    let bookings = {
        let db = state.db()?;
        scheduling::list_bookings(&db, &actor(&session))?
    };
    Ok(Json(bookings))
}

// POST /api/bookings/:id/cancel
pub async fn cancel_booking(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(booking_id): Path<String>,
) -> Result<Json<Booking>, AppError> {
    let session = require_session(&state, &headers)?;
    let booking = {
        let mut db = state.db()?;
        scheduling::cancel_booking(&mut db, &booking_id, &actor(&session), now())?
    };
    Ok(Json(booking))
}

// POST /api/bookings/:id/reschedule
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RescheduleRequest {
    #[serde(default)]
    pub slot_id: String,
    #[serde(default)]
    pub date: String,
    #[serde(default)]
    pub start_time: String,
    #[serde(default)]
    pub end_time: String,
}

pub async fn reschedule_booking(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(booking_id): Path<String>,
    JsonBody(req): JsonBody<RescheduleRequest>,
) -> Result<Json<Booking>, AppError> {
    let session = require_session(&state, &headers)?;
    let target = NewSchedule {
        slot_id: required("slotId", Some(req.slot_id.as_str()))?.to_string(),
        date: date_field("date", &req.date)?,
        range: TimeRange::new(
            time_field("startTime", &req.start_time)?,
            time_field("endTime", &req.end_time)?,
        ),
    };

    let booking = {
        let mut db = state.db()?;
        scheduling::reschedule_booking(&mut db, &booking_id, &actor(&session), target, now())?
    };
    Ok(Json(booking))
}
