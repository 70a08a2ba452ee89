use std::sync::Arc;

use axum::routing::{delete, get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::handlers;
use crate::state::AppState;

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(handlers::health::health))
        .route("/api/auth/signup", post(handlers::auth::signup))
        .route("/api/auth/login", post(handlers::auth::login))
        .route("/api/auth/logout", post(handlers::auth::logout))
        .route("/api/auth/session", get(handlers::auth::session))
        .route("/api/auth/otp/send", post(handlers::auth::send_otp))
        .route(
            "/api/auth/password/reset",
            post(handlers::auth::reset_password),
        )
        .route(
            "/api/auth/password/change",
            post(handlers::auth::change_password),
        )
        .route("/api/slots", post(handlers::slots::create_slot))
        .route("/api/slots/bulk", post(handlers::slots::create_slots))
        .route("/api/slots/:id", delete(handlers::slots::delete_slot))
        .route(
            "/api/barbers/:barber_id/slots",
            get(handlers::slots::list_slots),
        )
        .route(
            "/api/bookings",
            post(handlers::bookings::create_booking).get(handlers::bookings::list_bookings),
        )
        .route(
            "/api/bookings/:id/cancel",
            post(handlers::bookings::cancel_booking),
        )
        .route(
            "/api/bookings/:id/reschedule",
            post(handlers::bookings::reschedule_booking),
        )
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
