use axum::{http::StatusCode, Json, response::IntoResponse};
use serde_json::json;

pub async fn root() -> impl IntoResponse {
    Json(json!({
        "name": "Courtside API",
        "version": env!("CARGO_PKG_VERSION"),
        "description": "Court bookings, memberships and payments for tennis clubs",
        "status": "operational",
        "endpoints": {
            "health": "/health",
            "auth": "/auth/login",
            "api": "/api",
            "webhook": "/api/payments/webhook"
        }
    }))
}

pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, Json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339()
    })))
}
