pub mod handlers;
pub mod middleware;
pub mod state;

use axum::{
    Router,
    routing::{get, post, put},
};
use tower_http::{
    compression::CompressionLayer,
    cors::CorsLayer,
    trace::TraceLayer,
};
use std::sync::Arc;

use crate::{
    config::Settings,
    service::ServiceContext,
};
use state::AppState;

pub fn create_app(service_context: Arc<ServiceContext>, settings: Arc<Settings>) -> Router {
    let app_state = AppState::new(service_context, settings);

    Router::new()
        // Root and health endpoints
        .route("/", get(handlers::root::root))
        .route("/health", get(handlers::root::health_check))

        // Auth routes
        .route("/auth/register", post(handlers::auth::register))
        .route("/auth/login", post(handlers::auth::login))

        // Signed by the platform, not by a user
        .route("/api/payments/webhook", post(handlers::payments::stripe_webhook))

        .nest("/api", api_routes(app_state.clone()))

        .with_state(app_state)

        // Middleware
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

fn api_routes(state: AppState) -> Router<AppState> {
    Router::new()
        .nest("/clubs", club_routes())
        .nest("/bookings", booking_routes())
        .route("/memberships", get(handlers::memberships::list))
        .route("/memberships/:id/cancel", post(handlers::memberships::cancel))
        .route("/me/payment-method", put(handlers::memberships::save_payment_method))
        .route_layer(axum::middleware::from_fn_with_state(
            state,
            middleware::auth::require_auth,
        ))
}

fn club_routes() -> Router<AppState> {
    Router::new()
        .route("/", post(handlers::clubs::create))
        .route("/:club_id", get(handlers::clubs::get))
        .route(
            "/:club_id/courts",
            get(handlers::clubs::list_courts).post(handlers::clubs::add_court),
        )
        .route(
            "/:club_id/courts/:court_id/bookings",
            get(handlers::bookings::list_for_day),
        )
        .route(
            "/:club_id/plans",
            get(handlers::clubs::list_plans).post(handlers::clubs::create_plan),
        )
        .route("/:club_id/connect/onboard", post(handlers::clubs::onboard))
        .route("/:club_id/connect/refresh", post(handlers::clubs::refresh_account))
        .route("/:club_id/balance", get(handlers::clubs::balance))
        .route("/:club_id/balance/top-up", post(handlers::clubs::top_up))
        .route("/:club_id/checkout", post(handlers::clubs::checkout))
}

fn booking_routes() -> Router<AppState> {
    Router::new()
        .route("/", post(handlers::bookings::create))
        .route("/:id", get(handlers::bookings::get))
        .route("/:id/payment/start", post(handlers::bookings::start_payment))
        .route("/:id/payment/complete", post(handlers::bookings::complete_payment))
        .route("/:id/payment/fail", post(handlers::bookings::fail_payment))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{EventPayload, PaymentPurpose, PlatformEvent};
    use crate::payments::fake::FakePaymentGateway;
    use crate::service::testing::{fixture, Fixture};
    use axum::{
        body::Body,
        http::{header, Method, Request, StatusCode},
        response::Response,
    };
    use serde_json::{json, Value};
    use tower::ServiceExt;

    struct TestApp {
        app: Router,
        f: Fixture,
    }

    async fn test_app() -> TestApp {
        let f = fixture().await;
        let ctx = ServiceContext::new(
            f.pool.clone(),
            &Settings::default(),
            Some(f.gateway.clone() as Arc<dyn crate::payments::PaymentGateway>),
        );
        let app = create_app(Arc::new(ctx), Arc::new(Settings::default()));
        TestApp { app, f }
    }

    impl TestApp {
        fn token_for(&self, user: &crate::domain::User) -> String {
            self.f.ctx.auth_service.issue_token(user.id).unwrap()
        }

        async fn send(&self, method: Method, uri: &str, token: Option<&str>, body: Option<Value>) -> Response {
            let mut builder = Request::builder().method(method).uri(uri);
            if let Some(token) = token {
                builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
            }
            let request = match body {
                Some(body) => builder
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
                None => builder.body(Body::empty()).unwrap(),
            };
            self.app.clone().oneshot(request).await.unwrap()
        }
    }

    async fn json_body(response: Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn booking_body(app: &TestApp, start: &str, end: &str) -> Value {
        json!({
            "club_id": app.f.club.id,
            "court_id": app.f.court.id,
            "date": "2024-06-01",
            "start_time": start,
            "end_time": end,
            "cost_cents": 2500
        })
    }

    #[tokio::test]
    async fn test_health_is_public() {
        let app = test_app().await;
        let response = app.send(Method::GET, "/health", None, None).await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_api_requires_bearer_token() {
        let app = test_app().await;
        let response = app
            .send(Method::POST, "/api/bookings", None, Some(booking_body(&app, "10:00", "11:00")))
            .await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = app
            .send(Method::GET, "/api/memberships", Some("not-a-token"), None)
            .await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_register_and_login() {
        let app = test_app().await;
        let response = app
            .send(
                Method::POST,
                "/auth/register",
                None,
                Some(json!({
                    "email": "serena@example.com",
                    "display_name": "Serena",
                    "password": "second-serve"
                })),
            )
            .await;
        assert_eq!(response.status(), StatusCode::CREATED);

        let response = app
            .send(
                Method::POST,
                "/auth/login",
                None,
                Some(json!({ "email": "serena@example.com", "password": "second-serve" })),
            )
            .await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        let token = body["token"].as_str().unwrap().to_string();

        let response = app.send(Method::GET, "/api/memberships", Some(&token), None).await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_booking_conflict_is_409() {
        let app = test_app().await;
        let token = app.token_for(&app.f.member);

        let first = app
            .send(Method::POST, "/api/bookings", Some(&token), Some(booking_body(&app, "10:00", "11:00")))
            .await;
        assert_eq!(first.status(), StatusCode::CREATED);

        let adjacent = app
            .send(Method::POST, "/api/bookings", Some(&token), Some(booking_body(&app, "11:00", "12:00")))
            .await;
        assert_eq!(adjacent.status(), StatusCode::CREATED);

        let overlapping = app
            .send(Method::POST, "/api/bookings", Some(&token), Some(booking_body(&app, "10:30", "11:30")))
            .await;
        assert_eq!(overlapping.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_missing_field_is_400() {
        let app = test_app().await;
        let token = app.token_for(&app.f.member);
        let response = app
            .send(
                Method::POST,
                "/api/bookings",
                Some(&token),
                Some(json!({ "club_id": app.f.club.id, "date": "2024-06-01" })),
            )
            .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_manual_payment_flow_over_http() {
        let app = test_app().await;
        let token = app.token_for(&app.f.member);
        let created = app
            .send(Method::POST, "/api/bookings", Some(&token), Some(booking_body(&app, "10:00", "11:00")))
            .await;
        let booking = json_body(created).await;
        let id = booking["id"].as_str().unwrap().to_string();

        let start = app
            .send(Method::POST, &format!("/api/bookings/{}/payment/start", id), Some(&token), None)
            .await;
        assert_eq!(start.status(), StatusCode::OK);

        let complete = app
            .send(
                Method::POST,
                &format!("/api/bookings/{}/payment/complete", id),
                Some(&token),
                Some(json!({ "method": "cash" })),
            )
            .await;
        assert_eq!(complete.status(), StatusCode::OK);
        let paid = json_body(complete).await;
        assert_eq!(paid["paid"], json!(true));

        let again = app
            .send(
                Method::POST,
                &format!("/api/bookings/{}/payment/complete", id),
                Some(&token),
                Some(json!({ "method": "cash" })),
            )
            .await;
        assert_eq!(again.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_court_day_listing() {
        let app = test_app().await;
        let token = app.token_for(&app.f.member);
        app.send(Method::POST, "/api/bookings", Some(&token), Some(booking_body(&app, "9:00", "10:00")))
            .await;

        let uri = format!(
            "/api/clubs/{}/courts/{}/bookings?date=2024-06-01",
            app.f.club.id, app.f.court.id
        );
        let response = app.send(Method::GET, &uri, Some(&token), None).await;
        assert_eq!(response.status(), StatusCode::OK);
        let day = json_body(response).await;
        assert_eq!(day.as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_non_admin_cannot_add_court() {
        let app = test_app().await;
        let token = app.token_for(&app.f.member);
        let response = app
            .send(
                Method::POST,
                &format!("/api/clubs/{}/courts", app.f.club.id),
                Some(&token),
                Some(json!({ "name": "Court 2" })),
            )
            .await;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    fn webhook_request(payload: String, signature: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder()
            .method(Method::POST)
            .uri("/api/payments/webhook")
            .header(header::CONTENT_TYPE, "application/json");
        if let Some(signature) = signature {
            builder = builder.header("Stripe-Signature", signature);
        }
        builder.body(Body::from(payload)).unwrap()
    }

    #[tokio::test]
    async fn test_webhook_signature_and_acknowledgement() {
        let app = test_app().await;
        let event = PlatformEvent {
            id: "evt_http_1".to_string(),
            event_type: "invoice.created".to_string(),
            payload: EventPayload::Unhandled,
        };
        let (payload, signature) = FakePaymentGateway::sign(&event);

        let missing = app.app.clone().oneshot(webhook_request(payload.clone(), None)).await.unwrap();
        assert_eq!(missing.status(), StatusCode::BAD_REQUEST);

        let forged = app
            .app
            .clone()
            .oneshot(webhook_request(payload.clone(), Some("t=1,v1=forged")))
            .await
            .unwrap();
        assert_eq!(forged.status(), StatusCode::BAD_REQUEST);

        for _ in 0..2 {
            let response = app
                .app
                .clone()
                .oneshot(webhook_request(payload.clone(), Some(&signature)))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
            assert_eq!(json_body(response).await, json!({ "received": true }));
        }
    }

    #[tokio::test]
    async fn test_webhook_marks_booking_paid() {
        let app = test_app().await;
        let token = app.token_for(&app.f.member);
        let created = app
            .send(Method::POST, "/api/bookings", Some(&token), Some(booking_body(&app, "10:00", "11:00")))
            .await;
        let id = json_body(created).await["id"].as_str().unwrap().to_string();

        let event = PlatformEvent {
            id: "evt_http_paid".to_string(),
            event_type: "checkout.session.completed".to_string(),
            payload: EventPayload::CheckoutCompleted {
                session_id: "cs_test_http".to_string(),
                payment_intent_id: Some("pi_http".to_string()),
                subscription_id: None,
                customer_id: None,
                metadata: PaymentPurpose::Booking {
                    club_id: app.f.club.id,
                    booking_id: id.clone(),
                    user_id: app.f.member.id,
                }
                .to_metadata(),
            },
        };
        let (payload, signature) = FakePaymentGateway::sign(&event);
        let response = app
            .app
            .clone()
            .oneshot(webhook_request(payload, Some(&signature)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let fetched = app
            .send(Method::GET, &format!("/api/bookings/{}", id), Some(&token), None)
            .await;
        let booking = json_body(fetched).await;
        assert_eq!(booking["paid"], json!(true));
    }
}
