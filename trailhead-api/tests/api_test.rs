use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
    Router,
};
use chrono::{Duration, NaiveDate, Utc};
use jsonwebtoken::{encode, EncodingKey, Header};
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;
use trailhead_api::metrics::Metrics;
use trailhead_api::middleware::{InMemoryRateLimiter, JwtIdentityResolver};
use trailhead_api::{app, AppState};
use trailhead_booking::{MockPaymentProvider, WebhookVerifier};
use trailhead_core::notify::LogNotifier;
use trailhead_core::Listing;
use trailhead_store::app_config::Config;
use trailhead_store::MemoryBookingStore;
use uuid::Uuid;

const JWT_SECRET: &str = "test-secret";
const WEBHOOK_SECRET: &str = "whsec_test";

fn config(requests_per_window: i64) -> Config {
    let toml = format!(
        r#"
        [server]
        port = 0
        [database]
        url = "postgres://unused"
        [redis]
        url = "redis://unused"
        [kafka]
        brokers = "unused:9092"
        [auth]
        jwt_secret = "{JWT_SECRET}"
        [stripe]
        api_key = ""
        webhook_secret = "{WEBHOOK_SECRET}"
        success_url = "https://example.com/ok"
        cancel_url = "https://example.com/cancel"
        [resilience]
        max_attempts = 2
        base_delay_ms = 1
        max_delay_ms = 2
        failure_threshold = 5
        cooldown_seconds = 30
        [rate_limit]
        requests = {requests_per_window}
        window_seconds = 60
        "#
    );

    config::Config::builder()
        .add_source(config::File::from_str(&toml, config::FileFormat::Toml))
        .build()
        .unwrap()
        .try_deserialize()
        .unwrap()
}

struct TestApp {
    router: Router,
    provider: Arc<MockPaymentProvider>,
    listing: Listing,
}

async fn test_app(rate_limit: Option<i64>) -> TestApp {
    let store = Arc::new(MemoryBookingStore::new());
    let listing = Listing {
        id: 7,
        owner_id: Uuid::new_v4(),
        title: "Pine ridge tent pad".to_string(),
        nightly_price: 3500,
        currency: "usd".to_string(),
        max_guests: 4,
    };
    store.insert_listing(listing.clone()).await;

    let provider = Arc::new(MockPaymentProvider::new());
    let cfg = config(rate_limit.unwrap_or(1_000));
    let mut state = AppState::new(
        &cfg,
        store,
        provider.clone(),
        Arc::new(LogNotifier),
        Arc::new(JwtIdentityResolver::new(JWT_SECRET, None)),
        Arc::new(Metrics::new().unwrap()),
    );
    if rate_limit.is_some() {
        state = state.with_rate_limiter(Arc::new(InMemoryRateLimiter::new()));
    }

    TestApp {
        router: app(state),
        provider,
        listing,
    }
}

fn token(user: Uuid, is_owner: Value) -> String {
    let exp = (Utc::now() + Duration::hours(1)).timestamp();
    encode(
        &Header::default(),
        &json!({ "sub": user, "email": "camper@example.com", "is_owner": is_owner, "exp": exp }),
        &EncodingKey::from_secret(JWT_SECRET.as_bytes()),
    )
    .unwrap()
}

fn days_ahead(n: i64) -> NaiveDate {
    Utc::now().date_naive() + Duration::days(n)
}

fn request(method: Method, uri: &str, bearer: Option<&str>, body: Option<Value>) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(jwt) = bearer {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", jwt));
    }
    match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

async fn send(router: &Router, req: Request<Body>) -> (StatusCode, Value) {
    let response = router.clone().oneshot(req).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, body)
}

fn webhook(payload: &Value, signature: &str) -> Request<Body> {
    Request::builder()
        .method(Method::POST)
        .uri("/payments/webhook")
        .header("Stripe-Signature", signature)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(payload.to_string()))
        .unwrap()
}

#[tokio::test]
async fn test_health_and_authentication() {
    let app = test_app(None).await;

    let (status, body) = send(&app.router, request(Method::GET, "/health", None, None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");

    let hold = json!({ "listing_id": 7, "start": days_ahead(10), "end": days_ahead(12), "guest_count": 2 });
    let (status, body) = send(&app.router, request(Method::POST, "/bookings/hold", None, Some(hold.clone()))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "UNAUTHENTICATED");

    let (status, _) = send(
        &app.router,
        request(Method::POST, "/bookings/hold", Some("garbage"), Some(hold)),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_hold_pay_confirm_cancel_flow() {
    let app = test_app(None).await;
    let renter = token(Uuid::new_v4(), json!(false));
    let (start, end) = (days_ahead(30), days_ahead(34));

    // Hold
    let (status, hold) = send(
        &app.router,
        request(
            Method::POST,
            "/bookings/hold",
            Some(&renter),
            Some(json!({ "listing_id": 7, "start": start, "end": end, "guest_count": 2 })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(hold["status"], "HELD");
    let booking_id = hold["id"].as_str().unwrap().to_string();

    // Overlapping hold by someone else
    let rival = token(Uuid::new_v4(), json!("0"));
    let (status, body) = send(
        &app.router,
        request(
            Method::POST,
            "/bookings/hold",
            Some(&rival),
            Some(json!({ "listing_id": 7, "start": days_ahead(32), "end": days_ahead(36), "guest_count": 1 })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "DATE_RANGE_CONFLICT");

    // Checkout session
    let (status, handle) = send(
        &app.router,
        request(Method::POST, "/payments/session", Some(&renter), Some(json!({ "booking_id": booking_id }))),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(handle["base_amount"], 14000);
    assert_eq!(handle["service_fee"], 1400);
    assert_eq!(handle["amount_total"], 15400);
    let session_id = handle["session_id"].as_str().unwrap().to_string();

    // Provider completes the payment and pushes a webhook
    app.provider.complete_session(&session_id, "pi_123").await.unwrap();
    let payload = json!({
        "id": "evt_1",
        "type": "checkout.session.completed",
        "data": { "object": {
            "id": session_id,
            "status": "complete",
            "payment_status": "paid",
            "payment_intent": "pi_123",
            "amount_total": 15400,
            "currency": "usd",
            "metadata": { "booking_id": booking_id }
        }}
    });

    let (status, body) = send(&app.router, webhook(&payload, "t=1,v1=deadbeef")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "WEBHOOK_SIGNATURE_INVALID");
    let (_, booking) = send(&app.router, request(Method::GET, &format!("/bookings/{}", booking_id), Some(&renter), None)).await;
    assert_eq!(booking["status"], "HELD");

    let signature = WebhookVerifier::new(WEBHOOK_SECRET, 300)
        .sign(payload.to_string().as_bytes(), Utc::now().timestamp())
        .unwrap();
    let (status, body) = send(&app.router, webhook(&payload, &signature)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["result"], "confirmed");

    // Redelivery and a client poll change nothing
    let (_, body) = send(&app.router, webhook(&payload, &signature)).await;
    assert_eq!(body["result"], "already_reconciled");
    let (status, body) = send(
        &app.router,
        request(Method::GET, &format!("/payments/session/{}", session_id), Some(&renter), None),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["result"], "ALREADY_RECONCILED");

    let (_, booking) = send(&app.router, request(Method::GET, &format!("/bookings/{}", booking_id), Some(&renter), None)).await;
    assert_eq!(booking["status"], "CONFIRMED");

    // Strangers see nothing
    let (status, _) = send(&app.router, request(Method::GET, &format!("/bookings/{}", booking_id), Some(&rival), None)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    // Renter cancels; the payment is refunded
    let (status, booking) = send(
        &app.router,
        request(Method::POST, &format!("/bookings/{}/cancel", booking_id), Some(&renter), None),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(booking["status"], "CANCELLED");
    assert_eq!(app.provider.refunds().await, vec![("pi_123".to_string(), 15400)]);

    // Session on a cancelled booking
    let (status, body) = send(
        &app.router,
        request(Method::POST, "/payments/session", Some(&renter), Some(json!({ "booking_id": booking_id }))),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "ILLEGAL_TRANSITION");
}

#[tokio::test]
async fn test_availability_and_owner_blocks() {
    let app = test_app(None).await;
    let owner = token(app.listing.owner_id, json!(1));
    let renter = token(Uuid::new_v4(), json!(false));

    let block = json!({ "start": days_ahead(5), "end": days_ahead(8) });
    let (status, body) = send(&app.router, request(Method::POST, "/listings/7/blocks", Some(&renter), Some(block.clone()))).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["code"], "FORBIDDEN");

    let (status, body) = send(&app.router, request(Method::POST, "/listings/7/blocks", Some(&owner), Some(block))).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["status"], "BLOCKED");

    let uri = format!("/listings/7/availability?start={}&end={}", days_ahead(1), days_ahead(20));
    let (status, body) = send(&app.router, request(Method::GET, &uri, None, None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["available"], false);
    assert_eq!(body["occupancy"][0]["kind"], "OWNER_BLOCKED");

    let uri = format!("/listings/7/availability?start={}&end={}", days_ahead(8), days_ahead(20));
    let (_, body) = send(&app.router, request(Method::GET, &uri, None, None)).await;
    assert_eq!(body["available"], true);

    let (status, body) = send(&app.router, request(Method::GET, "/listings/99/availability?start=2030-01-02&end=2030-01-05", None, None)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "NOT_FOUND");

    let (status, body) = send(&app.router, request(Method::GET, "/listings/7/availability?start=2030-01-05&end=2030-01-02", None, None)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn test_unhandled_webhook_events_are_acknowledged() {
    let app = test_app(None).await;
    let payload = json!({ "id": "evt_9", "type": "customer.created", "data": { "object": { "id": "cus_1" } } });
    let signature = WebhookVerifier::new(WEBHOOK_SECRET, 300)
        .sign(payload.to_string().as_bytes(), Utc::now().timestamp())
        .unwrap();

    let (status, body) = send(&app.router, webhook(&payload, &signature)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["received"], true);
    assert!(body.get("result").is_none());

    let unsigned = Request::builder()
        .method(Method::POST)
        .uri("/payments/webhook")
        .body(Body::from(payload.to_string()))
        .unwrap();
    let (status, _) = send(&app.router, unsigned).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_payment_for_unknown_booking_is_acknowledged() {
    let app = test_app(None).await;
    let payload = json!({
        "id": "evt_stray",
        "type": "checkout.session.completed",
        "data": { "object": {
            "id": "cs_elsewhere",
            "status": "complete",
            "payment_status": "paid",
            "payment_intent": "pi_stray",
            "amount_total": 5000,
            "currency": "usd",
            "metadata": { "booking_id": Uuid::new_v4().to_string() }
        }}
    });
    let signature = WebhookVerifier::new(WEBHOOK_SECRET, 300)
        .sign(payload.to_string().as_bytes(), Utc::now().timestamp())
        .unwrap();

    let (status, body) = send(&app.router, webhook(&payload, &signature)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["received"], true);
    assert_eq!(body["result"], "unmatched");
}

#[tokio::test]
async fn test_rate_limit() {
    let app = test_app(Some(2)).await;

    for _ in 0..2 {
        let (status, _) = send(&app.router, request(Method::GET, "/health", None, None)).await;
        assert_eq!(status, StatusCode::OK);
    }
    let (status, body) = send(&app.router, request(Method::GET, "/health", None, None)).await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(body["code"], "RATE_LIMITED");
}

#[tokio::test]
async fn test_metrics_endpoint() {
    let app = test_app(None).await;
    let renter = token(Uuid::new_v4(), json!(false));
    let hold = json!({ "listing_id": 7, "start": days_ahead(3), "end": days_ahead(4), "guest_count": 1 });
    send(&app.router, request(Method::POST, "/bookings/hold", Some(&renter), Some(hold))).await;

    let response = app
        .router
        .clone()
        .oneshot(request(Method::GET, "/metrics", None, None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let text = String::from_utf8(bytes.to_vec()).unwrap();
    assert!(text.contains(r#"trailhead_holds_total{outcome="placed"} 1"#));
}
