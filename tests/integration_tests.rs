use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::body::{Body, BodyDataStream};
use axum::http::{header, Request, Response, StatusCode};
use futures::StreamExt;
use jsonwebtoken::{encode, EncodingKey, Header};
use serde_json::{json, Value};
use tokio::sync::broadcast;
use tower::ServiceExt;

use tripdesk::config::{AppConfig, GatewayEnv};
use tripdesk::db::{queries, Document, DocumentChange, DocumentStore, SqliteStore, StoreError};
use tripdesk::handlers;
use tripdesk::models::{Booking, BookingKind, BookingStatus, PaymentStatus};
use tripdesk::services::gateway::{CheckoutRequest, OrderState, PaymentGateway};
use tripdesk::services::identity::jwt::{Claims, JwtVerifier};
use tripdesk::state::AppState;

const SECRET: &str = "test-secret";

// ── Mock Gateway ──

#[derive(Clone, Default)]
struct GatewayCalls {
    checkouts: Arc<AtomicUsize>,
    status_checks: Arc<AtomicUsize>,
    last_checkout: Arc<Mutex<Option<CheckoutRequest>>>,
    stored_before_checkout: Arc<AtomicBool>,
}

struct MockGateway {
    calls: GatewayCalls,
    checkout_url: Option<String>,
    unreachable: bool,
    order_state: OrderState,
    store: Option<Arc<dyn DocumentStore>>,
}

impl MockGateway {
    fn new() -> Self {
        Self {
            calls: GatewayCalls::default(),
            checkout_url: Some("https://pay.example/abc".to_string()),
            unreachable: false,
            order_state: OrderState::Pending,
            store: None,
        }
    }
}

#[async_trait]
impl PaymentGateway for MockGateway {
    async fn create_checkout(&self, request: &CheckoutRequest) -> anyhow::Result<Option<String>> {
        self.calls.checkouts.fetch_add(1, Ordering::SeqCst);
        *self.calls.last_checkout.lock().unwrap() = Some(request.clone());

        if let Some(store) = &self.store {
            let found =
                queries::find_booking_by_transaction_id(store.as_ref(), &request.merchant_order_id)
                    .await?
                    .is_some();
            self.calls.stored_before_checkout.store(found, Ordering::SeqCst);
        }

        if self.unreachable {
            anyhow::bail!("connection refused");
        }
        Ok(self.checkout_url.clone())
    }

    async fn order_status(&self, _merchant_order_id: &str) -> anyhow::Result<OrderState> {
        self.calls.status_checks.fetch_add(1, Ordering::SeqCst);
        if self.unreachable {
            anyhow::bail!("connection refused");
        }
        Ok(self.order_state)
    }
}

// ── Racing Store ──

type CompetingEdit = Box<dyn FnOnce(&mut Value) + Send>;

/// Lands one competing write on a document right before the next replace,
/// so the caller's write hits a version conflict.
struct RacingStore {
    inner: SqliteStore,
    competing_edit: Mutex<Option<CompetingEdit>>,
    races: AtomicUsize,
}

impl RacingStore {
    fn new() -> Self {
        Self {
            inner: SqliteStore::open(":memory:").unwrap(),
            competing_edit: Mutex::new(None),
            races: AtomicUsize::new(0),
        }
    }

    fn arm(&self, edit: impl FnOnce(&mut Value) + Send + 'static) {
        *self.competing_edit.lock().unwrap() = Some(Box::new(edit));
    }
}

#[async_trait]
impl DocumentStore for RacingStore {
    async fn insert(&self, collection: &str, id: &str, data: &Value) -> Result<i64, StoreError> {
        self.inner.insert(collection, id, data).await
    }

    async fn get(&self, collection: &str, id: &str) -> Result<Option<Document>, StoreError> {
        self.inner.get(collection, id).await
    }

    async fn replace(
        &self,
        collection: &str,
        id: &str,
        expected_version: i64,
        data: &Value,
    ) -> Result<i64, StoreError> {
        let edit = self.competing_edit.lock().unwrap().take();
        if let Some(edit) = edit {
            let current = self.inner.get(collection, id).await?.unwrap();
            let mut competing = current.data.clone();
            edit(&mut competing);
            self.inner
                .replace(collection, id, current.version, &competing)
                .await?;
            self.races.fetch_add(1, Ordering::SeqCst);
        }
        self.inner.replace(collection, id, expected_version, data).await
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<bool, StoreError> {
        self.inner.delete(collection, id).await
    }

    async fn list(&self, collection: &str) -> Result<Vec<Document>, StoreError> {
        self.inner.list(collection).await
    }

    async fn find_by_field(
        &self,
        collection: &str,
        field: &str,
        value: &str,
    ) -> Result<Vec<Document>, StoreError> {
        self.inner.find_by_field(collection, field, value).await
    }

    fn subscribe(&self) -> broadcast::Receiver<DocumentChange> {
        self.inner.subscribe()
    }
}

// ── Helpers ──

fn test_config() -> AppConfig {
    AppConfig {
        port: 3000,
        database_url: ":memory:".to_string(),
        auth_secret: SECRET.to_string(),
        phonepe_client_id: "".to_string(),
        phonepe_client_secret: "".to_string(),
        phonepe_client_version: "1".to_string(),
        phonepe_env: GatewayEnv::Sandbox,
        webhook_secret: "".to_string(), // empty = skip signature validation
        public_base_url: "https://api.test".to_string(),
        frontend_url: "https://app.test".to_string(),
        app_deep_link_scheme: "tripdesk".to_string(),
        strict_callback_codes: false,
    }
}

fn state_over(
    store: Arc<dyn DocumentStore>,
    config: AppConfig,
    mut gateway: MockGateway,
) -> (Arc<AppState>, GatewayCalls) {
    gateway.store = Some(Arc::clone(&store));
    let calls = gateway.calls.clone();

    let state = Arc::new(AppState {
        identity: Box::new(JwtVerifier::new(SECRET, Arc::clone(&store))),
        store,
        config,
        gateway: Box::new(gateway),
    });
    (state, calls)
}

fn test_state_with(config: AppConfig, gateway: MockGateway) -> (Arc<AppState>, GatewayCalls) {
    let store: Arc<dyn DocumentStore> = Arc::new(SqliteStore::open(":memory:").unwrap());
    state_over(store, config, gateway)
}

fn test_state() -> (Arc<AppState>, GatewayCalls) {
    test_state_with(test_config(), MockGateway::new())
}

fn token(uid: &str, role: &str) -> String {
    let claims = Claims {
        sub: uid.to_string(),
        email: Some(format!("{uid}@example.com")),
        role: Some(role.to_string()),
        exp: (chrono::Utc::now().timestamp() + 3600) as usize,
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(SECRET.as_bytes()),
    )
    .unwrap()
}

fn json_request(method: &str, uri: &str, bearer: Option<&str>, body: Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(t) = bearer {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {t}"));
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

fn get_request(uri: &str, bearer: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().uri(uri);
    if let Some(t) = bearer {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {t}"));
    }
    builder.body(Body::empty()).unwrap()
}

async fn send(state: &Arc<AppState>, req: Request<Body>) -> Response<Body> {
    handlers::router(state.clone()).oneshot(req).await.unwrap()
}

async fn body_json(res: Response<Body>) -> Value {
    let body = axum::body::to_bytes(res.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap()
}

async fn body_text(res: Response<Body>) -> String {
    let body = axum::body::to_bytes(res.into_body(), usize::MAX)
        .await
        .unwrap();
    String::from_utf8(body.to_vec()).unwrap()
}

fn location(res: &Response<Body>) -> String {
    res.headers()
        .get(header::LOCATION)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string()
}

/// Reads the event stream until `needle` shows up.
async fn read_until(events: &mut BodyDataStream, needle: &str) -> String {
    let mut seen = String::new();
    while !seen.contains(needle) {
        let chunk = tokio::time::timeout(Duration::from_secs(5), events.next())
            .await
            .expect("event did not arrive in time")
            .expect("event stream closed")
            .unwrap();
        seen.push_str(std::str::from_utf8(&chunk).unwrap());
    }
    seen
}

async fn stored(state: &Arc<AppState>, id: &str) -> Booking {
    queries::find_booking(state.store.as_ref(), id)
        .await
        .unwrap()
        .expect("booking should exist")
}

fn hotel_body(amount: Value) -> Value {
    json!({
        "listing": {
            "id": "hotel-1",
            "name": "Lakeview Inn",
            "image": "https://img.example/lakeview.jpg",
            "ownerId": "partner-1"
        },
        "checkIn": "2025-05-01",
        "checkOut": "2025-05-03",
        "guests": 2,
        "rooms": 1,
        "guestName": "Asha",
        "guestEmail": "asha@example.com",
        "totalAmount": amount,
        "source": "web"
    })
}

fn vehicle_body(payment_method: &str) -> Value {
    json!({
        "listing": { "id": "car-1", "name": "Swift Dzire", "ownerId": "partner-2" },
        "startDate": "2025-06-01",
        "endDate": "2025-06-03",
        "days": 2,
        "customer": { "name": "Ravi", "email": "ravi@example.com" },
        "paymentMethod": payment_method,
        "totalPrice": 3000
    })
}

async fn create_hotel(state: &Arc<AppState>, uid: &str) -> String {
    let res = send(
        state,
        json_request(
            "POST",
            "/api/payment/initiate",
            Some(&token(uid, "customer")),
            hotel_body(json!(2500)),
        ),
    )
    .await;
    assert_eq!(res.status(), StatusCode::OK);
    body_json(res).await["bookingId"]
        .as_str()
        .unwrap()
        .to_string()
}

async fn callback(state: &Arc<AppState>, id: &str, code: &str) -> Response<Body> {
    send(
        state,
        get_request(&format!("/api/payment/callback?id={id}&code={code}"), None),
    )
    .await
}

// ── Health ──

#[tokio::test]
async fn test_health() {
    let (state, _) = test_state();
    let res = send(&state, get_request("/health", None)).await;
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(body_json(res).await["status"], "ok");
}

// ── Create + Initiate ──

#[tokio::test]
async fn test_initiate_requires_auth() {
    let (state, calls) = test_state();
    let res = send(
        &state,
        json_request("POST", "/api/payment/initiate", None, hotel_body(json!(2500))),
    )
    .await;
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

    let res = send(
        &state,
        json_request(
            "POST",
            "/api/payment/initiate",
            Some("garbage"),
            hotel_body(json!(2500)),
        ),
    )
    .await;
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(calls.checkouts.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_initiate_rejects_non_positive_amount() {
    let (state, calls) = test_state();
    for amount in [json!(0), json!(-100)] {
        let res = send(
            &state,
            json_request(
                "POST",
                "/api/payment/initiate",
                Some(&token("u1", "customer")),
                hotel_body(amount),
            ),
        )
        .await;
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    }
    assert_eq!(calls.checkouts.load(Ordering::SeqCst), 0);
    assert!(queries::list_all_bookings(state.store.as_ref())
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn test_create_hotel_booking_is_pending_with_transaction_id() {
    let (state, calls) = test_state();
    let res = send(
        &state,
        json_request(
            "POST",
            "/api/payment/initiate",
            Some(&token("u1", "customer")),
            hotel_body(json!(2500)),
        ),
    )
    .await;
    assert_eq!(res.status(), StatusCode::OK);
    let json = body_json(res).await;
    assert_eq!(json["url"], "https://pay.example/abc");
    let id = json["bookingId"].as_str().unwrap().to_string();

    let hotels = queries::list_bookings(state.store.as_ref(), BookingKind::Hotel)
        .await
        .unwrap();
    assert_eq!(hotels.len(), 1);
    let booking = &hotels[0];
    assert_eq!(booking.id, id);
    assert_eq!(booking.user_id, "u1");
    assert_eq!(booking.status, BookingStatus::Pending);
    assert_eq!(booking.payment_status, PaymentStatus::Pending);
    assert!(booking.transaction_id.len() <= 34);
    assert!(id.starts_with(&booking.transaction_id));
    assert_eq!(booking.listing.name, "Lakeview Inn");

    // the transaction id was already stored when the gateway was called
    assert!(calls.stored_before_checkout.load(Ordering::SeqCst));
    let request = calls.last_checkout.lock().unwrap().clone().unwrap();
    assert_eq!(request.merchant_order_id, booking.transaction_id);
    assert_eq!(request.amount_minor, 250_000);
    assert_eq!(
        request.redirect_url,
        format!("https://api.test/api/payment/callback?id={id}")
    );
}

#[tokio::test]
async fn test_double_submit_creates_two_bookings() {
    let (state, _) = test_state();
    let first = create_hotel(&state, "u1").await;
    let second = create_hotel(&state, "u1").await;
    assert_ne!(first, second);
    assert_eq!(
        queries::list_bookings(state.store.as_ref(), BookingKind::Hotel)
            .await
            .unwrap()
            .len(),
        2
    );
}

#[tokio::test]
async fn test_missing_checkout_url_discards_booking() {
    let mut gateway = MockGateway::new();
    gateway.checkout_url = None;
    let (state, calls) = test_state_with(test_config(), gateway);

    let res = send(
        &state,
        json_request(
            "POST",
            "/api/payment/initiate",
            Some(&token("u1", "customer")),
            hotel_body(json!(2500)),
        ),
    )
    .await;
    assert_eq!(res.status(), StatusCode::BAD_GATEWAY);
    assert_eq!(calls.checkouts.load(Ordering::SeqCst), 1);
    assert!(queries::list_all_bookings(state.store.as_ref())
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn test_unreachable_gateway_discards_booking() {
    let mut gateway = MockGateway::new();
    gateway.unreachable = true;
    let (state, _) = test_state_with(test_config(), gateway);

    let res = send(
        &state,
        json_request(
            "POST",
            "/api/payment/initiate",
            Some(&token("u1", "customer")),
            hotel_body(json!(2500)),
        ),
    )
    .await;
    assert_eq!(res.status(), StatusCode::BAD_GATEWAY);
    let json = body_json(res).await;
    // vendor detail stays in the logs
    assert!(!json["error"].as_str().unwrap().contains("connection refused"));
    assert!(queries::list_all_bookings(state.store.as_ref())
        .await
        .unwrap()
        .is_empty());
}

// ── Vehicle bookings ──

#[tokio::test]
async fn test_pay_at_pickup_confirmed_without_gateway() {
    let (state, calls) = test_state();
    let res = send(
        &state,
        json_request("POST", "/api/bookings/vehicle", None, vehicle_body("pay_at_pickup")),
    )
    .await;
    assert_eq!(res.status(), StatusCode::OK);
    let json = body_json(res).await;
    assert_eq!(json["status"], "confirmed");
    assert_eq!(json["paymentStatus"], "pay_at_pickup");
    assert!(json.get("url").is_none());
    assert_eq!(calls.checkouts.load(Ordering::SeqCst), 0);

    let booking = stored(&state, json["bookingId"].as_str().unwrap()).await;
    assert_eq!(booking.kind(), BookingKind::Vehicle);
    assert_eq!(booking.user_id, "guest");
    assert_eq!(booking.total_amount, 3000.0);
    assert_eq!(booking.status, BookingStatus::Confirmed);
}

#[tokio::test]
async fn test_vehicle_booking_with_bad_token_rejected() {
    let (state, _) = test_state();
    let res = send(
        &state,
        json_request(
            "POST",
            "/api/bookings/vehicle",
            Some("not-a-token"),
            vehicle_body("online"),
        ),
    )
    .await;
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_check_status_falls_back_to_vehicle_collection() {
    let mut gateway = MockGateway::new();
    gateway.order_state = OrderState::Completed;
    let (state, calls) = test_state_with(test_config(), gateway);

    let res = send(
        &state,
        json_request(
            "POST",
            "/api/bookings/vehicle",
            Some(&token("u2", "customer")),
            vehicle_body("online"),
        ),
    )
    .await;
    let json = body_json(res).await;
    assert_eq!(json["url"], "https://pay.example/abc");
    let id = json["bookingId"].as_str().unwrap().to_string();

    let res = send(&state, get_request(&format!("/api/payment/check/{id}"), None)).await;
    assert_eq!(res.status(), StatusCode::OK);
    let json = body_json(res).await;
    assert_eq!(json["success"], true);
    assert_eq!(json["status"], "confirmed");
    assert_eq!(json["paymentStatus"], "paid");
    assert_eq!(calls.status_checks.load(Ordering::SeqCst), 1);

    let booking = stored(&state, &id).await;
    assert_eq!(booking.kind(), BookingKind::Vehicle);
    assert_eq!(booking.user_id, "u2");
    assert_eq!(booking.status, BookingStatus::Confirmed);
}

// ── Callback reconciliation ──

#[tokio::test]
async fn test_end_to_end_hotel_payment_success() {
    let (state, _) = test_state();
    let id = create_hotel(&state, "u1").await;

    let res = callback(&state, &id, "PAYMENT_SUCCESS").await;
    assert_eq!(res.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&res), format!("https://app.test/book/success/{id}"));

    let booking = stored(&state, &id).await;
    assert_eq!(booking.status, BookingStatus::Confirmed);
    assert_eq!(booking.payment_status, PaymentStatus::Paid);
    assert!(booking.updated_at > booking.created_at);
    assert_eq!(booking.version, 2);
}

#[tokio::test]
async fn test_callback_failure_code() {
    let (state, _) = test_state();
    let id = create_hotel(&state, "u1").await;

    let res = callback(&state, &id, "PAYMENT_ERROR").await;
    assert_eq!(location(&res), format!("https://app.test/book/failure/{id}"));

    let booking = stored(&state, &id).await;
    assert_eq!(booking.status, BookingStatus::Failed);
    assert_eq!(booking.payment_status, PaymentStatus::Failed);
}

#[tokio::test]
async fn test_callback_unrecognized_code_defaults_to_success() {
    let (state, _) = test_state();
    let id = create_hotel(&state, "u1").await;

    callback(&state, &id, "SOMETHING_UNEXPECTED").await;

    let booking = stored(&state, &id).await;
    assert_eq!(booking.status, BookingStatus::Confirmed);
    assert_eq!(booking.payment_status, PaymentStatus::Paid);
}

#[tokio::test]
async fn test_strict_policy_leaves_unknown_code_pending() {
    let mut config = test_config();
    config.strict_callback_codes = true;
    let (state, _) = test_state_with(config, MockGateway::new());
    let id = create_hotel(&state, "u1").await;

    let res = callback(&state, &id, "SOMETHING_UNEXPECTED").await;
    assert_eq!(location(&res), format!("https://app.test/book/verify/{id}"));
    assert_eq!(stored(&state, &id).await.status, BookingStatus::Pending);

    callback(&state, &id, "PAYMENT_SUCCESS").await;
    assert_eq!(stored(&state, &id).await.status, BookingStatus::Confirmed);
}

#[tokio::test]
async fn test_terminal_booking_not_overwritten_by_callback() {
    let (state, _) = test_state();
    let id = create_hotel(&state, "u1").await;

    callback(&state, &id, "PAYMENT_SUCCESS").await;
    let res = callback(&state, &id, "PAYMENT_ERROR").await;
    assert_eq!(location(&res), format!("https://app.test/book/success/{id}"));

    let booking = stored(&state, &id).await;
    assert_eq!(booking.status, BookingStatus::Confirmed);
    assert_eq!(booking.version, 2);
}

#[tokio::test]
async fn test_callback_without_code_asks_gateway() {
    let mut gateway = MockGateway::new();
    gateway.order_state = OrderState::Failed;
    let (state, calls) = test_state_with(test_config(), gateway);
    let id = create_hotel(&state, "u1").await;

    let res = send(
        &state,
        get_request(&format!("/api/payment/callback?id={id}"), None),
    )
    .await;
    assert_eq!(location(&res), format!("https://app.test/book/failure/{id}"));
    assert_eq!(calls.status_checks.load(Ordering::SeqCst), 1);
    assert_eq!(stored(&state, &id).await.status, BookingStatus::Failed);
}

#[tokio::test]
async fn test_callback_post_form() {
    let (state, _) = test_state();
    let id = create_hotel(&state, "u1").await;

    let res = send(
        &state,
        Request::builder()
            .method("POST")
            .uri(format!("/api/payment/callback?id={id}"))
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from("code=PAYMENT_DECLINED"))
            .unwrap(),
    )
    .await;
    assert_eq!(res.status(), StatusCode::SEE_OTHER);
    assert_eq!(stored(&state, &id).await.status, BookingStatus::Failed);
}

#[tokio::test]
async fn test_callback_post_without_form_body_uses_query() {
    let (state, _) = test_state();
    let id = create_hotel(&state, "u1").await;

    let res = send(
        &state,
        Request::builder()
            .method("POST")
            .uri(format!("/api/payment/callback?id={id}&code=PAYMENT_SUCCESS"))
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(res.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&res), format!("https://app.test/book/success/{id}"));
    assert_eq!(stored(&state, &id).await.status, BookingStatus::Confirmed);
}

#[tokio::test]
async fn test_app_callback_post_with_json_body_uses_query() {
    let (state, _) = test_state();
    let id = create_hotel(&state, "u1").await;

    let res = send(
        &state,
        json_request(
            "POST",
            &format!("/api/payment/callback-app?id={id}&code=PAYMENT_ERROR"),
            None,
            json!({ "unexpected": true }),
        ),
    )
    .await;
    assert_eq!(res.status(), StatusCode::OK);
    let html = body_text(res).await;
    assert!(html.contains(&format!(
        "tripdesk://payment-result?bookingId={id}&status=failed"
    )));
    assert_eq!(stored(&state, &id).await.status, BookingStatus::Failed);
}

#[tokio::test]
async fn test_callback_unknown_booking_redirects_to_failure() {
    let (state, _) = test_state();
    let res = callback(&state, "does-not-exist", "PAYMENT_SUCCESS").await;
    assert_eq!(res.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&res), "https://app.test/book/failure/does-not-exist");
}

#[tokio::test]
async fn test_app_callback_returns_deep_link_page() {
    let (state, calls) = test_state();
    let mut body = hotel_body(json!(1800));
    body["source"] = json!("mobile");
    let res = send(
        &state,
        json_request(
            "POST",
            "/api/payment/initiate",
            Some(&token("u1", "customer")),
            body,
        ),
    )
    .await;
    let id = body_json(res).await["bookingId"]
        .as_str()
        .unwrap()
        .to_string();
    let request = calls.last_checkout.lock().unwrap().clone().unwrap();
    assert_eq!(
        request.redirect_url,
        format!("https://api.test/api/payment/callback-app?id={id}")
    );

    let res = send(
        &state,
        get_request(
            &format!("/api/payment/callback-app?id={id}&code=PAYMENT_SUCCESS"),
            None,
        ),
    )
    .await;
    assert_eq!(res.status(), StatusCode::OK);
    let html = body_text(res).await;
    assert!(html.contains(&format!(
        "tripdesk://payment-result?bookingId={id}&status=confirmed"
    )));
    assert_eq!(stored(&state, &id).await.payment_status, PaymentStatus::Paid);
}

// ── Status polling ──

#[tokio::test]
async fn test_check_status_short_circuits_terminal_booking() {
    let (state, calls) = test_state();
    let id = create_hotel(&state, "u1").await;
    callback(&state, &id, "PAYMENT_SUCCESS").await;

    for _ in 0..3 {
        let res = send(&state, get_request(&format!("/api/payment/check/{id}"), None)).await;
        let json = body_json(res).await;
        assert_eq!(json["status"], "confirmed");
        assert_eq!(json["paymentStatus"], "paid");
    }
    assert_eq!(calls.status_checks.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_check_status_pending_gateway_leaves_booking_untouched() {
    let (state, calls) = test_state();
    let id = create_hotel(&state, "u1").await;

    let res = send(&state, get_request(&format!("/api/payment/check/{id}"), None)).await;
    let json = body_json(res).await;
    assert_eq!(json["status"], "pending");
    assert_eq!(calls.status_checks.load(Ordering::SeqCst), 1);
    assert_eq!(stored(&state, &id).await.version, 1);
}

#[tokio::test]
async fn test_check_status_gateway_down() {
    let mut gateway = MockGateway::new();
    gateway.unreachable = true;
    let (state, _) = test_state_with(test_config(), gateway);

    let mut booking = Booking::new_pending(
        queries::new_document_id(),
        "u1".to_string(),
        serde_json::from_value(json!({"id": "h1", "name": "Inn"})).unwrap(),
        serde_json::from_value(json!({
            "type": "hotel",
            "checkIn": "2025-01-01",
            "checkOut": "2025-01-02",
            "guests": 1,
            "rooms": 1,
            "guestName": "A",
            "guestEmail": "a@example.com"
        }))
        .unwrap(),
        1000.0,
    );
    queries::insert_booking(state.store.as_ref(), &mut booking)
        .await
        .unwrap();

    let res = send(
        &state,
        get_request(&format!("/api/payment/check/{}", booking.id), None),
    )
    .await;
    assert_eq!(res.status(), StatusCode::BAD_GATEWAY);
    assert_eq!(stored(&state, &booking.id).await.status, BookingStatus::Pending);
}

#[tokio::test]
async fn test_check_status_not_found() {
    let (state, _) = test_state();
    let res = send(&state, get_request("/api/payment/check/nope", None)).await;
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
}

// ── Concurrent writers ──

#[tokio::test]
async fn test_callback_keeps_competing_terminal_state() {
    let racing = Arc::new(RacingStore::new());
    let store: Arc<dyn DocumentStore> = racing.clone();
    let (state, _) = state_over(store, test_config(), MockGateway::new());
    let id = create_hotel(&state, "u1").await;

    // another writer settles the booking as failed first
    racing.arm(|data| {
        data["status"] = json!("failed");
        data["paymentStatus"] = json!("failed");
    });

    let res = callback(&state, &id, "PAYMENT_SUCCESS").await;
    assert_eq!(res.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&res), format!("https://app.test/book/failure/{id}"));
    assert_eq!(racing.races.load(Ordering::SeqCst), 1);

    let booking = stored(&state, &id).await;
    assert_eq!(booking.status, BookingStatus::Failed);
    assert_eq!(booking.payment_status, PaymentStatus::Failed);
    assert_eq!(booking.version, 2);
}

#[tokio::test]
async fn test_support_ticket_survives_concurrent_update() {
    let racing = Arc::new(RacingStore::new());
    let store: Arc<dyn DocumentStore> = racing.clone();
    let (state, _) = state_over(store, test_config(), MockGateway::new());
    let id = create_hotel(&state, "u1").await;

    racing.arm(|data| {
        data["supportTickets"]
            .as_array_mut()
            .unwrap()
            .push(json!({
                "type": "billing",
                "message": "from the app",
                "createdAt": chrono::Utc::now().to_rfc3339(),
                "status": "open"
            }));
    });

    let res = send(
        &state,
        json_request(
            "POST",
            &format!("/api/bookings/{id}/support"),
            Some(&token("u1", "customer")),
            json!({ "type": "refund", "message": "from the web" }),
        ),
    )
    .await;
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(racing.races.load(Ordering::SeqCst), 1);

    let booking = stored(&state, &id).await;
    assert_eq!(booking.support_tickets.len(), 2);
    assert_eq!(booking.support_tickets[0].message, "from the app");
    assert_eq!(booking.support_tickets[1].message, "from the web");
    assert_eq!(booking.version, 3);
}

// ── Live status ──

#[tokio::test]
async fn test_booking_events_stream_status_changes() {
    let (state, _) = test_state();
    let id = create_hotel(&state, "u1").await;

    let res = send(
        &state,
        get_request(&format!("/api/bookings/{id}/events"), None),
    )
    .await;
    assert_eq!(res.status(), StatusCode::OK);
    assert!(res
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .starts_with("text/event-stream"));

    let mut events = res.into_body().into_data_stream();
    let first = read_until(&mut events, "\n\n").await;
    assert!(first.contains("event: status"));
    assert!(first.contains("\"status\":\"pending\""));

    callback(&state, &id, "PAYMENT_SUCCESS").await;

    let next = read_until(&mut events, "confirmed").await;
    assert!(next.contains("\"status\":\"confirmed\""));
    assert!(next.contains("\"paymentStatus\":\"paid\""));
}

#[tokio::test]
async fn test_booking_events_unknown_booking() {
    let (state, _) = test_state();
    let res = send(&state, get_request("/api/bookings/nope/events", None)).await;
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
}

// ── Webhook ──

#[tokio::test]
async fn test_signed_webhook_reconciles_by_transaction_id() {
    let mut config = test_config();
    config.webhook_secret = "whsec".to_string();
    let (state, _) = test_state_with(config, MockGateway::new());
    let id = create_hotel(&state, "u1").await;
    let transaction_id = stored(&state, &id).await.transaction_id;

    let payload = json!({
        "event": "checkout.order.completed",
        "payload": { "merchantOrderId": transaction_id, "state": "COMPLETED" }
    })
    .to_string();

    let unsigned = send(
        &state,
        Request::builder()
            .method("POST")
            .uri("/api/payment/webhook")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(payload.clone()))
            .unwrap(),
    )
    .await;
    assert_eq!(unsigned.status(), StatusCode::FORBIDDEN);
    assert_eq!(stored(&state, &id).await.status, BookingStatus::Pending);

    let signature = handlers::webhook::sign_payload("whsec", payload.as_bytes()).unwrap();
    let res = send(
        &state,
        Request::builder()
            .method("POST")
            .uri("/api/payment/webhook")
            .header(header::CONTENT_TYPE, "application/json")
            .header(handlers::webhook::SIGNATURE_HEADER, signature)
            .body(Body::from(payload))
            .unwrap(),
    )
    .await;
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(body_json(res).await["status"], "confirmed");
    assert_eq!(stored(&state, &id).await.payment_status, PaymentStatus::Paid);
}

// ── Cancellation & support ──

#[tokio::test]
async fn test_cancel_booking_rules() {
    let (state, _) = test_state();
    let id = create_hotel(&state, "u1").await;
    let owner = token("u1", "customer");

    // pending bookings cannot be cancelled
    let res = send(
        &state,
        json_request("POST", &format!("/api/bookings/{id}/cancel"), Some(&owner), json!({})),
    )
    .await;
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);

    callback(&state, &id, "PAYMENT_SUCCESS").await;

    let res = send(
        &state,
        json_request(
            "POST",
            &format!("/api/bookings/{id}/cancel"),
            Some(&token("someone-else", "customer")),
            json!({}),
        ),
    )
    .await;
    assert_eq!(res.status(), StatusCode::FORBIDDEN);

    let res = send(
        &state,
        json_request("POST", &format!("/api/bookings/{id}/cancel"), Some(&owner), json!({})),
    )
    .await;
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(body_json(res).await["status"], "cancelled");

    // a late success callback does not resurrect it
    callback(&state, &id, "PAYMENT_SUCCESS").await;
    assert_eq!(stored(&state, &id).await.status, BookingStatus::Cancelled);
}

#[tokio::test]
async fn test_support_tickets_are_appended() {
    let (state, _) = test_state();
    let id = create_hotel(&state, "u1").await;
    let owner = token("u1", "customer");

    for message in ["first", "second"] {
        let res = send(
            &state,
            json_request(
                "POST",
                &format!("/api/bookings/{id}/support"),
                Some(&owner),
                json!({ "type": "refund", "message": message }),
            ),
        )
        .await;
        assert_eq!(res.status(), StatusCode::OK);
    }

    let booking = stored(&state, &id).await;
    assert_eq!(booking.support_tickets.len(), 2);
    assert_eq!(booking.support_tickets[0].message, "first");
    assert_eq!(booking.support_tickets[1].status, "open");
    assert_eq!(booking.status, BookingStatus::Pending);
}

#[tokio::test]
async fn test_my_bookings() {
    let (state, _) = test_state();
    create_hotel(&state, "u1").await;
    create_hotel(&state, "u1").await;
    create_hotel(&state, "u2").await;

    let res = send(
        &state,
        get_request("/api/bookings/mine", Some(&token("u1", "customer"))),
    )
    .await;
    let json: Vec<Value> = serde_json::from_value(body_json(res).await).unwrap();
    assert_eq!(json.len(), 2);
    assert!(json.iter().all(|b| b["userId"] == "u1"));
}

// ── Admin ──

#[tokio::test]
async fn test_admin_routes_require_admin_role() {
    let (state, _) = test_state();
    let res = send(&state, get_request("/api/admin/bookings", None)).await;
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

    let res = send(
        &state,
        get_request("/api/admin/bookings", Some(&token("u1", "customer"))),
    )
    .await;
    assert_eq!(res.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_admin_lists_both_collections_newest_first() {
    let (state, _) = test_state();

    let res = send(
        &state,
        json_request(
            "PUT",
            "/api/users/me",
            Some(&token("u1", "customer")),
            json!({ "displayName": "Asha Rao" }),
        ),
    )
    .await;
    assert_eq!(res.status(), StatusCode::OK);

    let hotel_id = create_hotel(&state, "u1").await;
    let res = send(
        &state,
        json_request("POST", "/api/bookings/vehicle", None, vehicle_body("pay_at_pickup")),
    )
    .await;
    let vehicle_id = body_json(res).await["bookingId"]
        .as_str()
        .unwrap()
        .to_string();

    let res = send(
        &state,
        get_request("/api/admin/bookings", Some(&token("admin-1", "admin"))),
    )
    .await;
    assert_eq!(res.status(), StatusCode::OK);
    let json: Vec<Value> = serde_json::from_value(body_json(res).await).unwrap();
    assert_eq!(json.len(), 2);

    assert_eq!(json[0]["id"], vehicle_id.as_str());
    assert_eq!(json[0]["kind"], "vehicle");
    assert_eq!(json[0]["amount"], 3000.0);
    assert_eq!(json[0]["startDate"], "2025-06-01");
    assert!(json[0]["userName"].is_null());

    assert_eq!(json[1]["id"], hotel_id.as_str());
    assert_eq!(json[1]["kind"], "hotel");
    assert_eq!(json[1]["userName"], "Asha Rao");
    assert_eq!(json[1]["startDate"], "2025-05-01");
}

#[tokio::test]
async fn test_admin_get_booking_by_query() {
    let (state, _) = test_state();
    let id = create_hotel(&state, "u1").await;

    let res = send(
        &state,
        get_request(&format!("/api/bookings?id={id}"), Some(&token("admin-1", "admin"))),
    )
    .await;
    assert_eq!(res.status(), StatusCode::OK);
    let json = body_json(res).await;
    assert_eq!(json["id"], id.as_str());
    assert_eq!(json["listingName"], "Lakeview Inn");
    assert_eq!(json["amount"], 2500.0);

    let res = send(
        &state,
        get_request("/api/bookings?id=missing", Some(&token("admin-1", "admin"))),
    )
    .await;
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_admin_override_restores_failed_booking() {
    let (state, _) = test_state();
    let id = create_hotel(&state, "u1").await;
    callback(&state, &id, "PAYMENT_ERROR").await;

    let res = send(
        &state,
        json_request(
            "POST",
            &format!("/api/admin/bookings/{id}/status"),
            Some(&token("admin-1", "admin")),
            json!({ "status": "confirmed" }),
        ),
    )
    .await;
    assert_eq!(res.status(), StatusCode::OK);

    let booking = stored(&state, &id).await;
    assert_eq!(booking.status, BookingStatus::Confirmed);
    assert_eq!(booking.payment_status, PaymentStatus::Paid);
}

#[tokio::test]
async fn test_revenue_scoped_to_partner() {
    let (state, _) = test_state();

    let paid = create_hotel(&state, "u1").await;
    callback(&state, &paid, "PAYMENT_SUCCESS").await;
    create_hotel(&state, "u1").await; // still pending, not revenue
    send(
        &state,
        json_request("POST", "/api/bookings/vehicle", None, vehicle_body("pay_at_pickup")),
    )
    .await;

    let res = send(
        &state,
        get_request("/api/admin/revenue?range=today", Some(&token("admin-1", "admin"))),
    )
    .await;
    assert_eq!(res.status(), StatusCode::OK);
    let json = body_json(res).await;
    assert_eq!(json["bookingCount"], 2);
    assert_eq!(json["totalRevenue"], 5500.0);
    assert_eq!(json["hotelRevenue"], 2500.0);
    assert_eq!(json["vehicleRevenue"], 3000.0);
    assert_eq!(json["partnerShare"], 4400.0);
    assert_eq!(json["platformShare"], 1100.0);

    // partner-1 owns the hotel only, whatever partnerId they ask for
    let res = send(
        &state,
        get_request(
            "/api/admin/revenue?partnerId=partner-2",
            Some(&token("partner-1", "partner")),
        ),
    )
    .await;
    let json = body_json(res).await;
    assert_eq!(json["bookingCount"], 1);
    assert_eq!(json["totalRevenue"], 2500.0);

    let res = send(
        &state,
        get_request("/api/admin/revenue", Some(&token("u1", "customer"))),
    )
    .await;
    assert_eq!(res.status(), StatusCode::FORBIDDEN);

    let res = send(
        &state,
        get_request("/api/admin/revenue?range=forever", Some(&token("admin-1", "admin"))),
    )
    .await;
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
}
