// Each integration test binary compiles this module separately and uses a
// subset of its helpers.
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{Method, Request},
    middleware, Router,
};
use chrono::Utc;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use sea_orm::{ActiveModelTrait, Set};
use serde_json::Value;
use tokio::sync::mpsc;
use tower::ServiceExt;
use uuid::Uuid;
use voltcart_api::{
    config::AppConfig,
    db,
    entities::{
        order, order_item, service_category, service_offering, FulfillmentStatus, OrderModel,
        PaymentStatus,
    },
    events::{self, EventSender},
    gateway::{CheckoutGateway, CreateSessionRequest, GatewayError, GatewaySession},
    handlers::AppServices,
    request_id::request_id_middleware,
    AppState,
};

/// Scripted payment gateway standing in for the hosted checkout provider.
///
/// Created sessions start out `unpaid` and become retrievable immediately;
/// `mark_paid` simulates the customer finishing payment on the hosted page.
pub struct StubGateway {
    created: Mutex<Vec<CreateSessionRequest>>,
    sessions: Mutex<HashMap<String, GatewaySession>>,
    fail_create: Mutex<Option<GatewayError>>,
}

impl StubGateway {
    pub fn new() -> Self {
        Self {
            created: Mutex::new(Vec::new()),
            sessions: Mutex::new(HashMap::new()),
            fail_create: Mutex::new(None),
        }
    }

    /// Every create_session request seen so far, in call order.
    pub fn created(&self) -> Vec<CreateSessionRequest> {
        self.created.lock().unwrap().clone()
    }

    /// Makes a session retrievable without going through creation.
    pub fn stage_session(&self, session: GatewaySession) {
        self.sessions
            .lock()
            .unwrap()
            .insert(session.id.clone(), session);
    }

    /// Fails the next create_session call with the given error.
    pub fn fail_next_create(&self, error: GatewayError) {
        *self.fail_create.lock().unwrap() = Some(error);
    }

    /// Flips a created session to paid, as if the customer completed the
    /// hosted payment page.
    pub fn mark_paid(&self, session_id: &str) {
        if let Some(session) = self.sessions.lock().unwrap().get_mut(session_id) {
            session.payment_status = "paid".to_string();
            session.payment_intent_id = Some(format!("pi_{}", Uuid::new_v4().simple()));
        }
    }
}

#[async_trait]
impl CheckoutGateway for StubGateway {
    async fn create_session(
        &self,
        request: CreateSessionRequest,
    ) -> Result<GatewaySession, GatewayError> {
        if let Some(error) = self.fail_create.lock().unwrap().take() {
            return Err(error);
        }

        let amount_total: i64 = request
            .line_items
            .iter()
            .map(|item| item.unit_amount * item.quantity)
            .sum();

        let mut created = self.created.lock().unwrap();
        let id = format!("cs_test_{}", created.len() + 1);
        let session = GatewaySession {
            id: id.clone(),
            url: Some(format!("https://pay.test/c/{}", id)),
            payment_status: "unpaid".to_string(),
            amount_total: Some(amount_total),
            payment_intent_id: None,
            metadata: request.metadata.clone(),
        };
        created.push(request);
        drop(created);

        self.sessions.lock().unwrap().insert(id, session.clone());
        Ok(session)
    }

    async fn retrieve_session(
        &self,
        session_id: &str,
        _expand: &[&str],
    ) -> Result<GatewaySession, GatewayError> {
        self.sessions
            .lock()
            .unwrap()
            .get(session_id)
            .cloned()
            .ok_or_else(|| {
                GatewayError::NotFound(format!("No such checkout.session: {}", session_id))
            })
    }
}

/// Helper harness spinning up full application state on a private in-memory
/// SQLite database, with the real routes and request-id middleware mounted.
pub struct TestApp {
    router: Router,
    pub state: AppState,
    pub gateway: Arc<StubGateway>,
    _event_task: tokio::task::JoinHandle<()>,
}

impl TestApp {
    /// Construct a test application with fresh database state.
    pub async fn new() -> Self {
        Self::with_gateway(Arc::new(StubGateway::new())).await
    }

    pub async fn with_gateway(gateway: Arc<StubGateway>) -> Self {
        let mut cfg = AppConfig::new(
            "sqlite::memory:".to_string(),
            "sk_test_voltcart".to_string(),
            "127.0.0.1".to_string(),
            18_080,
            "test".to_string(),
        );
        // A single pooled connection pins the private in-memory database,
        // and its migrated schema, for the lifetime of the harness.
        cfg.db_max_connections = 1;
        cfg.db_min_connections = 1;

        let pool = db::establish_connection_from_app_config(&cfg)
            .await
            .expect("failed to create test database");
        db::run_migrations(&pool)
            .await
            .expect("failed to run migrations in tests");

        let db_arc = Arc::new(pool);
        let cfg = Arc::new(cfg);
        let (event_tx, event_rx) = mpsc::channel(256);
        let event_sender = Arc::new(EventSender::new(event_tx));
        let event_task = tokio::spawn(events::process_events(event_rx));

        let services = AppServices::new(
            db_arc.clone(),
            cfg.clone(),
            event_sender.clone(),
            gateway.clone() as Arc<dyn CheckoutGateway>,
        );

        let state = AppState {
            db: db_arc,
            config: cfg,
            event_sender,
            services,
        };

        let router = Router::new()
            .merge(voltcart_api::app_routes())
            .layer(middleware::from_fn(request_id_middleware))
            .with_state(state.clone());

        Self {
            router,
            state,
            gateway,
            _event_task: event_task,
        }
    }

    /// Send a request against the router, JSON body optional.
    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
    ) -> axum::response::Response {
        self.request_with_headers(method, uri, body, &[]).await
    }

    pub async fn request_with_headers(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
        headers: &[(&str, &str)],
    ) -> axum::response::Response {
        let mut builder = Request::builder().method(method).uri(uri);
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }

        let body = if let Some(json) = body {
            builder = builder.header("content-type", "application/json");
            Body::from(serde_json::to_vec(&json).expect("failed to serialize json request body"))
        } else {
            Body::empty()
        };

        let request = builder.body(body).expect("failed to build request");
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router error during test request")
    }

    pub async fn seed_category(&self, name: &str) -> service_category::Model {
        let now = Utc::now();
        service_category::ActiveModel {
            id: Set(Uuid::new_v4()),
            name: Set(name.to_string()),
            image_url: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&*self.state.db)
        .await
        .expect("seed service category")
    }

    pub async fn seed_service(
        &self,
        name: &str,
        category: &str,
        price: Decimal,
    ) -> service_offering::Model {
        let now = Utc::now();
        service_offering::ActiveModel {
            id: Set(Uuid::new_v4()),
            name: Set(name.to_string()),
            category_name: Set(category.to_string()),
            image_url: Set(None),
            price: Set(price),
            duration_minutes: Set(60),
            description: Set(Some(format!("{} by a certified electrician", name))),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&*self.state.db)
        .await
        .expect("seed service offering")
    }

    /// Inserts a reconciled order with one line item straight into the
    /// database, bypassing the checkout pipeline.
    pub async fn seed_order(&self, customer_id: &str, status: FulfillmentStatus) -> OrderModel {
        self.seed_order_with(customer_id, None, status).await
    }

    pub async fn seed_assigned_order(
        &self,
        customer_id: &str,
        technician_id: &str,
        status: FulfillmentStatus,
    ) -> OrderModel {
        self.seed_order_with(customer_id, Some(technician_id), status)
            .await
    }

    async fn seed_order_with(
        &self,
        customer_id: &str,
        technician_id: Option<&str>,
        status: FulfillmentStatus,
    ) -> OrderModel {
        let now = Utc::now();
        let order_id = Uuid::new_v4();
        let order = order::ActiveModel {
            id: Set(order_id),
            customer_id: Set(customer_id.to_string()),
            subtotal: Set(dec!(300.00)),
            total: Set(dec!(300.00)),
            first_name: Set("Ada".to_string()),
            last_name: Set("Lovelace".to_string()),
            email: Set("ada@example.com".to_string()),
            address: Set("12 Relay Road".to_string()),
            city: Set("Pune".to_string()),
            state: Set("MH".to_string()),
            zipcode: Set("411001".to_string()),
            notes: Set(String::new()),
            checkout_session_id: Set(format!("cs_test_seed_{}", Uuid::new_v4().simple())),
            payment_intent_id: Set(Some(format!("pi_seed_{}", Uuid::new_v4().simple()))),
            gateway_payment_status: Set("paid".to_string()),
            amount_total: Set(30_000),
            payment_status: Set(PaymentStatus::Paid),
            status: Set(status),
            technician_id: Set(technician_id.map(str::to_string)),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&*self.state.db)
        .await
        .expect("seed order");

        order_item::ActiveModel {
            id: Set(Uuid::new_v4()),
            order_id: Set(order_id),
            name: Set("Wiring Repair".to_string()),
            quantity: Set(2),
            unit_price: Set(dec!(150.00)),
            created_at: Set(now),
        }
        .insert(&*self.state.db)
        .await
        .expect("seed order item");

        order
    }
}

impl Drop for TestApp {
    fn drop(&mut self) {
        self._event_task.abort();
    }
}

/// Collects a response body into JSON.
pub async fn response_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("failed to read response body");
    serde_json::from_slice(&bytes).expect("response body should be valid json")
}
