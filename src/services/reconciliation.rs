use crate::{
    entities::{order, order_item, FulfillmentStatus, Order, OrderModel, PaymentStatus},
    errors::ServiceError,
    events::{Event, EventSender},
    gateway::{CheckoutGateway, GatewayError, GatewaySession, SESSION_ID_PREFIX},
    retry::{with_retry, RetryConfig},
    services::carts::CartService,
    services::checkout::parse_cart_payload,
};
use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, DbErr, EntityTrait, QueryFilter, Set,
    TransactionTrait,
};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

const SESSION_EXPAND: &[&str] = &["line_items", "payment_intent"];

/// Settles a finished hosted-checkout back into a durable order.
///
/// The gateway redirects the customer to us with only a session id. This
/// service verifies the payment server-side (retrying transient gateway
/// failures), rebuilds the order from the session metadata we planted at
/// initiation, persists it exactly once, and clears the customer's cart.
/// Duplicate deliveries of the same redirect are treated as success.
#[derive(Clone)]
pub struct ReconciliationService {
    db: Arc<DatabaseConnection>,
    event_sender: Arc<EventSender>,
    gateway: Arc<dyn CheckoutGateway>,
    carts: CartService,
    retry_config: RetryConfig,
}

/// How a reconciliation run ended: a fresh order, or one a previous
/// delivery of the same redirect already recorded.
#[derive(Debug)]
pub enum ReconciliationOutcome {
    Created(OrderModel),
    AlreadyRecorded(OrderModel),
}

impl ReconciliationOutcome {
    pub fn order(&self) -> &OrderModel {
        match self {
            ReconciliationOutcome::Created(order) => order,
            ReconciliationOutcome::AlreadyRecorded(order) => order,
        }
    }
}

impl ReconciliationService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        event_sender: Arc<EventSender>,
        gateway: Arc<dyn CheckoutGateway>,
        carts: CartService,
        retry_config: RetryConfig,
    ) -> Self {
        Self {
            db,
            event_sender,
            gateway,
            carts,
            retry_config,
        }
    }

    /// Runs the full reconciliation pipeline for a redirect-delivered
    /// session id.
    #[instrument(skip(self))]
    pub async fn finalize_checkout(
        &self,
        session_id: Option<&str>,
    ) -> Result<ReconciliationOutcome, ServiceError> {
        let session_id = session_id
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or(ServiceError::MissingSessionId)?;

        if !session_id.starts_with(SESSION_ID_PREFIX) {
            return Err(ServiceError::MalformedSessionId(session_id.to_string()));
        }

        let session = self.retrieve_session_with_retry(session_id).await?;

        if session.payment_status != "paid" {
            return Err(ServiceError::PaymentIncomplete(
                session.payment_status.clone(),
            ));
        }

        // Empty metadata values count as missing: the gateway only speaks
        // strings, so "" is its null.
        let customer_id = session
            .metadata
            .get("user")
            .filter(|s| !s.trim().is_empty())
            .cloned()
            .ok_or_else(|| ServiceError::MissingSessionMetadata("user".to_string()))?;
        let cart_data = session
            .metadata
            .get("data")
            .filter(|s| !s.trim().is_empty())
            .cloned()
            .ok_or_else(|| ServiceError::MissingSessionMetadata("data".to_string()))?;

        let payload = parse_cart_payload(&cart_data)
            .map_err(|e| ServiceError::CartDataCorrupted(e.to_string()))?;

        let derived: Decimal = payload
            .products
            .iter()
            .map(|p| p.unit_price * Decimal::from(p.quantity))
            .sum();
        let subtotal = payload.subtotal.unwrap_or(derived);
        let total = payload.total.unwrap_or(derived);

        if let Some(existing) = self.find_order_by_session(&session.id).await? {
            info!(
                "Session {} already reconciled as order {}",
                session.id, existing.id
            );
            return Ok(ReconciliationOutcome::AlreadyRecorded(existing));
        }

        let order = self
            .persist_order(&session, &customer_id, subtotal, total, &payload.products)
            .await?;

        let order = match order {
            Persisted::Fresh(order) => order,
            Persisted::Raced(existing) => {
                info!(
                    "Session {} was reconciled concurrently as order {}",
                    session.id, existing.id
                );
                return Ok(ReconciliationOutcome::AlreadyRecorded(existing));
            }
        };

        // Best effort only. The customer may never have had a server-side
        // cart, and a failed clear must not undo a recorded payment.
        match self.carts.clear_cart(&customer_id).await {
            Ok(()) => {}
            Err(ServiceError::NotFound(_)) => {
                debug!("No cart to clear for customer {}", customer_id);
            }
            Err(e) => {
                warn!(error = %e, customer_id = %customer_id, "Failed to clear cart after checkout");
            }
        }

        if let Err(e) = self
            .event_sender
            .send(Event::OrderCreated {
                order_id: order.id,
                session_id: session.id.clone(),
            })
            .await
        {
            warn!(error = %e, order_id = %order.id, "Failed to send order created event");
        }

        info!("Recorded order {} for session {}", order.id, session.id);
        Ok(ReconciliationOutcome::Created(order))
    }

    /// Fetches the session with line items and payment intent expanded.
    /// The gateway's not-found class is terminal after one attempt; every
    /// other failure class is retried on the configured backoff schedule.
    async fn retrieve_session_with_retry(
        &self,
        session_id: &str,
    ) -> Result<GatewaySession, ServiceError> {
        let result = with_retry(
            &self.retry_config,
            |error: &GatewayError| !error.is_not_found(),
            || self.gateway.retrieve_session(session_id, SESSION_EXPAND),
        )
        .await;

        match result {
            Ok(session) => Ok(session),
            Err(error) if error.is_not_found() => {
                Err(ServiceError::SessionNotFound(session_id.to_string()))
            }
            Err(error) => {
                warn!(error = %error, session_id, "Session retrieval exhausted retries");
                Err(ServiceError::SessionRetrievalFailed {
                    attempts: self.retry_config.max_attempts,
                })
            }
        }
    }

    async fn find_order_by_session(
        &self,
        session_id: &str,
    ) -> Result<Option<OrderModel>, ServiceError> {
        Ok(Order::find()
            .filter(order::Column::CheckoutSessionId.eq(session_id))
            .one(&*self.db)
            .await?)
    }

    async fn persist_order(
        &self,
        session: &GatewaySession,
        customer_id: &str,
        subtotal: Decimal,
        total: Decimal,
        products: &[crate::services::checkout::CartProduct],
    ) -> Result<Persisted, ServiceError> {
        let meta = |key: &str| session.metadata.get(key).cloned().unwrap_or_default();
        let now = Utc::now();
        let order_id = Uuid::new_v4();

        let order_row = order::ActiveModel {
            id: Set(order_id),
            customer_id: Set(customer_id.to_string()),
            subtotal: Set(subtotal),
            total: Set(total),
            first_name: Set(meta("fname")),
            last_name: Set(meta("lname")),
            email: Set(meta("email")),
            address: Set(meta("address")),
            city: Set(meta("city")),
            state: Set(meta("state")),
            zipcode: Set(meta("zipcode")),
            notes: Set(meta("notes")),
            checkout_session_id: Set(session.id.clone()),
            payment_intent_id: Set(session.payment_intent_id.clone()),
            gateway_payment_status: Set(session.payment_status.clone()),
            amount_total: Set(session.amount_total.unwrap_or_default()),
            payment_status: Set(PaymentStatus::Paid),
            status: Set(FulfillmentStatus::Pending),
            technician_id: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        };

        let mut item_rows = Vec::with_capacity(products.len());
        for product in products {
            let quantity = i32::try_from(product.quantity).map_err(|_| {
                ServiceError::CartDataCorrupted(format!(
                    "Quantity out of range for product: {}",
                    product.name
                ))
            })?;
            item_rows.push(order_item::ActiveModel {
                id: Set(Uuid::new_v4()),
                order_id: Set(order_id),
                name: Set(product.name.clone()),
                quantity: Set(quantity),
                unit_price: Set(product.unit_price),
                created_at: Set(now),
            });
        }

        let txn = self.db.begin().await?;
        let inserted: Result<OrderModel, DbErr> = async {
            let order = order_row.insert(&txn).await?;
            for item in item_rows {
                item.insert(&txn).await?;
            }
            Ok(order)
        }
        .await;

        match inserted {
            Ok(order) => {
                txn.commit().await?;
                Ok(Persisted::Fresh(order))
            }
            Err(insert_err) => {
                if let Err(e) = txn.rollback().await {
                    warn!(error = %e, "Failed to roll back order insert transaction");
                }
                // The unique index on checkout_session_id turns a duplicate
                // delivery race into an insert failure; re-check before
                // giving up.
                match self.find_order_by_session(&session.id).await? {
                    Some(existing) => Ok(Persisted::Raced(existing)),
                    None => Err(insert_err.into()),
                }
            }
        }
    }
}

enum Persisted {
    Fresh(OrderModel),
    Raced(OrderModel),
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use async_trait::async_trait;
    use sea_orm::Database;
    use std::collections::{BTreeMap, VecDeque};
    use std::sync::Mutex;
    use tokio::sync::mpsc;
    use tokio::time::Instant;

    struct ScriptedGateway {
        responses: Mutex<VecDeque<Result<GatewaySession, GatewayError>>>,
        call_instants: Mutex<Vec<Instant>>,
    }

    impl ScriptedGateway {
        fn new(responses: Vec<Result<GatewaySession, GatewayError>>) -> Self {
            Self {
                responses: Mutex::new(responses.into()),
                call_instants: Mutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> usize {
            self.call_instants.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl CheckoutGateway for ScriptedGateway {
        async fn create_session(
            &self,
            _request: crate::gateway::CreateSessionRequest,
        ) -> Result<GatewaySession, GatewayError> {
            Err(GatewayError::Transport("not scripted".to_string()))
        }

        async fn retrieve_session(
            &self,
            _session_id: &str,
            _expand: &[&str],
        ) -> Result<GatewaySession, GatewayError> {
            self.call_instants.lock().unwrap().push(Instant::now());
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(GatewayError::Transport("script exhausted".to_string())))
        }
    }

    fn paid_session(metadata: BTreeMap<String, String>) -> GatewaySession {
        GatewaySession {
            id: "cs_test_xyz".to_string(),
            url: None,
            payment_status: "paid".to_string(),
            amount_total: Some(30_000),
            payment_intent_id: Some("pi_123".to_string()),
            metadata,
        }
    }

    async fn service_with(
        gateway: Arc<ScriptedGateway>,
    ) -> (ReconciliationService, mpsc::Receiver<Event>) {
        let db = Arc::new(
            Database::connect("sqlite::memory:")
                .await
                .expect("in-memory db"),
        );
        let (tx, rx) = mpsc::channel(16);
        let event_sender = Arc::new(EventSender::new(tx));
        let carts = CartService::new(db.clone(), event_sender.clone());
        let service = ReconciliationService::new(
            db,
            event_sender,
            gateway,
            carts,
            RetryConfig::default(),
        );
        (service, rx)
    }

    #[tokio::test]
    async fn missing_session_id_is_rejected() {
        let gateway = Arc::new(ScriptedGateway::new(vec![]));
        let (service, _rx) = service_with(gateway.clone()).await;

        let err = service.finalize_checkout(None).await.unwrap_err();
        assert_matches!(err, ServiceError::MissingSessionId);

        let err = service.finalize_checkout(Some("  ")).await.unwrap_err();
        assert_matches!(err, ServiceError::MissingSessionId);

        assert_eq!(gateway.calls(), 0);
    }

    #[tokio::test]
    async fn malformed_session_id_is_rejected_before_retrieval() {
        let gateway = Arc::new(ScriptedGateway::new(vec![]));
        let (service, _rx) = service_with(gateway.clone()).await;

        let err = service
            .finalize_checkout(Some("sess_12345"))
            .await
            .unwrap_err();

        assert_matches!(err, ServiceError::MalformedSessionId(id) => {
            assert_eq!(id, "sess_12345");
        });
        assert_eq!(gateway.calls(), 0);
    }

    #[tokio::test]
    async fn gateway_not_found_is_terminal_after_one_attempt() {
        let gateway = Arc::new(ScriptedGateway::new(vec![Err(GatewayError::NotFound(
            "No such checkout.session".to_string(),
        ))]));
        let (service, _rx) = service_with(gateway.clone()).await;

        let err = service
            .finalize_checkout(Some("cs_test_gone"))
            .await
            .unwrap_err();

        assert_matches!(err, ServiceError::SessionNotFound(_));
        assert_eq!(gateway.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn transport_failures_follow_backoff_then_exhaust() {
        let gateway = Arc::new(ScriptedGateway::new(vec![
            Err(GatewayError::Transport("connect timeout".to_string())),
            Err(GatewayError::Transport("connect timeout".to_string())),
            Err(GatewayError::Transport("connect timeout".to_string())),
        ]));
        let (service, _rx) = service_with(gateway.clone()).await;

        let err = service
            .finalize_checkout(Some("cs_test_slow"))
            .await
            .unwrap_err();

        assert_matches!(err, ServiceError::SessionRetrievalFailed { attempts: 3 });
        assert_eq!(gateway.calls(), 3);

        // Delays of 1s then 2s between attempt starts
        let instants = gateway.call_instants.lock().unwrap();
        assert_eq!(instants[1] - instants[0], std::time::Duration::from_secs(1));
        assert_eq!(instants[2] - instants[1], std::time::Duration::from_secs(2));
    }

    #[tokio::test]
    async fn unpaid_session_maps_to_payment_incomplete() {
        let mut session = paid_session(BTreeMap::new());
        session.payment_status = "unpaid".to_string();
        let gateway = Arc::new(ScriptedGateway::new(vec![Ok(session)]));
        let (service, _rx) = service_with(gateway).await;

        let err = service
            .finalize_checkout(Some("cs_test_xyz"))
            .await
            .unwrap_err();

        assert_matches!(err, ServiceError::PaymentIncomplete(status) => {
            assert_eq!(status, "unpaid");
        });
    }

    #[tokio::test]
    async fn empty_metadata_counts_as_missing() {
        let mut metadata = BTreeMap::new();
        metadata.insert("user".to_string(), "".to_string());
        metadata.insert("data".to_string(), "{}".to_string());
        let gateway = Arc::new(ScriptedGateway::new(vec![Ok(paid_session(metadata))]));
        let (service, _rx) = service_with(gateway).await;

        let err = service
            .finalize_checkout(Some("cs_test_xyz"))
            .await
            .unwrap_err();

        assert_matches!(err, ServiceError::MissingSessionMetadata(key) => {
            assert_eq!(key, "user");
        });
    }

    #[tokio::test]
    async fn corrupt_cart_metadata_maps_to_data_error() {
        let mut metadata = BTreeMap::new();
        metadata.insert("user".to_string(), "u1".to_string());
        metadata.insert("data".to_string(), "{not valid json".to_string());
        let gateway = Arc::new(ScriptedGateway::new(vec![Ok(paid_session(metadata))]));
        let (service, _rx) = service_with(gateway).await;

        let err = service
            .finalize_checkout(Some("cs_test_xyz"))
            .await
            .unwrap_err();

        assert_matches!(err, ServiceError::CartDataCorrupted(_));
    }
}
