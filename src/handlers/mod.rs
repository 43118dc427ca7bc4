pub mod carts;
pub mod catalog;
pub mod checkout;
pub mod common;
pub mod orders;
pub mod technicians;

use crate::config::AppConfig;
use crate::db::DbPool;
use crate::events::EventSender;
use crate::gateway::CheckoutGateway;
use crate::retry::RetryConfig;
use crate::services::{
    CartService, CatalogService, CheckoutService, OrderService, ReconciliationService,
};
use std::sync::Arc;
use std::time::Duration;

// Re-export AppState so handler modules can import it as crate::handlers::AppState
pub use crate::AppState;

/// Services layer that encapsulates business logic used by HTTP handlers
#[derive(Clone)]
pub struct AppServices {
    pub catalog: Arc<CatalogService>,
    pub carts: Arc<CartService>,
    pub checkout: Arc<CheckoutService>,
    pub reconciliation: Arc<ReconciliationService>,
    pub orders: Arc<OrderService>,
}

impl AppServices {
    /// Build the AppServices container from the shared pool, config and gateway.
    pub fn new(
        db_pool: Arc<DbPool>,
        config: Arc<AppConfig>,
        event_sender: Arc<EventSender>,
        gateway: Arc<dyn CheckoutGateway>,
    ) -> Self {
        let retry_config = RetryConfig {
            max_attempts: config.gateway_retry_max_attempts,
            initial_delay: Duration::from_millis(config.gateway_retry_initial_delay_ms),
            max_delay: Duration::from_millis(config.gateway_retry_max_delay_ms),
            backoff_factor: config.gateway_retry_backoff_factor,
        };

        let catalog = Arc::new(CatalogService::new(db_pool.clone()));
        let cart_service = CartService::new(db_pool.clone(), event_sender.clone());
        let checkout = Arc::new(CheckoutService::new(
            config,
            event_sender.clone(),
            gateway.clone(),
        ));
        // Reconciliation clears the server-side cart after recording an order,
        // so it carries its own handle on the cart service.
        let reconciliation = Arc::new(ReconciliationService::new(
            db_pool.clone(),
            event_sender.clone(),
            gateway,
            cart_service.clone(),
            retry_config,
        ));
        let orders = Arc::new(OrderService::new(db_pool, event_sender));

        Self {
            catalog,
            carts: Arc::new(cart_service),
            checkout,
            reconciliation,
            orders,
        }
    }
}
