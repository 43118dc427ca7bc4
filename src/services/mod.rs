// Core services
pub mod carts;
pub mod catalog;
pub mod checkout;
pub mod orders;
pub mod reconciliation;

pub use carts::CartService;
pub use catalog::CatalogService;
pub use checkout::CheckoutService;
pub use orders::OrderService;
pub use reconciliation::ReconciliationService;
