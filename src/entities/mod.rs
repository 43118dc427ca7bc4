/// Database entities
pub mod cart;
pub mod cart_item;
pub mod order;
pub mod order_item;
pub mod service_category;
pub mod service_offering;

// Re-export entities
pub use cart::{Entity as Cart, Model as CartModel};
pub use cart_item::{Entity as CartItem, Model as CartItemModel};
pub use order::{Entity as Order, FulfillmentStatus, Model as OrderModel, PaymentStatus};
pub use order_item::{Entity as OrderItem, Model as OrderItemModel};
pub use service_category::{Entity as ServiceCategory, Model as ServiceCategoryModel};
pub use service_offering::{Entity as ServiceOffering, Model as ServiceOfferingModel};
