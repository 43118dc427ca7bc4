use crate::{
    entities::{cart, cart_item, service_offering, Cart, CartItem, CartModel, ServiceOffering},
    errors::ServiceError,
    events::{Event, EventSender},
};
use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, QueryFilter,
    QueryOrder, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// Server-side shopping cart keyed by customer id.
///
/// Each customer owns at most one cart (unique `customer_id`). Adding a
/// service that is already in the cart increments its quantity, and totals
/// are recomputed on every mutation. Concurrent mutations are serialized by
/// optimistic versioning on the cart row: an update that observes a stale
/// version affects zero rows and surfaces `ConcurrentModification`.
#[derive(Clone)]
pub struct CartService {
    db: Arc<DatabaseConnection>,
    event_sender: Arc<EventSender>,
}

impl CartService {
    pub fn new(db: Arc<DatabaseConnection>, event_sender: Arc<EventSender>) -> Self {
        Self { db, event_sender }
    }

    /// Retrieves the customer's cart with its items, creating an empty cart
    /// on first access.
    #[instrument(skip(self))]
    pub async fn get_cart(&self, customer_id: &str) -> Result<CartWithItems, ServiceError> {
        let (cart, created) = self.get_or_create(&*self.db, customer_id).await?;

        if created {
            if let Err(e) = self.event_sender.send(Event::CartCreated(cart.id)).await {
                warn!(error = %e, cart_id = %cart.id, "Failed to send cart created event");
            }
        }

        let items = CartItem::find()
            .filter(cart_item::Column::CartId.eq(cart.id))
            .order_by_asc(cart_item::Column::CreatedAt)
            .all(&*self.db)
            .await?;

        Ok(CartWithItems { cart, items })
    }

    /// Adds a catalog service to the cart, or increments its quantity if it
    /// is already present. The unit price is taken from the catalog, never
    /// from the caller.
    #[instrument(skip(self))]
    pub async fn add_item(
        &self,
        customer_id: &str,
        input: AddCartItemInput,
    ) -> Result<CartWithItems, ServiceError> {
        if input.quantity < 1 {
            return Err(ServiceError::InvalidInput(
                "Quantity must be at least 1".to_string(),
            ));
        }

        let txn = self.db.begin().await?;

        let (cart, created) = self.get_or_create(&txn, customer_id).await?;

        let offering = ServiceOffering::find()
            .filter(service_offering::Column::Name.eq(input.service_name.as_str()))
            .one(&txn)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Service {} not found", input.service_name))
            })?;

        let existing_item = CartItem::find()
            .filter(cart_item::Column::CartId.eq(cart.id))
            .filter(cart_item::Column::ServiceName.eq(input.service_name.as_str()))
            .one(&txn)
            .await?;

        if let Some(item) = existing_item {
            let current_quantity = item.quantity;
            let mut item: cart_item::ActiveModel = item.into();
            item.quantity = Set(current_quantity + input.quantity);
            item.updated_at = Set(Utc::now());
            item.update(&txn).await?;
        } else {
            let cart_item = cart_item::ActiveModel {
                id: Set(Uuid::new_v4()),
                cart_id: Set(cart.id),
                service_name: Set(offering.name.clone()),
                unit_price: Set(offering.price),
                quantity: Set(input.quantity),
                created_at: Set(Utc::now()),
                updated_at: Set(Utc::now()),
            };
            cart_item.insert(&txn).await?;
        }

        let updated = self.recalculate_totals(&txn, &cart).await?;
        let items = CartItem::find()
            .filter(cart_item::Column::CartId.eq(cart.id))
            .order_by_asc(cart_item::Column::CreatedAt)
            .all(&txn)
            .await?;

        txn.commit().await?;

        if created {
            if let Err(e) = self.event_sender.send(Event::CartCreated(cart.id)).await {
                warn!(error = %e, cart_id = %cart.id, "Failed to send cart created event");
            }
        }
        if let Err(e) = self
            .event_sender
            .send(Event::CartItemAdded {
                cart_id: cart.id,
                service_name: input.service_name.clone(),
            })
            .await
        {
            warn!(error = %e, cart_id = %cart.id, "Failed to send cart item added event");
        }

        info!(
            "Added {} x{} to cart for customer {}",
            input.service_name, input.quantity, customer_id
        );
        Ok(CartWithItems {
            cart: updated,
            items,
        })
    }

    /// Removes one occurrence of a service from the cart: the quantity is
    /// decremented, and the line disappears when it reaches zero.
    #[instrument(skip(self))]
    pub async fn remove_item(
        &self,
        customer_id: &str,
        service_name: &str,
    ) -> Result<CartWithItems, ServiceError> {
        let txn = self.db.begin().await?;

        let cart = Cart::find()
            .filter(cart::Column::CustomerId.eq(customer_id))
            .one(&txn)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Cart for customer {} not found", customer_id))
            })?;

        let item = CartItem::find()
            .filter(cart_item::Column::CartId.eq(cart.id))
            .filter(cart_item::Column::ServiceName.eq(service_name))
            .one(&txn)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Service {} is not in the cart", service_name))
            })?;

        if item.quantity > 1 {
            let current_quantity = item.quantity;
            let mut item: cart_item::ActiveModel = item.into();
            item.quantity = Set(current_quantity - 1);
            item.updated_at = Set(Utc::now());
            item.update(&txn).await?;
        } else {
            let item: cart_item::ActiveModel = item.into();
            item.delete(&txn).await?;
        }

        let updated = self.recalculate_totals(&txn, &cart).await?;
        let items = CartItem::find()
            .filter(cart_item::Column::CartId.eq(cart.id))
            .order_by_asc(cart_item::Column::CreatedAt)
            .all(&txn)
            .await?;

        txn.commit().await?;

        if let Err(e) = self
            .event_sender
            .send(Event::CartItemRemoved {
                cart_id: cart.id,
                service_name: service_name.to_string(),
            })
            .await
        {
            warn!(error = %e, cart_id = %cart.id, "Failed to send cart item removed event");
        }

        Ok(CartWithItems {
            cart: updated,
            items,
        })
    }

    /// Deletes every item in the customer's cart and resets totals to zero.
    #[instrument(skip(self))]
    pub async fn clear_cart(&self, customer_id: &str) -> Result<(), ServiceError> {
        let txn = self.db.begin().await?;

        let cart = Cart::find()
            .filter(cart::Column::CustomerId.eq(customer_id))
            .one(&txn)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Cart for customer {} not found", customer_id))
            })?;

        CartItem::delete_many()
            .filter(cart_item::Column::CartId.eq(cart.id))
            .exec(&txn)
            .await?;

        self.recalculate_totals(&txn, &cart).await?;

        txn.commit().await?;

        if let Err(e) = self.event_sender.send(Event::CartCleared(cart.id)).await {
            warn!(error = %e, cart_id = %cart.id, "Failed to send cart cleared event");
        }

        info!("Cleared cart for customer {}", customer_id);
        Ok(())
    }

    async fn get_or_create(
        &self,
        conn: &impl ConnectionTrait,
        customer_id: &str,
    ) -> Result<(CartModel, bool), ServiceError> {
        if let Some(existing) = Cart::find()
            .filter(cart::Column::CustomerId.eq(customer_id))
            .one(conn)
            .await?
        {
            return Ok((existing, false));
        }

        let fresh = cart::ActiveModel {
            id: Set(Uuid::new_v4()),
            customer_id: Set(customer_id.to_string()),
            version: Set(1),
            subtotal: Set(Decimal::ZERO),
            total: Set(Decimal::ZERO),
            created_at: Set(Utc::now()),
            updated_at: Set(Utc::now()),
        };

        match fresh.insert(conn).await {
            Ok(created) => Ok((created, true)),
            Err(insert_err) => {
                // A racing request may have claimed the unique customer_id first
                match Cart::find()
                    .filter(cart::Column::CustomerId.eq(customer_id))
                    .one(conn)
                    .await?
                {
                    Some(existing) => Ok((existing, false)),
                    None => Err(insert_err.into()),
                }
            }
        }
    }

    /// Recomputes subtotal/total from the items and writes them back guarded
    /// by the version the caller read. Zero affected rows means another
    /// writer got there first.
    async fn recalculate_totals(
        &self,
        conn: &impl ConnectionTrait,
        cart: &CartModel,
    ) -> Result<CartModel, ServiceError> {
        use sea_orm::sea_query::Expr;

        let items = CartItem::find()
            .filter(cart_item::Column::CartId.eq(cart.id))
            .all(conn)
            .await?;

        let subtotal: Decimal = items
            .iter()
            .map(|item| item.unit_price * Decimal::from(item.quantity))
            .sum();
        let total = subtotal;

        let result = Cart::update_many()
            .col_expr(cart::Column::Subtotal, Expr::value(subtotal))
            .col_expr(cart::Column::Total, Expr::value(total))
            .col_expr(cart::Column::Version, Expr::value(cart.version + 1))
            .col_expr(cart::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(cart::Column::Id.eq(cart.id))
            .filter(cart::Column::Version.eq(cart.version))
            .exec(conn)
            .await?;

        if result.rows_affected == 0 {
            return Err(ServiceError::ConcurrentModification(cart.id));
        }

        Cart::find_by_id(cart.id)
            .one(conn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Cart {} not found", cart.id)))
    }
}

/// Input for adding an item to the cart
#[derive(Debug, Deserialize)]
pub struct AddCartItemInput {
    pub service_name: String,
    #[serde(default = "default_quantity")]
    pub quantity: i32,
}

fn default_quantity() -> i32 {
    1
}

/// Cart with items
#[derive(Debug, Serialize)]
pub struct CartWithItems {
    pub cart: CartModel,
    pub items: Vec<cart_item::Model>,
}
