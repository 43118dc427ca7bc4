use crate::{
    entities::{order, order_item, FulfillmentStatus, Order, OrderItem, OrderModel},
    errors::ServiceError,
    events::{Event, EventSender},
};
use chrono::Utc;
use sea_orm::{
    ActiveEnum, ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, ModelTrait,
    PaginatorTrait, QueryFilter, QueryOrder, Set,
};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// Order management for customers (history, cancellation) and for the
/// dispatch side (status transitions, technician assignment and task lists).
#[derive(Clone)]
pub struct OrderService {
    db: Arc<DatabaseConnection>,
    event_sender: Arc<EventSender>,
}

impl OrderService {
    pub fn new(db: Arc<DatabaseConnection>, event_sender: Arc<EventSender>) -> Self {
        Self { db, event_sender }
    }

    /// Lists a customer's orders, newest first, optionally filtered by
    /// fulfillment status.
    #[instrument(skip(self))]
    pub async fn list_orders(
        &self,
        customer_id: &str,
        status: Option<String>,
        page: u64,
        per_page: u64,
    ) -> Result<(Vec<OrderModel>, u64), ServiceError> {
        let mut query = Order::find()
            .filter(order::Column::CustomerId.eq(customer_id))
            .order_by_desc(order::Column::CreatedAt);

        if let Some(status) = status {
            query = query.filter(order::Column::Status.eq(parse_status(&status)?));
        }

        let paginator = query.paginate(&*self.db, per_page);
        let total = paginator.num_items().await?;
        let orders = paginator.fetch_page(page.saturating_sub(1)).await?;

        Ok((orders, total))
    }

    /// Fetches an order together with its line items.
    #[instrument(skip(self))]
    pub async fn get_order(&self, order_id: Uuid) -> Result<OrderWithItems, ServiceError> {
        let order = Order::find_by_id(order_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;

        let items = order.find_related(OrderItem).all(&*self.db).await?;

        Ok(OrderWithItems { order, items })
    }

    /// Cancels an order. Only orders still pending dispatch can be
    /// cancelled.
    #[instrument(skip(self))]
    pub async fn cancel_order(&self, order_id: Uuid) -> Result<OrderModel, ServiceError> {
        let order = Order::find_by_id(order_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;

        if order.status != FulfillmentStatus::Pending {
            return Err(ServiceError::InvalidOperation(format!(
                "Only pending orders can be cancelled (current status: {})",
                order.status.to_value()
            )));
        }

        let mut active: order::ActiveModel = order.into();
        active.status = Set(FulfillmentStatus::Cancelled);
        active.updated_at = Set(Utc::now());
        let updated = active.update(&*self.db).await?;

        if let Err(e) = self.event_sender.send(Event::OrderCancelled(order_id)).await {
            warn!(error = %e, order_id = %order_id, "Failed to send order cancelled event");
        }

        info!("Cancelled order {}", order_id);
        Ok(updated)
    }

    /// Moves an order to a new fulfillment status.
    #[instrument(skip(self))]
    pub async fn update_order_status(
        &self,
        order_id: Uuid,
        new_status: &str,
    ) -> Result<OrderModel, ServiceError> {
        let status = parse_status(new_status)?;

        let order = Order::find_by_id(order_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;

        let old_status = order.status.to_value();
        let mut active: order::ActiveModel = order.into();
        active.status = Set(status);
        active.updated_at = Set(Utc::now());
        let updated = active.update(&*self.db).await?;

        if let Err(e) = self
            .event_sender
            .send(Event::OrderStatusChanged {
                order_id,
                old_status,
                new_status: status.to_value(),
            })
            .await
        {
            warn!(error = %e, order_id = %order_id, "Failed to send order status changed event");
        }

        Ok(updated)
    }

    /// Assigns a technician and moves the order to `Assigned`.
    #[instrument(skip(self))]
    pub async fn assign_technician(
        &self,
        order_id: Uuid,
        technician_id: &str,
    ) -> Result<OrderModel, ServiceError> {
        if technician_id.trim().is_empty() {
            return Err(ServiceError::InvalidInput(
                "Technician id must not be empty".to_string(),
            ));
        }

        let order = Order::find_by_id(order_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;

        if matches!(
            order.status,
            FulfillmentStatus::Completed | FulfillmentStatus::Cancelled
        ) {
            return Err(ServiceError::InvalidOperation(format!(
                "Cannot assign a technician to a {} order",
                order.status.to_value()
            )));
        }

        let mut active: order::ActiveModel = order.into();
        active.technician_id = Set(Some(technician_id.to_string()));
        active.status = Set(FulfillmentStatus::Assigned);
        active.updated_at = Set(Utc::now());
        let updated = active.update(&*self.db).await?;

        if let Err(e) = self
            .event_sender
            .send(Event::TechnicianAssigned {
                order_id,
                technician_id: technician_id.to_string(),
            })
            .await
        {
            warn!(error = %e, order_id = %order_id, "Failed to send technician assigned event");
        }

        info!("Assigned technician {} to order {}", technician_id, order_id);
        Ok(updated)
    }

    /// Lists the orders assigned to a technician, newest first.
    #[instrument(skip(self))]
    pub async fn technician_tasks(
        &self,
        technician_id: &str,
        status: Option<String>,
    ) -> Result<Vec<OrderModel>, ServiceError> {
        let mut query = Order::find()
            .filter(order::Column::TechnicianId.eq(technician_id))
            .order_by_desc(order::Column::CreatedAt);

        if let Some(status) = status {
            query = query.filter(order::Column::Status.eq(parse_status(&status)?));
        }

        Ok(query.all(&*self.db).await?)
    }

    /// Status update on behalf of a technician; the order must actually be
    /// assigned to them.
    #[instrument(skip(self))]
    pub async fn update_task_status(
        &self,
        technician_id: &str,
        order_id: Uuid,
        new_status: &str,
    ) -> Result<OrderModel, ServiceError> {
        let order = Order::find_by_id(order_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;

        if order.technician_id.as_deref() != Some(technician_id) {
            return Err(ServiceError::InvalidOperation(format!(
                "Order {} is not assigned to technician {}",
                order_id, technician_id
            )));
        }

        self.update_order_status(order_id, new_status).await
    }

    /// Order counts by fulfillment status for one technician.
    #[instrument(skip(self))]
    pub async fn technician_stats(
        &self,
        technician_id: &str,
    ) -> Result<TechnicianStats, ServiceError> {
        let by_status = |status: FulfillmentStatus| {
            Order::find()
                .filter(order::Column::TechnicianId.eq(technician_id))
                .filter(order::Column::Status.eq(status))
                .count(&*self.db)
        };

        let assigned = by_status(FulfillmentStatus::Assigned).await?;
        let in_progress = by_status(FulfillmentStatus::InProgress).await?;
        let completed = by_status(FulfillmentStatus::Completed).await?;
        let cancelled = by_status(FulfillmentStatus::Cancelled).await?;
        let total = Order::find()
            .filter(order::Column::TechnicianId.eq(technician_id))
            .count(&*self.db)
            .await?;

        Ok(TechnicianStats {
            technician_id: technician_id.to_string(),
            assigned,
            in_progress,
            completed,
            cancelled,
            total,
        })
    }
}

fn parse_status(raw: &str) -> Result<FulfillmentStatus, ServiceError> {
    FulfillmentStatus::try_from_value(&raw.to_string())
        .map_err(|_| ServiceError::InvalidInput(format!("Unknown order status: {}", raw)))
}

/// Order with line items
#[derive(Debug, Serialize)]
pub struct OrderWithItems {
    pub order: OrderModel,
    pub items: Vec<order_item::Model>,
}

/// Per-technician workload summary
#[derive(Debug, Serialize)]
pub struct TechnicianStats {
    pub technician_id: String,
    pub assigned: u64,
    pub in_progress: u64,
    pub completed: u64,
    pub cancelled: u64,
    pub total: u64,
}
