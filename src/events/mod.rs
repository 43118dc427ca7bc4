use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    /// Creates a new EventSender
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Sends an event asynchronously
    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }
}

// Define the various events that can occur in the system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    // Cart events
    CartCreated(Uuid),
    CartItemAdded {
        cart_id: Uuid,
        service_name: String,
    },
    CartItemRemoved {
        cart_id: Uuid,
        service_name: String,
    },
    CartCleared(Uuid),

    // Checkout events
    CheckoutStarted {
        customer_id: String,
        session_id: String,
    },

    // Order events
    OrderCreated {
        order_id: Uuid,
        session_id: String,
    },
    OrderCancelled(Uuid),
    OrderStatusChanged {
        order_id: Uuid,
        old_status: String,
        new_status: String,
    },
    TechnicianAssigned {
        order_id: Uuid,
        technician_id: String,
    },

    // Generic event for custom messages
    Generic {
        message: String,
        timestamp: DateTime<Utc>,
        metadata: serde_json::Value,
    },
}

// Function to process incoming events and log or fan them out to side effects.
pub async fn process_events(mut rx: mpsc::Receiver<Event>) {
    info!("Starting event processing loop");

    while let Some(event) = rx.recv().await {
        info!("Received event: {:?}", event);

        match event {
            Event::OrderCreated {
                order_id,
                session_id,
            } => {
                if let Err(e) = handle_order_created(order_id, &session_id).await {
                    warn!(
                        "Failed to handle order created event: order_id={}, error={}",
                        order_id, e
                    );
                }
            }
            Event::TechnicianAssigned {
                order_id,
                technician_id,
            } => {
                if let Err(e) = handle_technician_assigned(order_id, &technician_id).await {
                    warn!(
                        "Failed to handle technician assignment: order_id={}, error={}",
                        order_id, e
                    );
                }
            }
            Event::CheckoutStarted {
                customer_id,
                session_id,
            } => {
                info!(
                    "Checkout started: customer={}, session={}",
                    customer_id, session_id
                );
            }
            Event::OrderStatusChanged {
                order_id,
                old_status,
                new_status,
            } => {
                info!(
                    "Order {} moved from {} to {}",
                    order_id, old_status, new_status
                );
            }
            _ => {
                info!("No specific handler for event: {:?}", event);
            }
        }
    }

    warn!("Event processing loop has ended");
}

// Handler functions for specific events
async fn handle_order_created(order_id: Uuid, session_id: &str) -> Result<(), String> {
    // Confirmation email and dispatch scheduling hook off this event
    info!(
        "Processing order created event for order {} (session {})",
        order_id, session_id
    );

    Ok(())
}

async fn handle_technician_assigned(order_id: Uuid, technician_id: &str) -> Result<(), String> {
    info!(
        "Notifying technician {} about assignment to order {}",
        technician_id, order_id
    );

    Ok(())
}
