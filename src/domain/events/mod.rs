//! Domain events
use crate::domain::aggregates::{OrderNumber, OrderStatus};
use crate::domain::value_objects::{Money, OrderId, ProductId, UserId};

#[derive(Clone, Debug, PartialEq)]
pub enum DomainEvent {
    Cart(CartEvent),
    Order(OrderEvent),
}

#[derive(Clone, Debug, PartialEq)]
pub enum CartEvent {
    ItemAdded { owner_id: UserId, product_id: ProductId, quantity: u32 },
    QuantityChanged { owner_id: UserId, product_id: ProductId, quantity: u32 },
    ItemRemoved { owner_id: UserId, product_id: ProductId },
    Cleared { owner_id: UserId },
}

#[derive(Clone, Debug, PartialEq)]
pub enum OrderEvent {
    Placed { order_id: OrderId, order_number: OrderNumber, owner_id: UserId, total_price: Money },
    StatusChanged { order_id: OrderId, from: OrderStatus, to: OrderStatus },
}

/// Logs drained aggregate events at debug level.
pub fn log_events(events: Vec<DomainEvent>) {
    for event in events {
        tracing::debug!(?event, "domain event");
    }
}
