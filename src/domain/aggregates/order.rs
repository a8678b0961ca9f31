//! Order Aggregate

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::domain::aggregates::{CartAggregate, LineItem};
use crate::domain::events::{DomainEvent, OrderEvent};
use crate::domain::totals::compute_totals;
use crate::domain::value_objects::{Money, OrderId, UserId};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    #[default]
    Pending,
    Processing,
    Shipped,
    Delivered,
    Cancelled,
    Failed,
}

impl OrderStatus {
    pub const ALL: [OrderStatus; 6] = [
        Self::Pending, Self::Processing, Self::Shipped, Self::Delivered, Self::Cancelled, Self::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Shipped => "shipped",
            Self::Delivered => "delivered",
            Self::Cancelled => "cancelled",
            Self::Failed => "failed",
        }
    }

    /// Cancelled and failed have no exit under the strict policy.
    pub fn is_terminal(&self) -> bool { matches!(self, Self::Cancelled | Self::Failed) }

    /// Next state on the happy path.
    pub fn successor(&self) -> Option<OrderStatus> {
        match self {
            Self::Pending => Some(Self::Processing),
            Self::Processing => Some(Self::Shipped),
            Self::Shipped => Some(Self::Delivered),
            Self::Delivered | Self::Cancelled | Self::Failed => None,
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

impl FromStr for OrderStatus {
    type Err = OrderError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL.into_iter().find(|st| st.as_str() == s).ok_or_else(|| OrderError::UnknownStatus(s.to_string()))
    }
}

/// Which status changes a vendor may make.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum TransitionPolicy {
    /// Any status may be set from any other.
    #[default]
    Permissive,
    /// Happy path one step at a time; cancelled/failed from any non-terminal state.
    Strict,
}

impl TransitionPolicy {
    pub fn allows(&self, from: OrderStatus, to: OrderStatus) -> bool {
        match self {
            Self::Permissive => true,
            Self::Strict => {
                !from.is_terminal() && (to.is_terminal() || from.successor() == Some(to))
            }
        }
    }
}

/// Human-facing sequence number, shown as `ORD-000042`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrderNumber(u64);

impl OrderNumber {
    pub fn new(value: u64) -> Self { Self(value) }
    pub fn value(&self) -> u64 { self.0 }
}

impl fmt::Display for OrderNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "ORD-{:06}", self.0) }
}

/// A placed order. Items and totals are frozen at checkout; only the status moves.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderAggregate {
    id: OrderId,
    order_number: OrderNumber,
    owner_id: UserId,
    items: Vec<LineItem>,
    total_price: Money,
    total_quantity: u64,
    status: OrderStatus,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    #[serde(skip)]
    events: Vec<DomainEvent>,
}

impl OrderAggregate {
    /// Snapshots a non-empty cart into a pending order.
    pub fn place(id: OrderId, order_number: OrderNumber, cart: &CartAggregate) -> Result<Self, OrderError> {
        if cart.is_empty() { return Err(OrderError::EmptyCart); }
        let totals = cart.totals();
        let now = Utc::now();
        let mut order = Self {
            id: id.clone(), order_number, owner_id: cart.owner_id().clone(),
            items: cart.items().to_vec(),
            total_price: totals.total_price, total_quantity: totals.total_quantity,
            status: OrderStatus::Pending, created_at: now, updated_at: now, events: vec![],
        };
        order.raise_event(OrderEvent::Placed {
            order_id: id, order_number, owner_id: order.owner_id.clone(), total_price: totals.total_price,
        });
        Ok(order)
    }

    pub fn id(&self) -> &OrderId { &self.id }
    pub fn order_number(&self) -> OrderNumber { self.order_number }
    pub fn owner_id(&self) -> &UserId { &self.owner_id }
    pub fn items(&self) -> &[LineItem] { &self.items }
    pub fn total_price(&self) -> Money { self.total_price }
    pub fn total_quantity(&self) -> u64 { self.total_quantity }
    pub fn status(&self) -> OrderStatus { self.status }
    pub fn created_at(&self) -> DateTime<Utc> { self.created_at }
    pub fn updated_at(&self) -> DateTime<Utc> { self.updated_at }

    /// Recomputing from the item snapshot must reproduce the frozen totals.
    pub fn verify_totals(&self) -> bool {
        let totals = compute_totals(&self.items);
        totals.total_price == self.total_price && totals.total_quantity == self.total_quantity
    }

    pub fn set_status(&mut self, to: OrderStatus, policy: TransitionPolicy) -> Result<(), OrderError> {
        let from = self.status;
        if !policy.allows(from, to) { return Err(OrderError::IllegalTransition { from, to }); }
        self.status = to;
        self.touch();
        self.raise_event(OrderEvent::StatusChanged { order_id: self.id.clone(), from, to });
        Ok(())
    }

    pub fn take_events(&mut self) -> Vec<DomainEvent> { std::mem::take(&mut self.events) }
    fn raise_event(&mut self, e: OrderEvent) { self.events.push(DomainEvent::Order(e)); }

    // updated_at strictly advances on every transition.
    fn touch(&mut self) { self.updated_at = Utc::now().max(self.updated_at + Duration::microseconds(1)); }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OrderError {
    #[error("cannot place an order from an empty cart")]
    EmptyCart,
    #[error("status change {from} -> {to} is not allowed")]
    IllegalTransition { from: OrderStatus, to: OrderStatus },
    #[error("unknown order status {0:?}")]
    UnknownStatus(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::aggregates::catalog_item::tests::catalog_item;

    fn filled_cart() -> CartAggregate {
        let mut cart = CartAggregate::new(UserId::from("CUST001"));
        cart.add_item(&catalog_item("p1", 1000), 2).unwrap();
        cart.add_item(&catalog_item("p2", 350), 1).unwrap();
        cart
    }

    #[test]
    fn test_order_workflow() {
        let mut order = OrderAggregate::place(OrderId::from("o1"), OrderNumber::new(1001), &filled_cart()).unwrap();
        assert_eq!(order.status(), OrderStatus::Pending);
        assert_eq!(order.total_price(), Money::from_minor(2350));
        assert_eq!(order.total_quantity(), 3);
        assert!(order.verify_totals());
        order.set_status(OrderStatus::Processing, TransitionPolicy::Strict).unwrap();
        order.set_status(OrderStatus::Shipped, TransitionPolicy::Strict).unwrap();
        assert_eq!(order.status(), OrderStatus::Shipped);
        assert_eq!(order.take_events().len(), 3);
    }

    #[test]
    fn test_empty_cart_is_rejected() {
        let cart = CartAggregate::new(UserId::from("u"));
        assert_eq!(OrderAggregate::place(OrderId::generate(), OrderNumber::new(1), &cart), Err(OrderError::EmptyCart));
    }

    #[test]
    fn test_snapshot_is_independent_of_cart() {
        let mut cart = filled_cart();
        let order = OrderAggregate::place(OrderId::from("o1"), OrderNumber::new(1), &cart).unwrap();
        let items_before = order.items().to_vec();
        cart.add_item(&catalog_item("p1", 1000), 5).unwrap();
        cart.clear();
        assert_eq!(order.items(), items_before.as_slice());
        assert_eq!(order.total_price(), Money::from_minor(2350));
    }

    #[test]
    fn test_permissive_status_jump_advances_updated_at() {
        let mut order = OrderAggregate::place(OrderId::from("o1"), OrderNumber::new(7), &filled_cart()).unwrap();
        let before = order.updated_at();
        order.set_status(OrderStatus::Shipped, TransitionPolicy::Permissive).unwrap();
        assert_eq!(order.status(), OrderStatus::Shipped);
        assert!(order.updated_at() > before);
        assert_eq!(order.total_price(), Money::from_minor(2350));
        // Permissive allows leaving a terminal state too.
        order.set_status(OrderStatus::Cancelled, TransitionPolicy::Permissive).unwrap();
        order.set_status(OrderStatus::Pending, TransitionPolicy::Permissive).unwrap();
    }

    #[test]
    fn test_strict_policy_table() {
        let strict = TransitionPolicy::Strict;
        assert!(strict.allows(OrderStatus::Pending, OrderStatus::Processing));
        assert!(!strict.allows(OrderStatus::Pending, OrderStatus::Shipped));
        assert!(strict.allows(OrderStatus::Delivered, OrderStatus::Failed));
        assert!(strict.allows(OrderStatus::Shipped, OrderStatus::Cancelled));
        assert!(!strict.allows(OrderStatus::Cancelled, OrderStatus::Pending));
        assert!(!strict.allows(OrderStatus::Failed, OrderStatus::Cancelled));
        assert!(!strict.allows(OrderStatus::Processing, OrderStatus::Pending));

        let mut order = OrderAggregate::place(OrderId::from("o1"), OrderNumber::new(1), &filled_cart()).unwrap();
        let err = order.set_status(OrderStatus::Delivered, strict).unwrap_err();
        assert_eq!(err, OrderError::IllegalTransition { from: OrderStatus::Pending, to: OrderStatus::Delivered });
        assert_eq!(order.status(), OrderStatus::Pending);
    }

    #[test]
    fn test_order_number_display_and_status_parsing() {
        assert_eq!(OrderNumber::new(42).to_string(), "ORD-000042");
        assert_eq!("shipped".parse::<OrderStatus>().unwrap(), OrderStatus::Shipped);
        assert!("lost".parse::<OrderStatus>().is_err());
        assert_eq!(serde_json::to_value(OrderStatus::Delivered).unwrap(), "delivered");
    }
}
