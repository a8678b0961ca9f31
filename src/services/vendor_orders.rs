//! Vendor order view: every customer's orders, status changes only.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use serde_json::json;
use tokio::sync::watch;
use tracing::{error, info, instrument, warn};

use super::orders::decode_orders;
use super::Context;
use crate::auth::Session;
use crate::domain::aggregates::{OrderAggregate, OrderStatus};
use crate::domain::events::log_events;
use crate::domain::value_objects::OrderId;
use crate::error::{HerbError, Result};
use crate::store::{Filter, Snapshot, ORDERS};
use crate::sync::{self, SyncHandle};

#[derive(Clone, Debug, Default, PartialEq)]
pub struct VendorOrdersState {
    /// Newest first, across all owners.
    pub orders: Vec<OrderAggregate>,
    pub is_loading: bool,
    pub last_error: Option<HerbError>,
}

impl VendorOrdersState {
    /// Cached orders, optionally narrowed to one status.
    pub fn orders_with_status(&self, status: Option<OrderStatus>) -> Vec<OrderAggregate> {
        self.orders.iter().filter(|o| status.map_or(true, |s| o.status() == s)).cloned().collect()
    }
}

/// Replaces the cached orders with a delivery, unless the listener that
/// produced it has since been replaced or cleared.
fn deliver(state: &watch::Sender<VendorOrdersState>, live: &AtomicU64, epoch: u64, snapshots: &[Snapshot]) {
    let orders = decode_orders(snapshots);
    state.send_if_modified(|s| {
        if live.load(Ordering::SeqCst) != epoch { return false; }
        s.orders = orders;
        s.is_loading = false;
        true
    });
}

pub struct VendorOrderView {
    ctx: Context,
    state: Arc<watch::Sender<VendorOrdersState>>,
    writes: tokio::sync::Mutex<()>,
    listener: Mutex<Option<SyncHandle>>,
    // Bumped on every new listener and on clear.
    epoch: Arc<AtomicU64>,
}

impl VendorOrderView {
    pub fn new(ctx: Context) -> Self {
        let (state, _) = watch::channel(VendorOrdersState::default());
        Self {
            ctx,
            state: Arc::new(state),
            writes: tokio::sync::Mutex::new(()),
            listener: Mutex::new(None),
            epoch: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn state(&self) -> VendorOrdersState { self.state.borrow().clone() }
    pub fn subscribe(&self) -> watch::Receiver<VendorOrdersState> { self.state.subscribe() }

    pub fn orders_with_status(&self, status: Option<OrderStatus>) -> Vec<OrderAggregate> {
        self.state.borrow().orders_with_status(status)
    }

    #[instrument(skip(self))]
    pub async fn fetch_vendor_orders(&self) -> Result<()> {
        self.ctx.require_vendor()?;
        self.state.send_modify(|s| s.is_loading = true);
        match self.ctx.call(self.ctx.store.query(ORDERS, &Filter::All)).await {
            Ok(snapshots) => {
                let orders = decode_orders(&snapshots);
                info!(count = orders.len(), "vendor orders fetched");
                self.state.send_modify(|s| { s.orders = orders; s.is_loading = false; s.last_error = None; });
                Ok(())
            }
            Err(e) => {
                error!(error = %e, "failed to fetch vendor orders");
                self.state.send_modify(|s| { s.is_loading = false; s.last_error = Some(e.clone()); });
                Err(e)
            }
        }
    }

    /// Queries the store directly for orders in one status, newest first.
    #[instrument(skip(self))]
    pub async fn fetch_orders_by_status(&self, status: OrderStatus) -> Result<Vec<OrderAggregate>> {
        self.ctx.require_vendor()?;
        let snapshots = self.ctx.call(self.ctx.store.query(ORDERS, &Filter::field_eq("status", status.as_str()))).await?;
        Ok(decode_orders(&snapshots))
    }

    #[instrument(skip(self))]
    pub async fn listen_to_vendor_orders(&self) -> Result<()> {
        self.ctx.require_vendor()?;
        let listening = self.listener.lock().map(|l| l.as_ref().is_some_and(SyncHandle::is_active)).unwrap_or(false);
        if listening { return Ok(()); }
        self.state.send_modify(|s| s.is_loading = true);

        let epoch = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        let live = Arc::clone(&self.epoch);
        let state = Arc::clone(&self.state);
        let error_state = Arc::clone(&self.state);
        let handle = self.ctx.call(sync::listen(
            self.ctx.store.as_ref(),
            ORDERS,
            Filter::All,
            move |snapshots| deliver(&state, &live, epoch, &snapshots),
            move |e| error_state.send_modify(|s| { s.is_loading = false; s.last_error = Some(e.into()); }),
        )).await;

        match handle {
            Ok(handle) => {
                if let Ok(mut slot) = self.listener.lock() { *slot = Some(handle); }
                Ok(())
            }
            Err(e) => {
                error!(error = %e, "failed to listen to vendor orders");
                self.state.send_modify(|s| { s.is_loading = false; s.last_error = Some(e.clone()); });
                Err(e)
            }
        }
    }

    /// Moves an order to `status`. Only `status` and `updatedAt` are written;
    /// items and totals stay as placed.
    #[instrument(skip(self), fields(order_id = %order_id, status = %status))]
    pub async fn update_order_status(&self, order_id: &OrderId, status: OrderStatus) -> Result<OrderAggregate> {
        let result = self.transition(order_id, status).await;
        match &result {
            Ok(order) => {
                info!("order status updated");
                let order = order.clone();
                self.state.send_modify(|s| {
                    if let Some(cached) = s.orders.iter_mut().find(|o| o.id() == order.id()) {
                        *cached = order;
                    }
                    s.last_error = None;
                });
            }
            Err(e @ HerbError::Storage(_)) => {
                error!(error = %e, "status update failed");
                self.state.send_modify(|s| s.last_error = Some(e.clone()));
            }
            Err(e) => {
                warn!(error = %e, "status update rejected");
                self.state.send_modify(|s| s.last_error = Some(e.clone()));
            }
        }
        result
    }

    async fn transition(&self, order_id: &OrderId, status: OrderStatus) -> Result<OrderAggregate> {
        self.ctx.require_vendor()?;
        let _turn = self.writes.lock().await;

        let mut order: OrderAggregate = self.ctx.call(self.ctx.store.get(ORDERS, order_id.as_str())).await?
            .ok_or_else(|| HerbError::not_found("Order", order_id))?
            .decode()?;
        order.set_status(status, self.ctx.config.transition_policy)?;

        let patch = json!({ "status": order.status(), "updatedAt": order.updated_at() });
        self.ctx.call(self.ctx.store.update(ORDERS, order_id.as_str(), patch)).await?;
        log_events(order.take_events());
        Ok(order)
    }

    pub fn clear_vendor_orders(&self) {
        self.epoch.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut slot) = self.listener.lock() { slot.take(); }
        self.state.send_replace(VendorOrdersState::default());
    }

    /// Listens while a vendor is signed in; anyone else sees nothing.
    pub async fn on_auth_change(&self, session: Option<&Session>) -> Result<()> {
        match session {
            Some(s) if s.is_vendor => self.listen_to_vendor_orders().await,
            _ => { self.clear_vendor_orders(); Ok(()) }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::aggregates::catalog_item::tests::catalog_item;
    use crate::domain::aggregates::{CartAggregate, OrderNumber, TransitionPolicy};
    use crate::domain::value_objects::{Money, UserId};
    use crate::services::testing::{eventually, harness, Harness};
    use crate::store::testing::FlakyStore;
    use crate::store::{DocumentStore, StoreError};

    async fn seed_order(h: &Harness, owner: &str, number: u64) -> OrderAggregate {
        let mut cart = CartAggregate::new(UserId::from(owner));
        cart.add_item(&catalog_item("p1", 1000), 2).unwrap();
        let mut order = OrderAggregate::place(OrderId::generate(), OrderNumber::new(number), &cart).unwrap();
        order.take_events();
        h.store.set(ORDERS, order.id().as_str(), serde_json::to_value(&order).unwrap()).await.unwrap();
        order
    }

    fn vendor_view(h: &Harness) -> VendorOrderView {
        h.auth.sign_in(Session::vendor("v1"));
        VendorOrderView::new(h.ctx.clone())
    }

    #[tokio::test]
    async fn test_vendor_sees_every_customer() {
        let h = harness();
        seed_order(&h, "a", 1).await;
        seed_order(&h, "b", 2).await;
        let view = vendor_view(&h);
        view.fetch_vendor_orders().await.unwrap();
        assert_eq!(view.state().orders.len(), 2);
        assert_eq!(view.orders_with_status(Some(OrderStatus::Pending)).len(), 2);
        assert!(view.orders_with_status(Some(OrderStatus::Shipped)).is_empty());
    }

    #[tokio::test]
    async fn test_set_status_changes_only_status() {
        let h = harness();
        let placed = seed_order(&h, "a", 1).await;
        let view = vendor_view(&h);
        view.fetch_vendor_orders().await.unwrap();

        let updated = view.update_order_status(placed.id(), OrderStatus::Shipped).await.unwrap();
        assert_eq!(updated.status(), OrderStatus::Shipped);
        assert!(updated.updated_at() > placed.updated_at());

        let stored: OrderAggregate = h.store.get(ORDERS, placed.id().as_str()).await.unwrap().unwrap().decode().unwrap();
        assert_eq!(stored.status(), OrderStatus::Shipped);
        assert_eq!(stored.items(), placed.items());
        assert_eq!(stored.total_price(), Money::from_minor(2000));
        assert_eq!(stored.owner_id(), placed.owner_id());
        assert!(stored.updated_at() > placed.updated_at());
        assert_eq!(view.orders_with_status(Some(OrderStatus::Shipped)).len(), 1);

        let shipped = view.fetch_orders_by_status(OrderStatus::Shipped).await.unwrap();
        assert_eq!(shipped.len(), 1);
    }

    #[tokio::test]
    async fn test_customer_cannot_change_status() {
        let h = harness();
        let placed = seed_order(&h, "a", 1).await;
        let view = VendorOrderView::new(h.ctx.clone());
        h.auth.sign_in(Session::customer("a"));
        assert_eq!(view.update_order_status(placed.id(), OrderStatus::Delivered).await, Err(HerbError::Unauthenticated));
        assert_eq!(view.fetch_vendor_orders().await, Err(HerbError::Unauthenticated));
    }

    #[tokio::test]
    async fn test_unknown_order_is_not_found() {
        let h = harness();
        let view = vendor_view(&h);
        let err = view.update_order_status(&OrderId::from("nope"), OrderStatus::Shipped).await.unwrap_err();
        assert_eq!(err, HerbError::not_found("Order", "nope"));
        assert_eq!(view.state().last_error, Some(err));
    }

    #[tokio::test]
    async fn test_strict_policy_rejects_skips() {
        let mut h = harness();
        h.ctx.config.transition_policy = TransitionPolicy::Strict;
        let placed = seed_order(&h, "a", 1).await;
        let view = vendor_view(&h);
        let err = view.update_order_status(placed.id(), OrderStatus::Delivered).await.unwrap_err();
        assert!(matches!(err, HerbError::Validation(_)));
        let stored = h.store.get(ORDERS, placed.id().as_str()).await.unwrap().unwrap();
        assert_eq!(stored.version, 1);

        view.update_order_status(placed.id(), OrderStatus::Processing).await.unwrap();
        view.update_order_status(placed.id(), OrderStatus::Cancelled).await.unwrap();
        assert!(view.update_order_status(placed.id(), OrderStatus::Pending).await.is_err());
    }

    #[tokio::test]
    async fn test_listener_follows_new_orders_and_sign_out_clears() {
        let h = harness();
        let view = vendor_view(&h);
        view.on_auth_change(Some(&Session::vendor("v1"))).await.unwrap();
        seed_order(&h, "a", 1).await;
        eventually(|| async { view.state().orders.len() == 1 }).await;

        view.on_auth_change(Some(&Session::customer("v1"))).await.unwrap();
        assert_eq!(view.state(), VendorOrdersState::default());
        seed_order(&h, "b", 2).await;
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(view.state().orders.is_empty());
    }

    #[tokio::test]
    async fn test_delivery_after_clear_is_dropped() {
        let h = harness();
        let view = vendor_view(&h);
        view.listen_to_vendor_orders().await.unwrap();
        let stale_epoch = view.epoch.load(Ordering::SeqCst);
        seed_order(&h, "a", 1).await;
        let snapshots = h.store.query(ORDERS, &Filter::All).await.unwrap();

        view.clear_vendor_orders();
        deliver(&view.state, &view.epoch, stale_epoch, &snapshots);
        assert_eq!(view.state(), VendorOrdersState::default());

        // A late delivery from the old listener cannot overwrite the new one.
        view.listen_to_vendor_orders().await.unwrap();
        eventually(|| async { view.state().orders.len() == 1 }).await;
        deliver(&view.state, &view.epoch, stale_epoch, &[]);
        assert_eq!(view.state().orders.len(), 1);
    }

    #[tokio::test]
    async fn test_stalled_vendor_subscription_times_out() {
        let h = harness();
        let flaky = Arc::new(FlakyStore::new(h.store.clone()));
        flaky.stall_subscriptions(true);
        h.auth.sign_in(Session::vendor("v1"));
        let view = VendorOrderView::new(Context::new(flaky, h.auth.clone(), h.ctx.config.clone()));

        let err = view.on_auth_change(Some(&Session::vendor("v1"))).await.unwrap_err();
        assert!(matches!(err, HerbError::Storage(StoreError::Timeout(_))));
        assert!(!view.state().is_loading);
    }
}
