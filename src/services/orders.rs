//! Order service: checkout and the signed-in user's order history.

use std::sync::{Arc, Mutex};

use tokio::sync::watch;
use tracing::{error, info, instrument, warn};

use super::{encode, newest_first, CartService, Context};
use crate::auth::Session;
use crate::domain::aggregates::{CartAggregate, OrderAggregate, OrderNumber};
use crate::domain::events::log_events;
use crate::domain::value_objects::{OrderId, UserId};
use crate::error::{HerbError, Result};
use crate::store::{Filter, Snapshot, Write, CARTS, ORDERS, ORDER_COUNTER};
use crate::sync::{self, SyncHandle};

#[derive(Clone, Debug, Default, PartialEq)]
pub struct OrdersState {
    /// Newest first.
    pub orders: Vec<OrderAggregate>,
    /// The order produced by the latest successful checkout.
    pub current_order: Option<OrderAggregate>,
    pub is_loading: bool,
    pub last_error: Option<HerbError>,
    owner: Option<UserId>,
}

impl OrdersState {
    pub fn owner(&self) -> Option<&UserId> { self.owner.as_ref() }
}

pub(crate) fn decode_orders(snapshots: &[Snapshot]) -> Vec<OrderAggregate> {
    let mut orders: Vec<OrderAggregate> = snapshots.iter()
        .filter_map(|snap| match snap.decode() {
            Ok(order) => Some(order),
            Err(e) => {
                warn!(id = %snap.id, error = %e, "skipping undecodable order");
                None
            }
        })
        .collect();
    newest_first(&mut orders, |o| o.created_at());
    orders
}

pub struct OrderService {
    ctx: Context,
    state: Arc<watch::Sender<OrdersState>>,
    listener: Mutex<Option<SyncHandle>>,
}

impl OrderService {
    pub fn new(ctx: Context) -> Self {
        let (state, _) = watch::channel(OrdersState::default());
        Self { ctx, state: Arc::new(state), listener: Mutex::new(None) }
    }

    pub fn state(&self) -> OrdersState { self.state.borrow().clone() }
    pub fn subscribe(&self) -> watch::Receiver<OrdersState> { self.state.subscribe() }

    /// Turns the signed-in user's cart into a pending order and empties the
    /// cart, both in one atomic commit.
    #[instrument(skip(self, cart))]
    pub async fn create_order_from_cart(&self, cart: &CartService) -> Result<OrderId> {
        let result = self.checkout(cart).await;
        match &result {
            Ok(order) => {
                info!(order_id = %order.id(), order_number = %order.order_number(), total_price = %order.total_price(), "order placed");
                let order = order.clone();
                self.state.send_modify(|s| {
                    s.orders.retain(|o| o.id() != order.id());
                    s.orders.insert(0, order.clone());
                    s.current_order = Some(order);
                    s.last_error = None;
                });
            }
            Err(e) => {
                error!(error = %e, "checkout failed");
                self.state.send_modify(|s| s.last_error = Some(e.clone()));
            }
        }
        result.map(|order| order.id().clone())
    }

    async fn checkout(&self, cart_service: &CartService) -> Result<OrderAggregate> {
        let owner = self.ctx.require_user()?.user_id;
        let _turn = cart_service.lock_writes().await;

        let mut cart = match self.ctx.call(self.ctx.store.get(CARTS, owner.as_str())).await? {
            Some(snap) => snap.decode::<CartAggregate>()?,
            None => return Err(HerbError::EmptyCart),
        };
        if cart.is_empty() { return Err(HerbError::EmptyCart); }

        // A failed commit below leaves a gap in the numbering, never a duplicate.
        let number = self.ctx.call(self.ctx.store.next_sequence(ORDER_COUNTER)).await?;
        let mut order = OrderAggregate::place(OrderId::generate(), OrderNumber::new(number), &cart)?;
        cart.clear();

        let versions = self.ctx.call(self.ctx.store.commit(vec![
            Write::set(ORDERS, order.id().as_str(), encode(&order)?),
            Write::set(CARTS, owner.as_str(), encode(&cart)?),
        ])).await?;

        let mut events = order.take_events();
        events.extend(cart.take_events());
        log_events(events);
        if let Some(&version) = versions.get(1) {
            cart_service.apply_confirmed(cart, version);
        }
        Ok(order)
    }

    /// One-shot load of the user's orders. Without a session this clears
    /// local state and succeeds.
    #[instrument(skip(self))]
    pub async fn fetch_user_orders(&self) -> Result<()> {
        let Some(owner) = self.ctx.auth.current_user_id() else {
            self.clear_orders();
            return Ok(());
        };
        self.state.send_modify(|s| { s.is_loading = true; s.owner = Some(owner.clone()); });
        let result = self.ctx.call(self.ctx.store.query(ORDERS, &Filter::field_eq("ownerId", owner.as_str()))).await;
        match result {
            Ok(snapshots) => {
                let orders = decode_orders(&snapshots);
                info!(count = orders.len(), "orders fetched");
                self.state.send_modify(|s| { s.orders = orders; s.is_loading = false; s.last_error = None; });
                Ok(())
            }
            Err(e) => {
                error!(error = %e, "failed to fetch orders");
                self.state.send_modify(|s| { s.is_loading = false; s.last_error = Some(e.clone()); });
                Err(e)
            }
        }
    }

    /// Keeps `orders` in sync with every order owned by `owner`.
    #[instrument(skip(self), fields(owner = %owner))]
    pub async fn listen_to_user_orders(&self, owner: &UserId) -> Result<()> {
        if self.is_listening_for(owner) { return Ok(()); }
        self.state.send_replace(OrdersState { owner: Some(owner.clone()), is_loading: true, ..OrdersState::default() });

        let state = Arc::clone(&self.state);
        let error_state = Arc::clone(&self.state);
        let expected = owner.clone();
        let handle = self.ctx.call(sync::listen(
            self.ctx.store.as_ref(),
            ORDERS,
            Filter::field_eq("ownerId", owner.as_str()),
            move |snapshots| {
                let orders = decode_orders(&snapshots);
                state.send_if_modified(|s| {
                    if s.owner.as_ref() != Some(&expected) { return false; }
                    s.orders = orders;
                    s.is_loading = false;
                    true
                });
            },
            move |e| error_state.send_modify(|s| { s.is_loading = false; s.last_error = Some(e.into()); }),
        )).await;

        match handle {
            Ok(handle) => {
                if let Ok(mut slot) = self.listener.lock() { *slot = Some(handle); }
                Ok(())
            }
            Err(e) => {
                error!(error = %e, "failed to listen to orders");
                self.state.send_modify(|s| { s.is_loading = false; s.last_error = Some(e.clone()); });
                Err(e)
            }
        }
    }

    fn is_listening_for(&self, owner: &UserId) -> bool {
        let listening = self.listener.lock().map(|l| l.as_ref().is_some_and(SyncHandle::is_active)).unwrap_or(false);
        listening && self.state.borrow().owner.as_ref() == Some(owner)
    }

    pub fn clear_orders(&self) {
        if let Ok(mut slot) = self.listener.lock() { slot.take(); }
        self.state.send_replace(OrdersState::default());
    }

    pub async fn on_auth_change(&self, session: Option<&Session>) -> Result<()> {
        match session {
            Some(s) => self.listen_to_user_orders(&s.user_id).await,
            None => { self.clear_orders(); Ok(()) }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::aggregates::catalog_item::tests::catalog_item;
    use crate::domain::aggregates::OrderStatus;
    use crate::domain::value_objects::Money;
    use crate::services::testing::{eventually, harness, Harness};
    use crate::store::testing::FlakyStore;
    use crate::auth::AuthService;
    use crate::store::{DocumentStore, StoreError};
    use std::collections::HashSet;

    struct Shopper {
        cart: CartService,
        orders: OrderService,
    }

    async fn shopper(h: &Harness, user: &str) -> Shopper {
        let session = Session::customer(user);
        h.auth.sign_in(session.clone());
        let shopper = Shopper { cart: CartService::new(h.ctx.clone()), orders: OrderService::new(h.ctx.clone()) };
        shopper.cart.on_auth_change(Some(&session)).await.unwrap();
        shopper.orders.on_auth_change(Some(&session)).await.unwrap();
        shopper
    }

    #[tokio::test]
    async fn test_checkout_snapshots_cart_and_empties_it() {
        let h = harness();
        let s = shopper(&h, "u1").await;
        s.cart.add_item(&catalog_item("p1", 1000), 2).await.unwrap();
        s.cart.add_item(&catalog_item("p2", 350), 1).await.unwrap();

        let id = s.orders.create_order_from_cart(&s.cart).await.unwrap();
        let state = s.orders.state();
        let order = state.current_order.unwrap();
        assert_eq!(order.id(), &id);
        assert_eq!(order.status(), OrderStatus::Pending);
        assert_eq!(order.total_price(), Money::from_minor(2350));
        assert_eq!(order.total_quantity(), 3);
        assert_eq!(order.order_number().to_string(), "ORD-000001");
        assert!(order.verify_totals());
        assert!(s.cart.state().cart.unwrap().is_empty());

        let stored: OrderAggregate = h.store.get(ORDERS, id.as_str()).await.unwrap().unwrap().decode().unwrap();
        assert_eq!(stored, order);
        let remote_cart: CartAggregate = h.store.get(CARTS, "u1").await.unwrap().unwrap().decode().unwrap();
        assert!(remote_cart.is_empty());
        eventually(|| async { s.orders.state().orders.len() == 1 }).await;
    }

    #[tokio::test]
    async fn test_empty_cart_checkout_writes_nothing() {
        let h = harness();
        let s = shopper(&h, "u1").await;
        assert_eq!(s.orders.create_order_from_cart(&s.cart).await, Err(HerbError::EmptyCart));
        assert!(h.store.query(ORDERS, &Filter::All).await.unwrap().is_empty());
        assert_eq!(s.orders.state().last_error, Some(HerbError::EmptyCart));
        assert!(s.orders.state().current_order.is_none());
    }

    #[tokio::test]
    async fn test_checkout_requires_session() {
        let h = harness();
        let cart = CartService::new(h.ctx.clone());
        let orders = OrderService::new(h.ctx.clone());
        assert_eq!(orders.create_order_from_cart(&cart).await, Err(HerbError::Unauthenticated));
    }

    #[tokio::test]
    async fn test_order_keeps_snapshot_after_cart_changes() {
        let h = harness();
        let s = shopper(&h, "u1").await;
        s.cart.add_item(&catalog_item("p1", 1000), 1).await.unwrap();
        let id = s.orders.create_order_from_cart(&s.cart).await.unwrap();

        s.cart.add_item(&catalog_item("p1", 9999), 5).await.unwrap();
        let stored: OrderAggregate = h.store.get(ORDERS, id.as_str()).await.unwrap().unwrap().decode().unwrap();
        assert_eq!(stored.items().len(), 1);
        assert_eq!(stored.items()[0].price, Money::from_minor(1000));
        assert_eq!(stored.total_price(), Money::from_minor(1000));
    }

    #[tokio::test]
    async fn test_order_numbers_are_unique_across_users() {
        let h = harness();
        let mut numbers = Vec::new();
        for user in ["a", "b", "c", "d"] {
            let s = shopper(&h, user).await;
            s.cart.add_item(&catalog_item("p1", 100), 1).await.unwrap();
            s.orders.create_order_from_cart(&s.cart).await.unwrap();
            numbers.push(s.orders.state().current_order.unwrap().order_number().value());
        }
        assert_eq!(numbers, vec![1, 2, 3, 4]);
        let distinct: HashSet<_> = h.store.query(ORDERS, &Filter::All).await.unwrap()
            .iter().map(|snap| snap.decode::<OrderAggregate>().unwrap().order_number()).collect();
        assert_eq!(distinct.len(), 4);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_checkouts_get_distinct_numbers() {
        let h = harness();
        let checkouts: Vec<_> = (0..8).map(|i| {
            let store = h.store.clone();
            let config = h.ctx.config.clone();
            tokio::spawn(async move {
                let auth = Arc::new(AuthService::new());
                auth.sign_in(Session::customer(format!("user-{i}")));
                let ctx = Context::new(store, auth, config);
                let cart = CartService::new(ctx.clone());
                let orders = OrderService::new(ctx);
                cart.add_item(&catalog_item("p1", 100), 1).await.unwrap();
                orders.create_order_from_cart(&cart).await.unwrap();
                orders.state().current_order.unwrap().order_number().value()
            })
        }).collect();

        let mut numbers = HashSet::new();
        for checkout in checkouts {
            assert!(numbers.insert(checkout.await.unwrap()));
        }
        assert_eq!(numbers, (1..=8).collect::<HashSet<u64>>());
    }

    #[tokio::test]
    async fn test_stalled_order_subscription_times_out() {
        let h = harness();
        let flaky = Arc::new(FlakyStore::new(h.store.clone()));
        flaky.stall_subscriptions(true);
        let orders = OrderService::new(Context::new(flaky, h.auth.clone(), h.ctx.config.clone()));

        let err = orders.listen_to_user_orders(&"u1".into()).await.unwrap_err();
        assert!(matches!(err, HerbError::Storage(StoreError::Timeout(_))));
        assert!(!orders.state().is_loading);
        assert_eq!(orders.state().last_error, Some(err));
    }

    #[tokio::test]
    async fn test_failed_commit_keeps_cart() {
        let h = harness();
        let flaky = Arc::new(FlakyStore::new(h.store.clone()));
        let ctx = Context::new(flaky.clone(), h.auth.clone(), h.ctx.config.clone());
        let session = Session::customer("u1");
        h.auth.sign_in(session.clone());
        let cart = CartService::new(ctx.clone());
        let orders = OrderService::new(ctx);
        cart.on_auth_change(Some(&session)).await.unwrap();
        cart.add_item(&catalog_item("p1", 500), 2).await.unwrap();

        flaky.fail_writes(true);
        let err = orders.create_order_from_cart(&cart).await.unwrap_err();
        assert!(matches!(err, HerbError::Storage(_)));
        assert_eq!(cart.state().totals().total_quantity, 2);
        let remote: CartAggregate = h.store.get(CARTS, "u1").await.unwrap().unwrap().decode().unwrap();
        assert_eq!(remote.total_quantity(), 2);
        assert!(h.store.query(ORDERS, &Filter::All).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_fetch_without_session_clears() {
        let h = harness();
        let s = shopper(&h, "u1").await;
        s.cart.add_item(&catalog_item("p1", 100), 1).await.unwrap();
        s.orders.create_order_from_cart(&s.cart).await.unwrap();
        s.orders.fetch_user_orders().await.unwrap();
        assert_eq!(s.orders.state().orders.len(), 1);

        h.auth.sign_out();
        s.orders.fetch_user_orders().await.unwrap();
        assert_eq!(s.orders.state(), OrdersState::default());
    }

    #[tokio::test]
    async fn test_user_sees_only_own_orders() {
        let h = harness();
        let a = shopper(&h, "a").await;
        a.cart.add_item(&catalog_item("p1", 100), 1).await.unwrap();
        a.orders.create_order_from_cart(&a.cart).await.unwrap();

        let b = shopper(&h, "b").await;
        b.orders.fetch_user_orders().await.unwrap();
        assert!(b.orders.state().orders.is_empty());
    }
}
