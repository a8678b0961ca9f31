//! Cart service: the signed-in user's live cart.

use std::sync::{Arc, Mutex};

use tokio::sync::{watch, MutexGuard};
use tracing::{error, info, instrument, warn};

use super::{encode, Context};
use crate::auth::Session;
use crate::domain::aggregates::{CartAggregate, CatalogItem};
use crate::domain::events::log_events;
use crate::domain::totals::Totals;
use crate::domain::value_objects::{ProductId, UserId};
use crate::error::{HerbError, Result};
use crate::store::{Filter, CARTS};
use crate::sync::{self, SyncHandle};

#[derive(Clone, Debug, Default, PartialEq)]
pub struct CartState {
    pub cart: Option<CartAggregate>,
    pub is_loading: bool,
    pub last_error: Option<HerbError>,
    owner: Option<UserId>,
    version: u64,
}

impl CartState {
    pub fn owner(&self) -> Option<&UserId> { self.owner.as_ref() }
    pub fn totals(&self) -> Totals { self.cart.as_ref().map(|c| c.totals()).unwrap_or_default() }

    fn loading(owner: &UserId) -> Self {
        Self { owner: Some(owner.clone()), is_loading: true, ..Self::default() }
    }
}

/// Accepts a confirmed cart only for the current owner and only if newer
/// than what is held.
fn reconcile(state: &watch::Sender<CartState>, cart: CartAggregate, version: u64) {
    state.send_if_modified(|s| {
        if s.owner.as_ref() != Some(cart.owner_id()) || version <= s.version {
            return false;
        }
        s.cart = Some(cart);
        s.version = version;
        s.is_loading = false;
        true
    });
}

pub struct CartService {
    ctx: Context,
    state: Arc<watch::Sender<CartState>>,
    // FIFO: overlapping mutations reach the store in call order.
    writes: tokio::sync::Mutex<()>,
    listener: Mutex<Option<SyncHandle>>,
}

impl CartService {
    pub fn new(ctx: Context) -> Self {
        let (state, _) = watch::channel(CartState::default());
        Self { ctx, state: Arc::new(state), writes: tokio::sync::Mutex::new(()), listener: Mutex::new(None) }
    }

    pub fn state(&self) -> CartState { self.state.borrow().clone() }
    pub fn subscribe(&self) -> watch::Receiver<CartState> { self.state.subscribe() }

    /// Loads the owner's cart, creating an empty one if none is stored, and
    /// keeps it in sync with remote changes.
    #[instrument(skip(self), fields(owner = %owner))]
    pub async fn load_and_subscribe(&self, owner: &UserId) -> Result<()> {
        if self.is_listening_for(owner) { return Ok(()); }
        self.state.send_replace(CartState::loading(owner));

        match self.load(owner).await {
            Ok(handle) => {
                if let Ok(mut slot) = self.listener.lock() { *slot = Some(handle); }
                Ok(())
            }
            Err(e) => {
                error!(error = %e, "failed to load cart");
                self.state.send_modify(|s| { s.is_loading = false; s.last_error = Some(e.clone()); });
                Err(e)
            }
        }
    }

    async fn load(&self, owner: &UserId) -> Result<SyncHandle> {
        let stored = self.ctx.call(self.ctx.store.get(CARTS, owner.as_str())).await?;
        let (cart, version) = match stored {
            Some(snap) => (snap.decode::<CartAggregate>()?, snap.version),
            None => {
                info!("creating initial cart");
                let cart = CartAggregate::new(owner.clone());
                let version = self.ctx.call(self.ctx.store.set(CARTS, owner.as_str(), encode(&cart)?)).await?;
                (cart, version)
            }
        };
        info!(items = cart.items().len(), total_price = %cart.total_price(), "cart loaded");
        reconcile(&self.state, cart, version);

        let state = Arc::clone(&self.state);
        let error_state = Arc::clone(&self.state);
        let key = owner.to_string();
        let handle = self.ctx.call(sync::listen(
            self.ctx.store.as_ref(),
            CARTS,
            Filter::field_eq("ownerId", owner.as_str()),
            move |snapshots| {
                for snap in snapshots.iter().filter(|s| s.id == key) {
                    match snap.decode::<CartAggregate>() {
                        Ok(cart) => reconcile(&state, cart, snap.version),
                        Err(e) => warn!(error = %e, "undecodable cart document"),
                    }
                }
            },
            move |e| error_state.send_modify(|s| s.last_error = Some(e.into())),
        )).await?;
        Ok(handle)
    }

    fn is_listening_for(&self, owner: &UserId) -> bool {
        let listening = self.listener.lock().map(|l| l.as_ref().is_some_and(SyncHandle::is_active)).unwrap_or(false);
        listening && self.state.borrow().owner.as_ref() == Some(owner)
    }

    #[instrument(skip(self, item), fields(product_id = %item.id))]
    pub async fn add_item(&self, item: &CatalogItem, quantity: i64) -> Result<()> {
        let result = self.mutate(|cart| Ok(cart.add_item(item, quantity)?)).await;
        self.record("add_item", result)
    }

    /// Sets a line's quantity; zero or less removes the line.
    #[instrument(skip(self))]
    pub async fn update_quantity(&self, product_id: &ProductId, new_quantity: i64) -> Result<()> {
        let result = self.mutate(|cart| Ok(cart.update_quantity(product_id, new_quantity)?)).await;
        self.record("update_quantity", result)
    }

    /// Removes a line. Removing an absent product succeeds without writing.
    #[instrument(skip(self))]
    pub async fn remove_item(&self, product_id: &ProductId) -> Result<()> {
        let result = self.mutate(|cart| { cart.remove_item(product_id); Ok(()) }).await;
        self.record("remove_item", result)
    }

    /// Read-modify-write against the stored cart. Nothing is written when the
    /// mutation raised no events.
    async fn mutate<F>(&self, apply: F) -> Result<()>
    where
        F: FnOnce(&mut CartAggregate) -> Result<()>,
    {
        let owner = self.ctx.require_user()?.user_id;
        let _turn = self.writes.lock().await;

        let stored = self.ctx.call(self.ctx.store.get(CARTS, owner.as_str())).await?;
        let mut cart = match stored {
            Some(snap) => snap.decode::<CartAggregate>()?,
            None => CartAggregate::new(owner.clone()),
        };
        apply(&mut cart)?;
        let events = cart.take_events();
        if events.is_empty() { return Ok(()); }

        let version = self.ctx.call(self.ctx.store.set(CARTS, owner.as_str(), encode(&cart)?)).await?;
        log_events(events);
        reconcile(&self.state, cart, version);
        Ok(())
    }

    fn record(&self, op: &'static str, result: Result<()>) -> Result<()> {
        match &result {
            Ok(()) => {
                info!(op, "cart updated");
                self.state.send_if_modified(|s| s.last_error.take().is_some());
            }
            Err(e @ HerbError::Storage(_)) => {
                error!(op, error = %e, "cart write failed");
                self.state.send_modify(|s| s.last_error = Some(e.clone()));
            }
            Err(e) => {
                warn!(op, error = %e, "cart operation rejected");
                self.state.send_modify(|s| s.last_error = Some(e.clone()));
            }
        }
        result
    }

    /// Serializes checkout with item mutations.
    pub(crate) async fn lock_writes(&self) -> MutexGuard<'_, ()> { self.writes.lock().await }

    pub(crate) fn apply_confirmed(&self, cart: CartAggregate, version: u64) { reconcile(&self.state, cart, version) }

    /// Drops the subscription and forgets the cart, e.g. on sign-out.
    pub fn clear_local(&self) {
        if let Ok(mut slot) = self.listener.lock() { slot.take(); }
        self.state.send_replace(CartState::default());
        info!("local cart cleared");
    }

    pub async fn on_auth_change(&self, session: Option<&Session>) -> Result<()> {
        match session {
            Some(s) => self.load_and_subscribe(&s.user_id).await,
            None => { self.clear_local(); Ok(()) }
        }
    }
}
