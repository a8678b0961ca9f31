//! HerbVerse storefront core
//!
//! Cart, order and vendor state for the HerbVerse herb shop, kept in sync
//! with a remote document store.
//!
//! ## Features
//! - Catalog lookup of active items
//! - Per-user cart with derived totals
//! - Checkout into immutable, numbered orders
//! - Vendor order status management and inventory editing
//!
//! [`Storefront`] wires every service around one [`store::DocumentStore`]
//! and one [`auth::AuthProvider`].

pub mod api;
pub mod auth;
pub mod config;
pub mod domain;
pub mod error;
pub mod services;
pub mod store;
pub mod sync;
pub mod telemetry;

use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{info, warn};

pub use auth::{AuthProvider, AuthService, Session};
pub use config::Config;
pub use error::{HerbError, Result};
pub use services::{
    CartService, Catalog, CatalogLookup, OrderService, VendorCatalog, VendorOrderView,
};

use crate::domain::value_objects::{OrderId, ProductId};
use crate::services::Context;
use crate::store::DocumentStore;

/// All storefront services for one device-local session.
pub struct Storefront {
    ctx: Context,
    pub catalog: Catalog,
    pub cart: CartService,
    pub orders: OrderService,
    pub vendor_orders: VendorOrderView,
    pub vendor_items: VendorCatalog,
}

impl Storefront {
    pub fn new(store: Arc<dyn DocumentStore>, auth: Arc<dyn AuthProvider>, config: Config) -> Self {
        let ctx = Context::new(store, auth, config);
        Self {
            catalog: Catalog::new(ctx.clone()),
            cart: CartService::new(ctx.clone()),
            orders: OrderService::new(ctx.clone()),
            vendor_orders: VendorOrderView::new(ctx.clone()),
            vendor_items: VendorCatalog::new(ctx.clone()),
            ctx,
        }
    }

    pub fn session(&self) -> Option<Session> { self.ctx.auth.current_session() }

    /// Brings every service in line with `session`. All services are updated
    /// even if one fails; the first error is returned.
    pub async fn apply_session(&self, session: Option<&Session>) -> Result<()> {
        let results = [
            self.cart.on_auth_change(session).await,
            self.orders.on_auth_change(session).await,
            self.vendor_orders.on_auth_change(session).await,
            self.vendor_items.on_auth_change(session).await,
        ];
        results.into_iter().collect()
    }

    /// Follows the auth provider for the lifetime of the returned task.
    pub fn spawn_auth_listener(self: &Arc<Self>) -> JoinHandle<()> {
        let storefront = Arc::clone(self);
        let mut sessions = self.ctx.auth.watch();
        tokio::spawn(async move {
            loop {
                let session = sessions.borrow_and_update().clone();
                info!(signed_in = session.is_some(), "session changed");
                if let Err(e) = storefront.apply_session(session.as_ref()).await {
                    warn!(error = %e, "services did not follow session change");
                }
                if sessions.changed().await.is_err() { break; }
            }
        })
    }

    /// Adds a listed catalog item to the cart.
    pub async fn add_to_cart(&self, product_id: &ProductId, quantity: i64) -> Result<()> {
        let item = self.catalog.get_item_by_id(product_id)
            .ok_or_else(|| HerbError::not_found("Item", product_id))?;
        self.cart.add_item(&item, quantity).await
    }

    pub async fn checkout(&self) -> Result<OrderId> {
        self.orders.create_order_from_cart(&self.cart).await
    }
}
