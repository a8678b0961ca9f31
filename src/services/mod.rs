//! Observable services exposed to the UI layer.
//!
//! Each service owns a `watch` channel with its current state and a set of
//! async operations. Mutations are pessimistic: local state changes only
//! after the store acknowledged the write.

pub mod cart;
pub mod catalog;
pub mod orders;
pub mod vendor_items;
pub mod vendor_orders;

pub use cart::{CartService, CartState};
pub use catalog::{Catalog, CatalogLookup};
pub use orders::{OrderService, OrdersState};
pub use vendor_items::{VendorCatalog, VendorItemsState};
pub use vendor_orders::{VendorOrderView, VendorOrdersState};

use std::future::Future;
use std::sync::Arc;

use crate::auth::{AuthProvider, Session};
use crate::config::Config;
use crate::error::{HerbError, Result};
use crate::store::{timed, Document, DocumentStore, StoreError};

/// Collaborators shared by every service.
#[derive(Clone)]
pub struct Context {
    pub store: Arc<dyn DocumentStore>,
    pub auth: Arc<dyn AuthProvider>,
    pub config: Config,
}

impl Context {
    pub fn new(store: Arc<dyn DocumentStore>, auth: Arc<dyn AuthProvider>, config: Config) -> Self {
        Self { store, auth, config }
    }

    /// Runs a store call under the configured timeout.
    pub(crate) async fn call<T, F>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = std::result::Result<T, StoreError>>,
    {
        timed(self.config.store_timeout, fut).await.map_err(HerbError::from)
    }

    pub(crate) fn require_user(&self) -> Result<Session> {
        self.auth.current_session().ok_or(HerbError::Unauthenticated)
    }

    pub(crate) fn require_vendor(&self) -> Result<Session> {
        self.require_user().and_then(|s| if s.is_vendor { Ok(s) } else { Err(HerbError::Unauthenticated) })
    }
}

pub(crate) fn encode<T: serde::Serialize>(value: &T) -> Result<Document> {
    serde_json::to_value(value).map_err(|e| HerbError::Storage(e.into()))
}

/// Sorts newest first, matching how every list is presented.
pub(crate) fn newest_first<T, K: Ord>(items: &mut [T], key: impl Fn(&T) -> K) {
    items.sort_by(|a, b| key(b).cmp(&key(a)));
}
