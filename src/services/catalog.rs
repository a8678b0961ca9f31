//! Read-only catalog lookup.

use std::sync::{PoisonError, RwLock};

use tracing::{info, instrument, warn};

use super::{newest_first, Context};
use crate::domain::aggregates::CatalogItem;
use crate::domain::value_objects::ProductId;
use crate::error::Result;
use crate::store::{Filter, ITEMS};

/// Lookup over listed catalog items. Inactive items are never returned.
pub trait CatalogLookup: Send + Sync {
    fn get_active_items(&self) -> Vec<CatalogItem>;
    fn get_item_by_id(&self, id: &ProductId) -> Option<CatalogItem>;
}

/// Catalog cache filled from the `items` collection.
pub struct Catalog {
    ctx: Context,
    items: RwLock<Vec<CatalogItem>>,
}

impl Catalog {
    pub fn new(ctx: Context) -> Self { Self { ctx, items: RwLock::new(Vec::new()) } }

    /// Reloads active items, newest first. Returns how many are listed.
    #[instrument(skip(self))]
    pub async fn refresh(&self) -> Result<usize> {
        let snapshots = self.ctx.call(self.ctx.store.query(ITEMS, &Filter::All)).await?;
        let mut items: Vec<CatalogItem> = snapshots.iter()
            .filter_map(|snap| match snap.decode::<CatalogItem>() {
                Ok(item) => Some(item),
                Err(e) => {
                    warn!(id = %snap.id, error = %e, "skipping undecodable item");
                    None
                }
            })
            .filter(|item| item.is_active)
            .collect();
        newest_first(&mut items, |i| i.created_at);
        let count = items.len();
        // The cache is replaced wholesale, so a poisoned lock holds nothing worth keeping.
        *self.items.write().unwrap_or_else(PoisonError::into_inner) = items;
        info!(count, "catalog refreshed");
        Ok(count)
    }
}

impl CatalogLookup for Catalog {
    fn get_active_items(&self) -> Vec<CatalogItem> {
        self.items.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn get_item_by_id(&self, id: &ProductId) -> Option<CatalogItem> {
        self.items.read().unwrap_or_else(PoisonError::into_inner).iter().find(|i| &i.id == id && i.is_active).cloned()
    }
}
