//! Vendor catalog management.

use std::sync::Arc;

use chrono::Utc;
use serde_json::json;
use tokio::sync::watch;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;
use validator::Validate;

use super::{encode, newest_first, Context};
use crate::auth::Session;
use crate::domain::aggregates::{CatalogItem, CatalogItemPatch, NewCatalogItem};
use crate::domain::value_objects::ProductId;
use crate::error::{HerbError, Result};
use crate::store::{Document, Filter, ITEMS};

#[derive(Clone, Debug, Default, PartialEq)]
pub struct VendorItemsState {
    /// All items including inactive ones, newest first.
    pub items: Vec<CatalogItem>,
    pub is_loading: bool,
    pub last_error: Option<HerbError>,
}

pub struct VendorCatalog {
    ctx: Context,
    state: Arc<watch::Sender<VendorItemsState>>,
    writes: tokio::sync::Mutex<()>,
}

impl VendorCatalog {
    pub fn new(ctx: Context) -> Self {
        let (state, _) = watch::channel(VendorItemsState::default());
        Self { ctx, state: Arc::new(state), writes: tokio::sync::Mutex::new(()) }
    }

    pub fn state(&self) -> VendorItemsState { self.state.borrow().clone() }
    pub fn subscribe(&self) -> watch::Receiver<VendorItemsState> { self.state.subscribe() }

    #[instrument(skip(self))]
    pub async fn fetch_vendor_items(&self) -> Result<()> {
        self.ctx.require_vendor()?;
        self.state.send_modify(|s| s.is_loading = true);
        let result = self.load_all().await;
        match result {
            Ok(items) => {
                info!(count = items.len(), "vendor items fetched");
                self.state.send_modify(|s| { s.items = items; s.is_loading = false; s.last_error = None; });
                Ok(())
            }
            Err(e) => {
                error!(error = %e, "failed to fetch vendor items");
                self.state.send_modify(|s| { s.is_loading = false; s.last_error = Some(e.clone()); });
                Err(e)
            }
        }
    }

    async fn load_all(&self) -> Result<Vec<CatalogItem>> {
        let snapshots = self.ctx.call(self.ctx.store.query(ITEMS, &Filter::All)).await?;
        let mut items = snapshots.iter().map(|s| s.decode::<CatalogItem>()).collect::<std::result::Result<Vec<_>, _>>()?;
        newest_first(&mut items, |i| i.created_at);
        Ok(items)
    }

    /// Lists a new item under the signed-in vendor. Returns its id.
    #[instrument(skip(self, input), fields(name = %input.name))]
    pub async fn add_item(&self, input: NewCatalogItem) -> Result<ProductId> {
        let result = self.create(input).await;
        if let Ok(id) = &result { info!(product_id = %id, "item listed"); }
        self.record("add_item", result)
    }

    async fn create(&self, input: NewCatalogItem) -> Result<ProductId> {
        let vendor = self.ctx.require_vendor()?.user_id;
        input.validate()?;
        let _turn = self.writes.lock().await;

        let item = CatalogItem::create(ProductId::new(Uuid::new_v4().to_string()), vendor, input);
        self.ctx.call(self.ctx.store.set(ITEMS, item.id.as_str(), encode(&item)?)).await?;
        let id = item.id.clone();
        self.state.send_modify(|s| s.items.insert(0, item));
        Ok(id)
    }

    /// Applies a partial edit to an item the signed-in vendor owns.
    #[instrument(skip(self, patch))]
    pub async fn update_item(&self, id: &ProductId, patch: CatalogItemPatch) -> Result<()> {
        let result = self.apply_patch(id, patch).await;
        if result.is_ok() { info!(product_id = %id, "item updated"); }
        self.record("update_item", result)
    }

    async fn apply_patch(&self, id: &ProductId, patch: CatalogItemPatch) -> Result<()> {
        patch.validate()?;
        let mut fields = encode(&patch)?;
        if let Some(obj) = fields.as_object_mut() {
            obj.insert("updatedAt".into(), json!(Utc::now()));
        }
        self.write_owned(id, fields).await
    }

    #[instrument(skip(self))]
    pub async fn toggle_item_active(&self, id: &ProductId, is_active: bool) -> Result<()> {
        let result = self.write_owned(id, json!({ "isActive": is_active, "updatedAt": Utc::now() })).await;
        if result.is_ok() { info!(product_id = %id, is_active, "item visibility changed"); }
        self.record("toggle_item_active", result)
    }

    /// Checks ownership, writes `fields`, and replaces the cached item with
    /// the stored result.
    async fn write_owned(&self, id: &ProductId, fields: Document) -> Result<()> {
        let vendor = self.ctx.require_vendor()?.user_id;
        let _turn = self.writes.lock().await;

        let current: CatalogItem = self.ctx.call(self.ctx.store.get(ITEMS, id.as_str())).await?
            .ok_or_else(|| HerbError::not_found("Item", id))?
            .decode()?;
        // Items without a recorded vendor belong to nobody and stay read-only.
        if !current.is_owned_by(&vendor) {
            return Err(HerbError::Unauthenticated);
        }

        self.ctx.call(self.ctx.store.update(ITEMS, id.as_str(), fields)).await?;
        let updated: Option<CatalogItem> = self.ctx.call(self.ctx.store.get(ITEMS, id.as_str())).await?
            .map(|snap| snap.decode()).transpose()?;
        if let Some(updated) = updated {
            self.state.send_modify(|s| match s.items.iter_mut().find(|i| i.id == updated.id) {
                Some(cached) => *cached = updated,
                None => s.items.insert(0, updated),
            });
        }
        Ok(())
    }

    fn record<T>(&self, op: &'static str, result: Result<T>) -> Result<T> {
        match &result {
            Ok(_) => { self.state.send_if_modified(|s| s.last_error.take().is_some()); }
            Err(e) => {
                if matches!(e, HerbError::Storage(_)) {
                    error!(op, error = %e, "vendor catalog write failed");
                } else {
                    warn!(op, error = %e, "vendor catalog change rejected");
                }
                self.state.send_modify(|s| s.last_error = Some(e.clone()));
            }
        }
        result
    }

    pub fn clear(&self) { self.state.send_replace(VendorItemsState::default()); }

    pub async fn on_auth_change(&self, session: Option<&Session>) -> Result<()> {
        match session {
            Some(s) if s.is_vendor => self.fetch_vendor_items().await,
            _ => { self.clear(); Ok(()) }
        }
    }
}
