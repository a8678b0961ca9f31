//! Cart Aggregate

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::aggregates::CatalogItem;
use crate::domain::events::{CartEvent, DomainEvent};
use crate::domain::totals::{compute_totals, Totals};
use crate::domain::value_objects::{Money, ProductId, Quantity, UserId};

/// A cart line. Product fields are copied from the catalog when the line is
/// first added so that later catalog edits never change it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LineItem {
    pub product_id: ProductId,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub price: Money,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    pub quantity: Quantity,
    pub added_at: DateTime<Utc>,
}

impl LineItem {
    pub fn snapshot_of(item: &CatalogItem, quantity: Quantity, added_at: DateTime<Utc>) -> Self {
        Self {
            product_id: item.id.clone(),
            name: item.name.clone(),
            description: item.description.clone(),
            price: item.price,
            image_url: item.image_url.clone(),
            category: item.category.clone(),
            quantity,
            added_at,
        }
    }

    pub fn line_total(&self) -> Money { self.price.multiply(self.quantity.value()) }
}

/// The single live cart of one owner.
///
/// Totals are not stored; they are derived from `items` on every read.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartAggregate {
    owner_id: UserId,
    #[serde(default)]
    items: Vec<LineItem>,
    updated_at: DateTime<Utc>,
    #[serde(skip)]
    events: Vec<DomainEvent>,
}

impl CartAggregate {
    pub fn new(owner_id: UserId) -> Self {
        Self { owner_id, items: vec![], updated_at: Utc::now(), events: vec![] }
    }

    pub fn owner_id(&self) -> &UserId { &self.owner_id }
    pub fn items(&self) -> &[LineItem] { &self.items }
    pub fn item(&self, product_id: &ProductId) -> Option<&LineItem> {
        self.items.iter().find(|i| &i.product_id == product_id)
    }
    pub fn is_empty(&self) -> bool { self.items.is_empty() }
    pub fn updated_at(&self) -> DateTime<Utc> { self.updated_at }
    pub fn totals(&self) -> Totals { compute_totals(&self.items) }
    pub fn total_price(&self) -> Money { self.totals().total_price }
    pub fn total_quantity(&self) -> u64 { self.totals().total_quantity }

    /// Adds `quantity` of a catalog item. A product already in the cart keeps
    /// its original snapshot and only has its quantity increased.
    pub fn add_item(&mut self, item: &CatalogItem, quantity: i64) -> Result<(), CartError> {
        let quantity = Quantity::new(quantity).ok_or(CartError::InvalidQuantity(quantity))?;
        if !item.is_active { return Err(CartError::InactiveItem(item.id.clone())); }

        if let Some(existing) = self.items.iter_mut().find(|i| i.product_id == item.id) {
            existing.quantity = existing.quantity.checked_add(quantity)
                .ok_or_else(|| CartError::QuantityOverflow(item.id.clone()))?;
        } else {
            self.items.push(LineItem::snapshot_of(item, quantity, Utc::now()));
        }
        self.touch();
        self.raise_event(CartEvent::ItemAdded {
            owner_id: self.owner_id.clone(), product_id: item.id.clone(), quantity: quantity.value(),
        });
        Ok(())
    }

    /// Sets the quantity of a line. Anything below one removes the line instead.
    pub fn update_quantity(&mut self, product_id: &ProductId, new_quantity: i64) -> Result<(), CartError> {
        let Some(quantity) = Quantity::new(new_quantity) else {
            self.remove_item(product_id);
            return Ok(());
        };
        let line = self.items.iter_mut().find(|i| &i.product_id == product_id)
            .ok_or_else(|| CartError::ItemNotFound(product_id.clone()))?;
        line.quantity = quantity;
        self.touch();
        self.raise_event(CartEvent::QuantityChanged {
            owner_id: self.owner_id.clone(), product_id: product_id.clone(), quantity: quantity.value(),
        });
        Ok(())
    }

    /// Removes a line. Returns false, changing nothing, if it was absent.
    pub fn remove_item(&mut self, product_id: &ProductId) -> bool {
        let before = self.items.len();
        self.items.retain(|i| &i.product_id != product_id);
        if self.items.len() == before { return false; }
        self.touch();
        self.raise_event(CartEvent::ItemRemoved { owner_id: self.owner_id.clone(), product_id: product_id.clone() });
        true
    }

    /// Empties the cart. Only the checkout path calls this.
    pub(crate) fn clear(&mut self) {
        self.items.clear();
        self.touch();
        self.raise_event(CartEvent::Cleared { owner_id: self.owner_id.clone() });
    }

    pub fn take_events(&mut self) -> Vec<DomainEvent> { std::mem::take(&mut self.events) }
    fn raise_event(&mut self, e: CartEvent) { self.events.push(DomainEvent::Cart(e)); }
    fn touch(&mut self) { self.updated_at = Utc::now(); }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CartError {
    #[error("quantity must be a positive integer, got {0}")]
    InvalidQuantity(i64),
    #[error("quantity of item {0} is too large")]
    QuantityOverflow(ProductId),
    #[error("item {0} is not available")]
    InactiveItem(ProductId),
    #[error("item {0} is not in the cart")]
    ItemNotFound(ProductId),
}
