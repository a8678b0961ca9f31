//! Catalog Item

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

use crate::domain::value_objects::{Money, ProductId, UserId};

/// A product as listed in the catalog. Owned by the vendor that created it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogItem {
    pub id: ProductId,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub price: Money,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    // Items written before the flag existed count as active.
    #[serde(default = "active_by_default")]
    pub is_active: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vendor_id: Option<UserId>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

fn active_by_default() -> bool { true }

impl CatalogItem {
    pub fn create(id: ProductId, vendor_id: UserId, input: NewCatalogItem) -> Self {
        Self {
            id,
            name: input.name.trim().to_string(),
            description: input.description,
            price: input.price,
            image_url: input.image_url,
            category: input.category,
            is_active: input.is_active.unwrap_or(true),
            vendor_id: Some(vendor_id),
            created_at: Utc::now(),
            updated_at: None,
        }
    }

    pub fn is_owned_by(&self, vendor: &UserId) -> bool { self.vendor_id.as_ref() == Some(vendor) }
}

fn non_negative(price: &Money) -> Result<(), ValidationError> {
    if price.is_negative() { return Err(ValidationError::new("negative_price")); }
    Ok(())
}

/// Vendor input for a new catalog item.
#[derive(Clone, Debug, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct NewCatalogItem {
    #[validate(length(min = 1, max = 120))]
    pub name: String,
    #[serde(default)]
    #[validate(length(max = 2000))]
    pub description: String,
    #[validate(custom = "non_negative")]
    pub price: Money,
    #[validate(url)]
    pub image_url: Option<String>,
    pub category: Option<String>,
    pub is_active: Option<bool>,
}

/// Partial vendor edit. Absent fields are left untouched.
#[derive(Clone, Debug, Default, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CatalogItemPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    #[validate(length(min = 1, max = 120))]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[validate(length(max = 2000))]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[validate(custom = "non_negative")]
    pub price: Option<Money>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[validate(url)]
    pub image_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_active: Option<bool>,
}

impl CatalogItemPatch {
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.description.is_none() && self.price.is_none()
            && self.image_url.is_none() && self.category.is_none() && self.is_active.is_none()
    }
}
