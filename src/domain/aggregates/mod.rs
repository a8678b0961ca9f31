//! Aggregates module
pub mod catalog_item;
pub mod cart;
pub mod order;

pub use catalog_item::{CatalogItem, CatalogItemPatch, NewCatalogItem};
pub use cart::{CartAggregate, CartError, LineItem};
pub use order::{OrderAggregate, OrderError, OrderNumber, OrderStatus, TransitionPolicy};
