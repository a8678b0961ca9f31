//! Error types shared by every service.

use thiserror::Error;

use crate::domain::aggregates::{CartError, OrderError};
use crate::store::StoreError;

/// Error kinds surfaced by storefront operations.
///
/// Every failing operation leaves local state as it was before the call.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum HerbError {
    #[error("User not authenticated")]
    Unauthenticated,

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: String },

    #[error("Cart is empty")]
    EmptyCart,

    #[error("Storage error: {0}")]
    Storage(#[from] StoreError),
}

impl HerbError {
    pub fn not_found(kind: &'static str, id: impl ToString) -> Self {
        Self::NotFound { kind, id: id.to_string() }
    }
}

impl From<CartError> for HerbError {
    fn from(e: CartError) -> Self {
        match e {
            CartError::ItemNotFound(id) => Self::not_found("Cart item", id),
            other => Self::Validation(other.to_string()),
        }
    }
}

impl From<OrderError> for HerbError {
    fn from(e: OrderError) -> Self {
        match e {
            OrderError::EmptyCart => Self::EmptyCart,
            other => Self::Validation(other.to_string()),
        }
    }
}

impl From<validator::ValidationErrors> for HerbError {
    fn from(e: validator::ValidationErrors) -> Self { Self::Validation(e.to_string()) }
}

pub type Result<T> = std::result::Result<T, HerbError>;
