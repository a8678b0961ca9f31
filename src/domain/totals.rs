//! Derived totals over line items.

use serde::Serialize;

use crate::domain::aggregates::LineItem;
use crate::domain::value_objects::Money;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Totals {
    pub total_price: Money,
    pub total_quantity: u64,
}

/// `total_price = Σ price × quantity`, `total_quantity = Σ quantity`.
pub fn compute_totals(items: &[LineItem]) -> Totals {
    items.iter().fold(Totals::default(), |acc, item| Totals {
        total_price: acc.total_price.add(item.line_total()),
        total_quantity: acc.total_quantity + u64::from(item.quantity.value()),
    })
}
