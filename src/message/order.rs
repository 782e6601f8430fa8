use std::fmt;

use serde::{Deserialize, Serialize};

/// A purchase order, the structured payload used by the demo and tests.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub order_id: String,
    pub item: String,
    pub quantity: u32,
    pub price: f64,
}

impl Order {
    pub const TYPE_TAG: &'static str = "order";

    pub fn new(order_id: &str, item: &str, quantity: u32, price: f64) -> Self {
        Self {
            order_id: order_id.to_string(),
            item: item.to_string(),
            quantity,
            price,
        }
    }
}

impl fmt::Display for Order {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Order{{orderId='{}', item='{}', quantity={}, price={}}}",
            self.order_id, self.item, self.quantity, self.price
        )
    }
}
