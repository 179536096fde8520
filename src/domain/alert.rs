use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

use crate::domain::order::Order;

pub const NEW_ORDER_TITLE: &str = "New pending order";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Alert {
    pub order_id: Uuid,
    pub title: String,
    pub body: String,
    pub duration_ms: u64,
}

impl Alert {
    pub fn new_order(order: &Order, duration: Duration) -> Self {
        Self {
            order_id: order.id,
            title: NEW_ORDER_TITLE.to_string(),
            body: format!("{} ({})", order.description, order.display_amount()),
            duration_ms: u64::try_from(duration.as_millis()).unwrap_or(u64::MAX),
        }
    }
}
