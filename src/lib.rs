pub mod app;
pub mod config;
pub mod domain;
pub mod http;
pub mod infra;

use std::sync::Arc;

use crate::app::alerts::AlertHub;
use crate::app::order_notifier::{BacklogLoader, OrderFeed, PendingOrderNotifier};
use crate::infra::db::Db;

#[derive(Clone)]
pub struct AppState {
    pub db: Db,
    pub alerts: AlertHub,
    pub notifier: Arc<PendingOrderNotifier>,
    pub orders_feed: Arc<dyn OrderFeed>,
    pub backlog: Arc<dyn BacklogLoader>,
}

impl AppState {
    /// Starts (or restarts) the notifier against the configured feed and backlog.
    pub fn start_notifier(&self) {
        self.notifier
            .start(Arc::clone(&self.orders_feed), Arc::clone(&self.backlog));
    }
}
