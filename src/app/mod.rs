pub mod alerts;
pub mod order_notifier;
