pub mod db;
pub mod order_feed;
pub mod order_store;
