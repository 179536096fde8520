pub mod alert;
pub mod order;
