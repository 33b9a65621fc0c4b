pub mod coordinator;
pub mod handlers;
