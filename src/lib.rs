// Public API for integration tests and embedding

pub mod api;
pub mod broadcast;
pub mod broker;
pub mod config;
pub mod connection;
pub mod dispatch;
pub mod protocol;
pub mod registry;
pub mod store;
pub mod sync;
pub mod types;
pub mod ws;
