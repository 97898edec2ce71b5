//! Persisted detection history (remote record store)

pub mod client;
pub mod models;

pub use client::HistoryClient;
pub use models::{ClearResponse, DeleteResponse, HistoryRecord};
