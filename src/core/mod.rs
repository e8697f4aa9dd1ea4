//! Shared primitives: errors, the store abstraction, plans, config and the journal.

pub mod config;
pub mod db;
pub mod error;
pub mod journal;
pub mod output;
pub mod plan;
pub mod store;
pub mod time;
