//! Activity logging: typed events, a logger thread, and an append-only line log.

pub mod activity;
pub mod line;
