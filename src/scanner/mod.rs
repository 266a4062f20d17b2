//! Directory scanning: walker, quarantine store, repair engine and the per-root scan.

pub mod quarantine;
pub mod repair;
pub mod scan;
pub mod walker;
