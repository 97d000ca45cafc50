//! Offline-first sync layer for the TractorCare API.
//!
//! Changes made while offline are queued durably, mirrored optimistically in
//! a local cache, and delivered in order once the backend is reachable again.

pub mod audio;
pub mod cache;
pub mod config;
pub mod connectivity;
pub mod models;
pub mod queue;
pub mod remote;
pub mod service;
pub mod store;
pub mod sync;

#[cfg(test)]
mod testing;

pub use service::{Submission, SyncService};
