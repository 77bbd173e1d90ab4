//! Reconciliation of channel-scoped catalog translations.
//!
//! Legacy translation records without a channel are attached to their item's
//! owning channel or merged into the record already living there, and record
//! statuses are brought in line with the primary-channel rules.

pub mod audit;
pub mod classify;
pub mod config;
pub mod merge;
pub mod migrate;
pub mod model;
pub mod reconcile;
pub mod repository;
pub mod runtime;
pub mod simulate;
pub mod status;
