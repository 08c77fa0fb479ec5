//! # Netsync Client
//! The predictive side of the scene synchronization engine: simulates
//! optimistically, reconciles against authoritative snapshots by
//! rollback-and-replay, and interpolates deferred objects between epochs.

#![deny(trivial_numeric_casts, unstable_features, unused_import_braces)]

mod client;
mod deferred;

pub use client::ClientSynchronizer;
pub use deferred::DeferredStream;
