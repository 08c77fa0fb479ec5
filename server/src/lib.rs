//! # Netsync Server
//! The authoritative side of the scene synchronization engine: simulates,
//! partitions clients into sync groups, and streams full/delta snapshots
//! plus deferred epoch buffers.

#![deny(trivial_numeric_casts, unstable_features, unused_import_braces)]

mod server;
mod sync_group;

pub use server::ServerSynchronizer;
pub use sync_group::{Change, DeferredObjectInfo, GroupError, RealtimeObjectInfo, SyncGroup};
