//! # Netsync Shared
//! Common functionality shared between netsync-server & netsync-client crates.

#![deny(trivial_numeric_casts, unstable_features, unused_import_braces)]

pub use netsync_serde::{BitReader, BitWrite, BitWriter, Serde, SerdeErr};

mod backends;
mod config;
mod event;
mod event_flag;
mod input;
mod listener;
mod peer;
mod snapshot;
mod stats;
mod types;
mod value;

pub mod controller;
pub mod host;
pub mod object;
pub mod scene;

pub use backends::Timestamp;
pub use config::{ControllerConfig, SyncConfig};
pub use controller::{ControllerCore, ControllerError, Role, RoleKind, GHOST_INPUT_TOLERANCE};
pub use event::SyncEvent;
pub use event_flag::NetEventFlag;
pub use host::{ControllerDriver, NetworkAdapter, ObjectHandle, SceneHost, SyncGroups};
pub use input::{decode_input_packet, encode_input_packet, FrameInput, InputError, InputRing};
pub use listener::{ChangesListener, ListenerError, ListenerHandle, ListenerStore, WatchedVar};
pub use object::{
    ObjectData, ObjectDataStore, ProcessHandle, ProcessPhase, StoreError, VarDescriptor,
    PROCESS_PHASE_COUNT,
};
pub use peer::PeerData;
pub use scene::{ChangedVar, SceneCore};
pub use snapshot::{compare_snapshots, Snapshot, SnapshotCompare, SnapshotObject, SnapshotVar};
pub use stats::StatisticalRingBuffer;
pub use types::{
    Epoch, HostType, InputId, ObjectLocalId, ObjectNetId, PeerId, SyncGroupId, VarId,
    GLOBAL_SYNC_GROUP_ID, NONE_EPOCH, NONE_INPUT_ID,
};
pub use value::VarValue;
