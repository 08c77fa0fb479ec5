use crate::types::{ObjectLocalId, SyncGroupId, GLOBAL_SYNC_GROUP_ID};

/// Per-peer bookkeeping held by the engine for the lifetime of the
/// connection.
#[derive(Clone, Debug)]
pub struct PeerData {
    /// The sync group this peer listens to.
    pub sync_group: SyncGroupId,
    /// The controller object driven by this peer, if any.
    pub controller_id: Option<ObjectLocalId>,
    /// Whether this peer is allowed to simulate at all.
    pub enabled: bool,
    /// Forces a snapshot on the next notificator pass regardless of the
    /// group timer.
    pub force_notify_snapshot: bool,
    /// The next snapshot sent to this peer must be a full one.
    pub need_full_snapshot: bool,
}

impl Default for PeerData {
    fn default() -> Self {
        Self {
            sync_group: GLOBAL_SYNC_GROUP_ID,
            controller_id: None,
            enabled: true,
            force_notify_snapshot: false,
            need_full_snapshot: false,
        }
    }
}
