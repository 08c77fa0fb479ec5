//! The boundaries the engine talks through: the host scene graph, the
//! per-controller input driver, and the transport. All of them are
//! marshaled onto the simulation thread by the application; the engine
//! never blocks and never calls back across threads.

use netsync_serde::{BitReader, BitWriter};

use crate::config::ControllerConfig;
use crate::types::{ObjectLocalId, ObjectNetId, PeerId, SyncGroupId};
use crate::value::VarValue;

/// Opaque identifier of a host scene object, produced by the application.
pub type ObjectHandle = u64;

/// Mutation surface of the server's sync groups, handed to the host's
/// relevancy hook. Implemented by the server synchronizer.
pub trait SyncGroups {
    fn sync_group_create(&mut self) -> SyncGroupId;
    fn sync_group_add_object(
        &mut self,
        object: ObjectLocalId,
        group: SyncGroupId,
        realtime: bool,
    );
    fn sync_group_remove_object(&mut self, object: ObjectLocalId, group: SyncGroupId);
    fn sync_group_remove_all_objects(&mut self, group: SyncGroupId);
    fn sync_group_move_peer_to(&mut self, peer: PeerId, group: SyncGroupId);
    fn sync_group_set_deferred_update_rate(
        &mut self,
        object: ObjectLocalId,
        group: SyncGroupId,
        rate: f64,
    );
}

/// The application scene graph, as the engine sees it.
pub trait SceneHost {
    /// Resolves a stable object name to a live handle, or `None` when the
    /// object does not exist (yet) on this peer.
    fn fetch_app_object(&mut self, name: &str) -> Option<ObjectHandle>;

    fn object_id(&self, handle: ObjectHandle) -> u64;
    fn object_name(&self, handle: ObjectHandle) -> String;

    fn get_variable(&self, handle: ObjectHandle, name: &str) -> Option<VarValue>;
    fn set_variable(&mut self, handle: ObjectHandle, name: &str, value: &VarValue);

    /// The host equality predicate. The default is exact equality;
    /// floating-point tolerant hosts override this.
    fn compare(&self, a: &VarValue, b: &VarValue) -> bool {
        a == b
    }

    /// Returns the input driver and tuning for this object when it is a
    /// controller; `None` for plain replicated objects.
    fn extract_controller(
        &mut self,
        handle: ObjectHandle,
    ) -> Option<(Box<dyn ControllerDriver>, ControllerConfig)>;

    /// Server-only: re-partition the sync groups. Invoked every
    /// `objects_relevancy_update_time` seconds, before anything else that
    /// tick.
    fn update_objects_relevancy(&mut self, _groups: &mut dyn SyncGroups) {}

    /// Application data carried by snapshots of one group (`Some(group)`)
    /// or by the local client snapshot (`None`).
    fn snapshot_get_custom_data(&self, _group: Option<SyncGroupId>) -> Option<VarValue> {
        None
    }

    fn snapshot_set_custom_data(&mut self, _value: &VarValue) {}
}

/// Input collection and application for one controller, implemented by
/// the application (the original's controller manager).
pub trait ControllerDriver {
    /// Samples the player input for one sub-tick into `buffer`.
    fn collect_inputs(&mut self, delta: f64, buffer: &mut BitWriter);

    /// Advances the controlled object by one tick using `input`. Must be
    /// deterministic: the same input over the same state must produce the
    /// same result on every peer.
    fn controller_process(&mut self, delta: f64, input: &mut BitReader);

    /// Semantic input comparison, used to decide whether a ghost-extended
    /// input diverges from the real stream. The default compares nothing
    /// and reports equality.
    fn are_inputs_different(&mut self, _a: &mut BitReader, _b: &mut BitReader) -> bool {
        false
    }
}

/// The transport, already connected and peer-addressed. Reliable sends
/// carry engine control traffic; unreliable sends carry inputs and
/// deferred bulk data.
pub trait NetworkAdapter {
    fn local_peer_id(&self) -> PeerId;
    fn server_peer_id(&self) -> PeerId;

    /// Which peer holds authority over the named controller object.
    fn authority_of(&self, object_name: &str) -> Option<PeerId>;

    // Reliable channel.
    fn send_state(&mut self, peer: PeerId, payload: Vec<u8>);
    fn send_need_full_snapshot(&mut self, peer: PeerId);
    fn send_set_networking_enabled(&mut self, peer: PeerId, enabled: bool);
    fn send_peer_status(&mut self, peer: PeerId, enabled: bool);
    fn send_tick_speedup(&mut self, peer: PeerId, distance: i8);
    fn send_server_controlled(&mut self, peer: PeerId, object: ObjectNetId, server_controlled: bool);

    // Unreliable channel.
    fn send_inputs(&mut self, peer: PeerId, payload: Vec<u8>);
    fn send_deferred_data(&mut self, peer: PeerId, payload: Vec<u8>);
}
