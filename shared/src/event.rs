use crate::types::{InputId, ObjectLocalId, PeerId};
use crate::value::VarValue;

/// Engine events accumulated during `process()` and the receive handlers,
/// drained by the application once per tick.
#[derive(Debug)]
pub enum SyncEvent {
    /// Client networking (re-)enabled; fired when the first snapshot after
    /// an enable arrives.
    SyncStarted,
    /// Client networking disabled.
    SyncPaused,
    /// A peer's connection or simulation-enable status changed.
    PeerStatusUpdated {
        peer: PeerId,
        controller: Option<ObjectLocalId>,
        connected: bool,
        enabled: bool,
    },
    /// The client confirmed this input id against the server state.
    StateValidated { input_id: InputId },
    /// Broadcast before each replayed step of a rewind.
    RewindFrameBegin {
        input_id: InputId,
        index: usize,
        count: usize,
    },
    /// The client and server snapshots disagreed at `input_id`.
    DesyncDetected {
        input_id: InputId,
        object: ObjectLocalId,
        var_names: Vec<String>,
        client_values: Vec<VarValue>,
        server_values: Vec<VarValue>,
    },
    /// A controller's role was destroyed and recreated.
    ControllerReset { object: ObjectLocalId },
    /// The server had to ghost-extend or skip past this input id.
    InputMissed { input_id: InputId },
    /// The server re-evaluated a client's tick rate.
    SpeedupAdjusted {
        peer: PeerId,
        worst_receival_ms: u32,
        optimal_frame_delay: i64,
        current_frame_delay: i64,
        distance: i8,
    },
}
