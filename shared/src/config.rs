/// Engine-level tuning knobs. All values live in memory only and are set
/// through plain setters on the owning synchronizer.
#[derive(Clone, Debug)]
pub struct SyncConfig {
    /// Seconds between state notifications per sync group.
    pub server_notify_state_interval: f64,
    /// Seconds between relevancy-update invocations of the host hook.
    /// Can be 0.0 to re-partition every frame.
    pub objects_relevancy_update_time: f64,
    /// Upper bound of deferred objects serialized per group per tick.
    pub max_deferred_objects_per_update: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            server_notify_state_interval: 1.0,
            objects_relevancy_update_time: 0.5,
            max_deferred_objects_per_update: 30,
        }
    }
}

/// Per-controller tuning knobs, mirrored between the player and server
/// roles of the same controller.
#[derive(Clone, Debug)]
pub struct ControllerConfig {
    /// When `true` the server drives this controller's input: all clients
    /// see it as a doll. Useful for bots.
    pub server_controlled: bool,
    /// Cap on inputs collected by the player role while awaiting server
    /// confirmation. With 60 ticks per second, 180 keeps the player at most
    /// 3 seconds ahead of the server.
    pub player_input_storage_size: usize,
    /// How many past inputs ride along with each input packet. Inputs
    /// travel unreliably; redundancy is the loss recovery.
    pub max_redundant_inputs: usize,
    /// Milliseconds between `tick_speedup` notifications sent to the
    /// client.
    pub tick_speedup_notification_delay: u32,
    /// How many frames feed the connection-quality watcher. Bigger reacts
    /// slower, smaller overreacts.
    pub network_traced_frames: usize,
    /// The server keeps between `min_frames_delay` and `max_frames_delay`
    /// inputs buffered so network oscillation doesn't starve it.
    pub min_frames_delay: i64,
    pub max_frames_delay: i64,
    /// Additional frames per second the client produces per unit of
    /// speedup distance.
    pub tick_acceleration: f64,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            server_controlled: false,
            player_input_storage_size: 180,
            max_redundant_inputs: 6,
            tick_speedup_notification_delay: 600,
            network_traced_frames: 120,
            min_frames_delay: 2,
            max_frames_delay: 7,
            tick_acceleration: 5.0,
        }
    }
}
