//! The per-controller role state machine.
//!
//! Every controller object owns a `ControllerCore` holding a tagged role
//! variant. The role is destroyed and rebuilt whenever networking is
//! toggled, the owning peer changes, authority flips, or
//! `server_controlled` is switched; the scene core drives those
//! transitions and broadcasts the controller-reset event.

mod player;
mod remote;

use log::warn;
use thiserror::Error;

use crate::config::ControllerConfig;
use crate::event::SyncEvent;
use crate::host::{ControllerDriver, NetworkAdapter};
use crate::types::{InputId, PeerId};

pub use player::PlayerRole;
pub use remote::{DollRole, ServerRole};

/// Consecutive empty input fetches the server tolerates, reusing the last
/// input, before it marks the stream paused.
pub const GHOST_INPUT_TOLERANCE: u32 = 10;

/// Errors that can occur during controller operations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ControllerError {
    /// The operation is not valid for the current role
    #[error("{role} controller should never {operation}")]
    InvalidRoleOperation {
        role: &'static str,
        operation: &'static str,
    },

    /// A rewind step referenced an input the ring no longer holds
    #[error("stored input index {index} is out of range ({count} stored)")]
    InstantOutOfRange { index: usize, count: usize },
}

pub enum Role {
    /// Not networked: inputs are collected and applied locally each tick.
    NoNet { frame_id: InputId },
    /// Server side of a client-driven controller.
    Server(ServerRole),
    /// Server-driven controller (`server_controlled`): inputs are
    /// generated on the server, `receive_inputs` is a no-op.
    AutonomousServer(ServerRole),
    /// The locally owned, predicted controller on a client.
    Player(PlayerRole),
    /// Someone else's controller on a client: consumed like the server
    /// does, then overwritten by server snapshots.
    Doll(DollRole),
}

impl Role {
    pub fn name(&self) -> &'static str {
        match self {
            Role::NoNet { .. } => "NoNet",
            Role::Server(_) => "Server",
            Role::AutonomousServer(_) => "AutonomousServer",
            Role::Player(_) => "Player",
            Role::Doll(_) => "Doll",
        }
    }
}

/// Which role a controller should take, derived from where it lives and
/// who owns it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RoleKind {
    NoNet,
    Server,
    AutonomousServer,
    Player,
    Doll,
}

pub struct ControllerCore {
    pub config: ControllerConfig,
    driver: Box<dyn ControllerDriver>,
    role: Role,
    /// The peer driving this controller, bound during peer update.
    pub peer: Option<PeerId>,
    has_player_new_input: bool,
}

impl ControllerCore {
    pub fn new(driver: Box<dyn ControllerDriver>, config: ControllerConfig) -> Self {
        Self {
            config,
            driver,
            role: Role::NoNet { frame_id: 0 },
            peer: None,
            has_player_new_input: false,
        }
    }

    pub fn role(&self) -> &Role {
        &self.role
    }

    pub fn role_kind(&self) -> RoleKind {
        match &self.role {
            Role::NoNet { .. } => RoleKind::NoNet,
            Role::Server(_) => RoleKind::Server,
            Role::AutonomousServer(_) => RoleKind::AutonomousServer,
            Role::Player(_) => RoleKind::Player,
            Role::Doll(_) => RoleKind::Doll,
        }
    }

    pub fn is_player(&self) -> bool {
        matches!(self.role, Role::Player(_))
    }

    pub fn is_server_side(&self) -> bool {
        matches!(self.role, Role::Server(_) | Role::AutonomousServer(_))
    }

    pub fn is_doll(&self) -> bool {
        matches!(self.role, Role::Doll(_))
    }

    /// Destroys the current role value and builds the requested one from
    /// scratch. All transient state (rings, watchers, time banks) is lost
    /// on purpose: a role change is a hard reset.
    pub fn reset_role(&mut self, kind: RoleKind) {
        self.has_player_new_input = false;
        self.role = match kind {
            RoleKind::NoNet => Role::NoNet { frame_id: 0 },
            RoleKind::Server => Role::Server(ServerRole::new(&self.config)),
            RoleKind::AutonomousServer => Role::AutonomousServer(ServerRole::new(&self.config)),
            RoleKind::Player => Role::Player(PlayerRole::new(&self.config)),
            RoleKind::Doll => Role::Doll(DollRole::new(&self.config)),
        };
    }

    /// The input id snapshots of this controller are stamped with. The
    /// none sentinel while the stream is paused or nothing was consumed
    /// yet.
    pub fn current_input_id(&self) -> InputId {
        match &self.role {
            Role::NoNet { frame_id } => *frame_id,
            Role::Server(role) | Role::AutonomousServer(role) => role.current_input_id(),
            Role::Player(role) => role.current_input_id(),
            Role::Doll(role) => role.current_input_id(),
        }
    }

    /// Runs this controller for one simulation (sub-)tick.
    pub fn process(&mut self, delta: f64, net: &mut dyn NetworkAdapter, events: &mut Vec<SyncEvent>) {
        match &mut self.role {
            Role::NoNet { frame_id } => {
                *frame_id = frame_id.wrapping_add(1);
                let mut writer = netsync_serde::BitWriter::new();
                self.driver.collect_inputs(delta, &mut writer);
                let (buffer, bit_count) = writer.to_bits();
                let mut reader = netsync_serde::BitReader::with_bit_length(&buffer, bit_count);
                self.driver.controller_process(delta, &mut reader);
            }
            Role::Server(role) => {
                role.process(self.driver.as_mut(), delta, events);
                if let Some(peer) = self.peer {
                    role.adjust_player_tick_rate(&self.config, delta, net, events, peer);
                }
            }
            Role::AutonomousServer(role) => {
                role.process_autonomous(self.driver.as_mut(), delta);
            }
            Role::Player(role) => {
                let produced = role.process(self.driver.as_mut(), &self.config, delta, net);
                if produced {
                    self.has_player_new_input = true;
                }
            }
            Role::Doll(role) => {
                role.process(self.driver.as_mut(), delta, events);
            }
        }
    }

    /// Feeds a received input packet into the ring. Returns true only
    /// when at least one previously unseen input id was stored.
    pub fn receive_inputs(
        &mut self,
        payload: &[u8],
        received_timestamp: u64,
        events: &mut Vec<SyncEvent>,
    ) -> bool {
        match &mut self.role {
            Role::Server(role) => role.receive_inputs(payload, received_timestamp, events),
            Role::Doll(role) => role.receive_inputs(payload, received_timestamp),
            Role::AutonomousServer(_) => {
                // The server generates this controller's inputs itself.
                false
            }
            other => {
                warn!(
                    "receive_inputs called on a {} controller; dropping packet",
                    other.name()
                );
                false
            }
        }
    }

    /// The server/client confirmed state up to `input_id`: confirmed
    /// history can be dropped.
    pub fn notify_input_checked(&mut self, input_id: InputId) {
        match &mut self.role {
            Role::Player(role) => role.notify_input_checked(input_id),
            Role::Doll(role) => role.notify_input_checked(input_id),
            _ => {}
        }
    }

    /// Queues the stored input at `index` to be replayed by the next
    /// `process` call instead of collecting a fresh one.
    pub fn queue_instant(&mut self, index: usize) -> Result<(), ControllerError> {
        match &mut self.role {
            Role::Player(role) => role.queue_instant(index),
            Role::Doll(role) => role.queue_instant(index),
            other => Err(ControllerError::InvalidRoleOperation {
                role: other.name(),
                operation: "queue a rewind instant",
            }),
        }
    }

    /// Server loop hook, called when a snapshot for this controller's
    /// peer was just sent.
    pub fn notify_send_state(&mut self) {
        if let Role::Server(role) | Role::AutonomousServer(role) = &mut self.role {
            role.notify_send_state();
        }
    }

    /// Client side of the server's tick-rate hint.
    pub fn receive_tick_speedup(&mut self, distance: i8) {
        if let Role::Player(role) = &mut self.role {
            role.apply_tick_speedup(distance, &self.config);
        }
    }

    pub fn player_has_new_input(&self) -> bool {
        self.has_player_new_input
    }

    pub fn clear_player_new_input(&mut self) {
        self.has_player_new_input = false;
    }

    /// Number of sub-ticks the player should run this frame.
    pub fn calculate_sub_ticks(&mut self, delta: f64, ticks_per_second: f64) -> usize {
        match &mut self.role {
            Role::Player(role) => role.calculate_sub_ticks(&self.config, delta, ticks_per_second),
            _ => 1,
        }
    }

    pub fn player_input_count(&self) -> usize {
        match &self.role {
            Role::Player(role) => role.input_count(),
            _ => 0,
        }
    }

    pub fn player_stored_input_id(&self, index: usize) -> Option<InputId> {
        match &self.role {
            Role::Player(role) => role.stored_input_id(index),
            _ => None,
        }
    }

    pub fn last_known_input(&self) -> InputId {
        match &self.role {
            Role::Player(role) => role.last_known_input(),
            Role::Server(role) | Role::AutonomousServer(role) => role.last_known_input(),
            Role::Doll(role) => role.last_known_input(),
            Role::NoNet { frame_id } => *frame_id,
        }
    }

    pub fn is_stream_paused(&self) -> bool {
        match &self.role {
            Role::Server(role) | Role::AutonomousServer(role) => role.is_stream_paused(),
            Role::Player(role) => role.is_stream_paused(),
            Role::Doll(role) => role.is_stream_paused(),
            Role::NoNet { .. } => false,
        }
    }

    pub fn set_peer_enabled(&mut self, enabled: bool) {
        if let Role::Server(role) | Role::AutonomousServer(role) = &mut self.role {
            role.set_peer_enabled(enabled);
        }
    }
}

impl std::fmt::Debug for ControllerCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControllerCore")
            .field("role", &self.role.name())
            .field("peer", &self.peer)
            .field("current_input_id", &self.current_input_id())
            .finish()
    }
}
