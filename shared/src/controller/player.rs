use log::{error, trace};

use netsync_serde::BitWriter;

use crate::config::ControllerConfig;
use crate::controller::ControllerError;
use crate::host::{ControllerDriver, NetworkAdapter};
use crate::input::{encode_input_packet, FrameInput, InputRing};
use crate::types::{InputId, NONE_INPUT_ID};

/// The locally owned controller on a client. Produces inputs, applies
/// them optimistically, and keeps them queued until the server confirms
/// the resulting state.
pub struct PlayerRole {
    current_input_id: InputId,
    input_counter: InputId,
    time_bank: f64,
    /// Extra frames per second requested by the server, decaying over the
    /// notification window so a lost packet cannot leave a permanent skew.
    acceleration_fps_speed: f64,
    acceleration_timer_ms: f64,
    pretended_delta: f64,
    streaming_paused: bool,
    ring: InputRing,
    queued_instant: Option<usize>,
}

impl PlayerRole {
    pub fn new(config: &ControllerConfig) -> Self {
        Self {
            current_input_id: NONE_INPUT_ID,
            input_counter: 0,
            time_bank: 0.0,
            acceleration_fps_speed: 0.0,
            acceleration_timer_ms: 0.0,
            pretended_delta: 0.0,
            streaming_paused: false,
            ring: InputRing::new(config.player_input_storage_size),
            queued_instant: None,
        }
    }

    pub fn current_input_id(&self) -> InputId {
        self.current_input_id
    }

    pub fn last_known_input(&self) -> InputId {
        self.ring.back().map(|f| f.id).unwrap_or(NONE_INPUT_ID)
    }

    pub fn input_count(&self) -> usize {
        self.ring.len()
    }

    pub fn stored_input_id(&self, index: usize) -> Option<InputId> {
        self.ring.get(index).map(|f| f.id)
    }

    pub fn is_stream_paused(&self) -> bool {
        self.streaming_paused
    }

    pub fn pretended_delta(&self) -> f64 {
        self.pretended_delta
    }

    /// How many inputs to produce this frame. The time bank pretends time
    /// advances faster or slower according to the server's speedup hint;
    /// the simulation itself still steps by `delta`.
    pub fn calculate_sub_ticks(
        &mut self,
        config: &ControllerConfig,
        delta: f64,
        ticks_per_second: f64,
    ) -> usize {
        let window = f64::from(config.tick_speedup_notification_delay).max(1.0);
        let decay = (self.acceleration_timer_ms / window).clamp(0.0, 1.0);
        let effective_fps = (ticks_per_second + self.acceleration_fps_speed * decay).max(1.0);
        self.acceleration_timer_ms = (self.acceleration_timer_ms - delta * 1000.0).max(0.0);

        self.pretended_delta = 1.0 / effective_fps;
        self.time_bank += delta;

        // The epsilon keeps one-per-frame steady state immune to float
        // rounding of 1/fps.
        let sub_ticks = ((self.time_bank / self.pretended_delta) + 0.000_001).floor();
        let sub_ticks = sub_ticks.max(0.0) as usize;
        self.time_bank -= sub_ticks as f64 * self.pretended_delta;
        if self.time_bank < 0.0 {
            self.time_bank = 0.0;
        }
        sub_ticks
    }

    pub fn apply_tick_speedup(&mut self, distance: i8, config: &ControllerConfig) {
        self.acceleration_fps_speed = f64::from(distance) * config.tick_acceleration;
        self.acceleration_timer_ms = f64::from(config.tick_speedup_notification_delay);
        trace!(
            "tick speedup applied: distance {} -> {:+.1} fps",
            distance,
            self.acceleration_fps_speed
        );
    }

    pub fn queue_instant(&mut self, index: usize) -> Result<(), ControllerError> {
        if index >= self.ring.len() {
            return Err(ControllerError::InstantOutOfRange {
                index,
                count: self.ring.len(),
            });
        }
        self.queued_instant = Some(index);
        Ok(())
    }

    /// One sub-tick. Returns true when a brand-new input was produced
    /// (a replayed instant returns false).
    pub fn process(
        &mut self,
        driver: &mut dyn ControllerDriver,
        config: &ControllerConfig,
        delta: f64,
        net: &mut dyn NetworkAdapter,
    ) -> bool {
        if let Some(index) = self.queued_instant.take() {
            let Some(frame) = self.ring.get(index) else {
                error!(
                    "queued rewind instant {} vanished from the input ring ({} stored)",
                    index,
                    self.ring.len()
                );
                return false;
            };
            self.current_input_id = frame.id;
            let mut reader = frame.reader();
            driver.controller_process(delta, &mut reader);
            return false;
        }

        if !self.can_accept_new_inputs() {
            self.streaming_paused = true;
            return false;
        }
        self.streaming_paused = false;

        let mut writer = BitWriter::new();
        driver.collect_inputs(delta, &mut writer);
        let (buffer, bit_count) = writer.to_bits();

        let id = self.input_counter;
        self.input_counter = self.input_counter.wrapping_add(1);
        self.current_input_id = id;

        let similarity = match self.ring.back() {
            Some(prev) if prev.bit_count == bit_count && prev.buffer == buffer => {
                prev.similarity + 1
            }
            _ => 0,
        };

        let frame = FrameInput {
            id,
            buffer,
            bit_count,
            similarity,
            received_timestamp: 0,
        };

        {
            let mut reader = frame.reader();
            driver.controller_process(delta, &mut reader);
        }

        if self.ring.try_insert(frame).is_err() {
            // Unreachable: the counter is strictly monotone.
            error!("player input ring rejected a monotone id {}", id);
            return false;
        }

        self.send_frame_inputs(config, net);
        true
    }

    /// Sends the most recent inputs, newest plus redundancy, in one
    /// unreliable packet.
    fn send_frame_inputs(&self, config: &ControllerConfig, net: &mut dyn NetworkAdapter) {
        let redundancy = config.max_redundant_inputs.max(1);
        if let Some(payload) = encode_input_packet(&self.ring, redundancy) {
            let server_peer = net.server_peer_id();
            net.send_inputs(server_peer, payload);
        }
    }

    /// Server confirmed state at `input_id`; drop it and everything
    /// older.
    pub fn notify_input_checked(&mut self, input_id: InputId) {
        self.ring.drop_up_to(input_id);
    }

    fn can_accept_new_inputs(&self) -> bool {
        !self.ring.is_full()
    }
}
