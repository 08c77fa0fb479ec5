use log::{debug, trace, warn};

use netsync_serde::BitWriter;

use crate::config::ControllerConfig;
use crate::controller::{ControllerError, GHOST_INPUT_TOLERANCE};
use crate::event::SyncEvent;
use crate::host::{ControllerDriver, NetworkAdapter};
use crate::input::{decode_input_packet, FrameInput, InputError, InputRing};
use crate::stats::StatisticalRingBuffer;
use crate::types::{InputId, PeerId, NONE_INPUT_ID};

/// The queue-driven consumption shared by the server and doll roles:
/// pull the next input in id order, ghost-extend through short gaps,
/// pause the stream when the gap outlasts the tolerance.
struct RemoteQueue {
    ring: InputRing,
    current_input: Option<FrameInput>,
    current_input_id: InputId,
    ghost_input_count: u32,
    streaming_paused: bool,
}

impl RemoteQueue {
    fn new(config: &ControllerConfig) -> Self {
        Self {
            ring: InputRing::new(config.player_input_storage_size),
            current_input: None,
            current_input_id: NONE_INPUT_ID,
            ghost_input_count: 0,
            streaming_paused: false,
        }
    }

    /// Advances to the next input. Returns whether there is an input to
    /// apply this tick (fresh or ghost-extended).
    fn fetch_next_input(&mut self, events: &mut Vec<SyncEvent>) -> bool {
        if self.streaming_paused {
            return false;
        }

        if self.current_input_id == NONE_INPUT_ID {
            // Very first input of this stream.
            return match self.ring.pop_front() {
                Some(frame) => {
                    self.accept(frame);
                    true
                }
                None => false,
            };
        }

        let expected = self.current_input_id.wrapping_add(1);

        // Anything older than the expected id was already consumed or
        // ghost-skipped.
        while let Some(front) = self.ring.front() {
            if front.id < expected {
                self.ring.pop_front();
            } else {
                break;
            }
        }

        match self.ring.front().map(|f| f.id) {
            Some(id) if id == expected => {
                let frame = self.ring.pop_front().unwrap();
                self.accept(frame);
                true
            }
            Some(id) => {
                // A gap: the inputs in between are lost.
                if self.ghost_input_count < GHOST_INPUT_TOLERANCE && self.current_input.is_some() {
                    self.ghost(expected, events)
                } else {
                    debug!(
                        "input gap outlasted ghosting; jumping from {} to {}",
                        expected, id
                    );
                    for missed in expected..id {
                        events.push(SyncEvent::InputMissed { input_id: missed });
                    }
                    let frame = self.ring.pop_front().unwrap();
                    self.accept(frame);
                    true
                }
            }
            None => {
                if self.ghost_input_count < GHOST_INPUT_TOLERANCE && self.current_input.is_some() {
                    self.ghost(expected, events)
                } else {
                    trace!("input stream dried out at {}; pausing", expected);
                    self.streaming_paused = true;
                    false
                }
            }
        }
    }

    fn accept(&mut self, frame: FrameInput) {
        self.current_input_id = frame.id;
        self.current_input = Some(frame);
        self.ghost_input_count = 0;
    }

    /// Reuses the last input under a pretend id.
    fn ghost(&mut self, id: InputId, events: &mut Vec<SyncEvent>) -> bool {
        self.ghost_input_count += 1;
        self.current_input_id = id;
        if let Some(frame) = &mut self.current_input {
            frame.id = id;
        }
        events.push(SyncEvent::InputMissed { input_id: id });
        true
    }

    /// Stores decoded frames, dropping ids already consumed and
    /// duplicates from redundant packets. Returns true when something
    /// new landed.
    fn store_frames(&mut self, frames: Vec<FrameInput>) -> bool {
        let mut newly_seen = false;
        for frame in frames {
            if self.current_input_id != NONE_INPUT_ID && frame.id <= self.current_input_id {
                continue;
            }
            match self.ring.try_insert(frame) {
                Ok(()) => newly_seen = true,
                Err(InputError::DuplicateId { .. }) => {}
                Err(err) => warn!("input ring rejected frame: {err}"),
            }
        }

        if newly_seen && self.streaming_paused {
            self.streaming_paused = false;
            self.ghost_input_count = 0;
        }
        newly_seen
    }

    fn effective_input_id(&self) -> InputId {
        if self.streaming_paused {
            NONE_INPUT_ID
        } else {
            self.current_input_id
        }
    }
}

/// Server side of a client-driven controller: applies the client's inputs
/// authoritatively and tunes the client's tick rate from connection
/// quality.
pub struct ServerRole {
    queue: RemoteQueue,
    peer_enabled: bool,
    fps_notif_timer_ms: f64,
    previous_packet_timestamp: Option<u64>,
    /// Inter-packet arrival times in ms.
    network_watcher: StatisticalRingBuffer<u32>,
    /// Buffered-input counts sampled at notify windows.
    consecutive_input_watcher: StatisticalRingBuffer<u32>,
}

impl ServerRole {
    pub fn new(config: &ControllerConfig) -> Self {
        Self {
            queue: RemoteQueue::new(config),
            peer_enabled: false,
            fps_notif_timer_ms: 0.0,
            previous_packet_timestamp: None,
            network_watcher: StatisticalRingBuffer::new(config.network_traced_frames),
            consecutive_input_watcher: StatisticalRingBuffer::new(config.network_traced_frames),
        }
    }

    pub fn current_input_id(&self) -> InputId {
        self.queue.effective_input_id()
    }

    pub fn last_known_input(&self) -> InputId {
        self.queue
            .ring
            .back()
            .map(|f| f.id)
            .unwrap_or(self.queue.current_input_id)
    }

    pub fn is_stream_paused(&self) -> bool {
        self.queue.streaming_paused
    }

    pub fn buffered_input_count(&self) -> usize {
        self.queue.ring.len()
    }

    pub fn set_peer_enabled(&mut self, enabled: bool) {
        self.peer_enabled = enabled;
    }

    pub fn process(
        &mut self,
        driver: &mut dyn ControllerDriver,
        delta: f64,
        events: &mut Vec<SyncEvent>,
    ) {
        if !self.queue.fetch_next_input(events) {
            return;
        }
        if let Some(frame) = &self.queue.current_input {
            let mut reader = frame.reader();
            driver.controller_process(delta, &mut reader);
        }
    }

    /// Autonomous variant: the server generates the input itself; the id
    /// advances every tick and nothing is ever received.
    pub fn process_autonomous(&mut self, driver: &mut dyn ControllerDriver, delta: f64) {
        let mut writer = BitWriter::new();
        driver.collect_inputs(delta, &mut writer);
        let (buffer, bit_count) = writer.to_bits();

        let id = if self.queue.current_input_id == NONE_INPUT_ID {
            0
        } else {
            self.queue.current_input_id.wrapping_add(1)
        };
        let frame = FrameInput {
            id,
            buffer,
            bit_count,
            similarity: 0,
            received_timestamp: 0,
        };
        let mut reader = frame.reader();
        driver.controller_process(delta, &mut reader);
        self.queue.accept(frame);
    }

    pub fn receive_inputs(
        &mut self,
        payload: &[u8],
        received_timestamp: u64,
        _events: &mut [SyncEvent],
    ) -> bool {
        let frames = decode_input_packet(payload, received_timestamp);
        if frames.is_empty() {
            warn!("received an input packet with no decodable frames");
            return false;
        }

        if let Some(previous) = self.previous_packet_timestamp {
            let gap = received_timestamp.saturating_sub(previous).min(u64::from(u32::MAX));
            self.network_watcher.push(gap as u32);
        }
        self.previous_packet_timestamp = Some(received_timestamp);

        self.queue.store_frames(frames)
    }

    /// Snapshot for this controller's peer was just sent; sample the
    /// buffer length for the frame-delay estimate.
    pub fn notify_send_state(&mut self) {
        self.consecutive_input_watcher
            .push(self.queue.ring.len().min(u32::MAX as usize) as u32);
    }

    /// Every notification window, tell the client how far its buffered
    /// input count sits from the optimal frame delay. Positive distance
    /// means speed up.
    pub fn adjust_player_tick_rate(
        &mut self,
        config: &ControllerConfig,
        delta: f64,
        net: &mut dyn NetworkAdapter,
        events: &mut Vec<SyncEvent>,
        peer: PeerId,
    ) {
        self.fps_notif_timer_ms += delta * 1000.0;
        if self.fps_notif_timer_ms < f64::from(config.tick_speedup_notification_delay) {
            return;
        }
        self.fps_notif_timer_ms = 0.0;

        if self.network_watcher.is_empty() {
            return;
        }

        let worst_receival_ms = self.network_watcher.max();
        let frame_ms = (delta * 1000.0).max(1.0);
        let optimal_frame_delay = ((worst_receival_ms as f64 / frame_ms).ceil() as i64)
            .clamp(config.min_frames_delay, config.max_frames_delay);
        let current_frame_delay = self.consecutive_input_watcher.average();

        let distance = (optimal_frame_delay - current_frame_delay).clamp(-128, 127) as i8;
        net.send_tick_speedup(peer, distance);
        events.push(SyncEvent::SpeedupAdjusted {
            peer,
            worst_receival_ms: worst_receival_ms.min(i64::from(u32::MAX)) as u32,
            optimal_frame_delay,
            current_frame_delay,
            distance,
        });
    }
}

/// A remote player's controller on a client. Consumes the relayed input
/// stream like the server does, producing a locally simulated shadow that
/// server snapshots later correct; no tick-rate adjustment.
pub struct DollRole {
    queue: RemoteQueue,
    last_checked_input: InputId,
    queued_instant: Option<usize>,
}

impl DollRole {
    pub fn new(config: &ControllerConfig) -> Self {
        Self {
            queue: RemoteQueue::new(config),
            last_checked_input: 0,
            queued_instant: None,
        }
    }

    pub fn current_input_id(&self) -> InputId {
        self.queue.effective_input_id()
    }

    pub fn last_known_input(&self) -> InputId {
        self.queue
            .ring
            .back()
            .map(|f| f.id)
            .unwrap_or(self.queue.current_input_id)
    }

    pub fn is_stream_paused(&self) -> bool {
        self.queue.streaming_paused
    }

    pub fn last_checked_input(&self) -> InputId {
        self.last_checked_input
    }

    pub fn queue_instant(&mut self, index: usize) -> Result<(), ControllerError> {
        if index >= self.queue.ring.len() {
            return Err(ControllerError::InstantOutOfRange {
                index,
                count: self.queue.ring.len(),
            });
        }
        self.queued_instant = Some(index);
        Ok(())
    }

    pub fn process(
        &mut self,
        driver: &mut dyn ControllerDriver,
        delta: f64,
        events: &mut Vec<SyncEvent>,
    ) {
        if let Some(index) = self.queued_instant.take() {
            if let Some(frame) = self.queue.ring.get(index) {
                let mut reader = frame.reader();
                driver.controller_process(delta, &mut reader);
            }
            return;
        }

        if !self.queue.fetch_next_input(events) {
            return;
        }
        if let Some(frame) = &self.queue.current_input {
            let mut reader = frame.reader();
            driver.controller_process(delta, &mut reader);
        }
    }

    pub fn receive_inputs(&mut self, payload: &[u8], received_timestamp: u64) -> bool {
        let frames = decode_input_packet(payload, received_timestamp);
        if frames.is_empty() {
            return false;
        }
        self.queue.store_frames(frames)
    }

    pub fn notify_input_checked(&mut self, input_id: InputId) {
        self.last_checked_input = input_id;
        self.queue.ring.drop_up_to(input_id);
    }
}
