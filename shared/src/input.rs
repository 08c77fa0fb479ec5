use std::collections::VecDeque;

use netsync_serde::{BitReader, BitWrite, BitWriter, Serde};
use thiserror::Error;

use crate::types::InputId;

/// Errors that can occur during InputRing operations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InputError {
    /// Attempted to insert a duplicate input id
    #[error("Duplicate input id {id} not allowed in InputRing")]
    DuplicateId { id: InputId },

    /// Attempted to insert an input older than one already consumed
    #[error("Input id {id} is older than the last consumed id {last_consumed}")]
    StaleId { id: InputId, last_consumed: InputId },
}

/// One captured player input: the opaque bit buffer the host collected,
/// plus the bookkeeping that drives redundancy and connection tracing.
#[derive(Clone, Debug)]
pub struct FrameInput {
    pub id: InputId,
    pub buffer: Vec<u8>,
    pub bit_count: u32,
    /// How many consecutive frames before this one carried the same
    /// buffer. Drives the `same_as_previous` packet compression.
    pub similarity: u32,
    /// Local receive timestamp in ms; zero for locally produced frames.
    pub received_timestamp: u64,
}

impl FrameInput {
    pub fn reader(&self) -> BitReader<'_> {
        BitReader::with_bit_length(&self.buffer, self.bit_count)
    }
}

/// An ordered, bounded queue of frame inputs for one controller.
///
/// The client's ring holds locally produced inputs awaiting confirmation;
/// the server's ring holds received inputs awaiting application. Inserts
/// scan from the back since redundant resends are almost always near the
/// tail.
pub struct InputRing {
    frames: VecDeque<FrameInput>,
    capacity: usize,
}

impl InputRing {
    pub fn new(capacity: usize) -> Self {
        Self {
            frames: VecDeque::with_capacity(capacity.min(256)),
            capacity: capacity.max(1),
        }
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.frames.len() >= self.capacity
    }

    pub fn front(&self) -> Option<&FrameInput> {
        self.frames.front()
    }

    pub fn back(&self) -> Option<&FrameInput> {
        self.frames.back()
    }

    pub fn get(&self, index: usize) -> Option<&FrameInput> {
        self.frames.get(index)
    }

    pub fn pop_front(&mut self) -> Option<FrameInput> {
        self.frames.pop_front()
    }

    /// Drops confirmed inputs from the front, up to and including `id`.
    pub fn drop_up_to(&mut self, id: InputId) {
        while let Some(front) = self.frames.front() {
            if front.id <= id {
                self.frames.pop_front();
            } else {
                break;
            }
        }
    }

    pub fn contains(&self, id: InputId) -> bool {
        for frame in self.frames.iter().rev() {
            if frame.id == id {
                return true;
            }
            if frame.id < id {
                return false;
            }
        }
        false
    }

    /// Inserts keeping ids ordered, scanning from the back. Duplicates are
    /// rejected; capacity overflow drops the oldest frame.
    pub fn try_insert(&mut self, frame: FrameInput) -> Result<(), InputError> {
        let mut index = self.frames.len();

        loop {
            if index == 0 {
                self.frames.push_front(frame);
                break;
            }

            index -= 1;

            let old_id = self.frames[index].id;
            if old_id == frame.id {
                return Err(InputError::DuplicateId { id: frame.id });
            }
            if old_id < frame.id {
                self.frames.insert(index + 1, frame);
                break;
            }
        }

        if self.frames.len() > self.capacity {
            self.frames.pop_front();
        }
        Ok(())
    }

    /// The most recent `count` frames, oldest first.
    pub fn tail(&self, count: usize) -> impl Iterator<Item = &FrameInput> {
        let skip = self.frames.len().saturating_sub(count);
        self.frames.iter().skip(skip)
    }
}

/// Encodes the trailing `redundancy` frames of the ring into one unreliable
/// input packet: `first_input_id:u32`, `count:u8`, then per frame a
/// `same_as_previous` flag and, when the buffer differs, its bit size and
/// content. Ids are consecutive from `first_input_id`.
pub fn encode_input_packet(ring: &InputRing, redundancy: usize) -> Option<Vec<u8>> {
    let frames: Vec<&FrameInput> = ring.tail(redundancy).collect();
    let first = frames.first()?;

    let mut writer = BitWriter::new();
    first.id.ser(&mut writer);
    (frames.len() as u8).ser(&mut writer);

    let mut previous: Option<&FrameInput> = None;
    for frame in &frames {
        let same = previous
            .map(|p| p.bit_count == frame.bit_count && p.buffer == frame.buffer)
            .unwrap_or(false);
        same.ser(&mut writer);
        if !same {
            (frame.bit_count as u16).ser(&mut writer);
            writer.write_bits(&frame.buffer, frame.bit_count);
        }
        previous = Some(frame);
    }

    Some(writer.to_bytes())
}

/// Decodes an input packet into frames stamped with `received_timestamp`.
/// A malformed tail aborts the decode and returns what was recovered.
pub fn decode_input_packet(payload: &[u8], received_timestamp: u64) -> Vec<FrameInput> {
    let mut reader = BitReader::new(payload);
    let mut frames = Vec::new();

    let Ok(first_id) = InputId::de(&mut reader) else {
        return frames;
    };
    let Ok(count) = u8::de(&mut reader) else {
        return frames;
    };

    let mut previous: Option<(Vec<u8>, u32)> = None;
    let mut similarity = 0u32;
    for offset in 0..count {
        let Ok(same) = bool::de(&mut reader) else {
            break;
        };

        let (buffer, bit_count) = if same {
            similarity += 1;
            match &previous {
                Some((buffer, bits)) => (buffer.clone(), *bits),
                // A packet can't open with a `same_as_previous` frame.
                None => break,
            }
        } else {
            similarity = 0;
            let Ok(bits) = u16::de(&mut reader) else {
                break;
            };
            let Ok(buffer) = reader.read_bits(u32::from(bits)) else {
                break;
            };
            (buffer, u32::from(bits))
        };

        previous = Some((buffer.clone(), bit_count));
        frames.push(FrameInput {
            id: first_id.wrapping_add(u32::from(offset)),
            buffer,
            bit_count,
            similarity,
            received_timestamp,
        });
    }

    frames
}
