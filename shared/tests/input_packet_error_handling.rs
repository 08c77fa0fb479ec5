/// Tests for input ring and input packet error handling
/// Covers duplicate rejection and malformed packet recovery

use netsync_shared::{
    decode_input_packet, encode_input_packet, FrameInput, InputError, InputRing,
};

fn frame(id: u32, payload: &[u8]) -> FrameInput {
    FrameInput {
        id,
        buffer: payload.to_vec(),
        bit_count: (payload.len() as u32) * 8,
        similarity: 0,
        received_timestamp: 0,
    }
}

#[test]
fn duplicate_insert_returns_error_and_keeps_the_original() {
    let mut ring = InputRing::new(8);
    ring.try_insert(frame(7, &[0xAA])).unwrap();

    let result = ring.try_insert(frame(7, &[0xBB]));
    assert_eq!(result, Err(InputError::DuplicateId { id: 7 }));
    assert_eq!(ring.front().unwrap().buffer, vec![0xAA]);
}

#[test]
fn empty_payload_decodes_to_nothing() {
    assert!(decode_input_packet(&[], 0).is_empty());
    assert!(decode_input_packet(&[0x01], 0).is_empty());
}

#[test]
fn packet_opening_with_a_reference_frame_is_rejected() {
    // A hand-built packet whose first frame claims "same as previous":
    // first_input_id = 5, count = 1, same_as_previous = true.
    use netsync_shared::{BitWriter, Serde};
    let mut writer = BitWriter::new();
    5u32.ser(&mut writer);
    1u8.ser(&mut writer);
    true.ser(&mut writer);

    let decoded = decode_input_packet(&writer.to_bytes(), 0);
    assert!(decoded.is_empty());
}

#[test]
fn truncated_packet_keeps_the_decodable_prefix() {
    let mut ring = InputRing::new(8);
    ring.try_insert(frame(10, &[0x01])).unwrap();
    ring.try_insert(frame(11, &[0x02])).unwrap();
    ring.try_insert(frame(12, &[0x03])).unwrap();

    let mut payload = encode_input_packet(&ring, 3).unwrap();
    payload.truncate(payload.len() - 2);

    let decoded = decode_input_packet(&payload, 0);
    assert!(!decoded.is_empty());
    assert!(decoded.len() < 3);
    assert_eq!(decoded[0].id, 10);
}

#[test]
fn oversized_declared_buffer_aborts_the_frame() {
    use netsync_shared::{BitWriter, Serde};
    // first_input_id = 0, count = 1, fresh frame declaring 64 bits but
    // carrying only 8.
    let mut writer = BitWriter::new();
    0u32.ser(&mut writer);
    1u8.ser(&mut writer);
    false.ser(&mut writer);
    64u16.ser(&mut writer);
    0xFFu8.ser(&mut writer);

    let decoded = decode_input_packet(&writer.to_bytes(), 0);
    assert!(decoded.is_empty());
}
