//! Scenario: a controller's input stream dries out; after the ghost
//! tolerance the server pauses it and snapshots stop carrying an input
//! id, until fresh inputs revive the stream.

use netsync_serde::{BitReader, Serde};
use netsync_shared::{ControllerConfig, VarValue, NONE_INPUT_ID, GHOST_INPUT_TOLERANCE};
use netsync_test::helpers::{Sent, TestPair, CLIENT_PEER};

fn state_input_id(messages: &[Sent]) -> Option<u32> {
    messages.iter().find_map(|m| match m {
        Sent::State { payload, .. } => {
            let mut reader = BitReader::new(payload);
            u32::de(&mut reader).ok()
        }
        _ => None,
    })
}

#[test]
fn starved_stream_pauses_and_recovers() {
    let mut pair = TestPair::new();
    let client_steps = pair
        .client_host
        .make_controller("hero", ControllerConfig::default());
    pair.server_host
        .make_controller("hero", ControllerConfig::default());
    pair.server_net.set_authority("hero", CLIENT_PEER);
    pair.client_net.set_authority("hero", CLIENT_PEER);
    pair.register_mirrored("hero", &[("pos", VarValue::Int(0))]);

    // Healthy stream for a few rounds.
    for _ in 0..4 {
        client_steps.borrow_mut().push_back(1);
        pair.round();
    }

    // The link drops: the client keeps producing inputs, but every
    // packet is lost before reaching the server.
    let mut last_input_id = None;
    for _ in 0..(GHOST_INPUT_TOLERANCE + 2) {
        pair.server_tick();
        last_input_id = state_input_id(&pair.server_net.drain()).or(last_input_id);
        client_steps.borrow_mut().push_back(1);
        pair.client_tick();
        pair.client_net.drain();
    }
    assert_eq!(
        last_input_id,
        Some(NONE_INPUT_ID),
        "a paused controller's snapshots carry no input id"
    );

    // Fresh inputs revive the stream; the redundant history re-seeds the
    // ring and snapshots carry input ids again.
    for _ in 0..3 {
        client_steps.borrow_mut().push_back(1);
        pair.client_tick();
        pair.pump_client_to_server();
    }
    pair.server_tick();
    let revived_id = state_input_id(&pair.server_net.drain());
    assert!(
        revived_id.is_some() && revived_id != Some(NONE_INPUT_ID),
        "the revived stream must stamp snapshots again, got {revived_id:?}"
    );
}
