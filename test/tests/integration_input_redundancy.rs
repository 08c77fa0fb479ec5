//! Scenario: input packets are lost, but the redundant history in the
//! surviving packets reconstructs the full stream; every input applies
//! exactly once.

use netsync_shared::{ControllerConfig, VarValue};
use netsync_test::helpers::{Sent, TestPair, CLIENT_PEER};

#[test]
fn dropped_packets_are_recovered_from_redundant_history() {
    let mut pair = TestPair::new();
    let client_steps = pair
        .client_host
        .make_controller("hero", ControllerConfig::default());
    pair.server_host
        .make_controller("hero", ControllerConfig::default());
    pair.server_net.set_authority("hero", CLIENT_PEER);
    pair.client_net.set_authority("hero", CLIENT_PEER);
    pair.register_mirrored("hero", &[("pos", VarValue::Int(0))]);

    const ROUNDS: usize = 20;
    let mut packet_index = 0usize;
    for _ in 0..ROUNDS {
        client_steps.borrow_mut().push_back(1);
        pair.server_tick();
        pair.pump_server_to_client();
        pair.client_tick();

        // Deliver only every second input packet; the default redundancy
        // of 6 bridges the gap comfortably.
        for message in pair.client_net.drain() {
            match message {
                Sent::Inputs { payload, .. } => {
                    packet_index += 1;
                    if packet_index % 2 == 0 {
                        pair.server.receive_inputs(CLIENT_PEER, &payload);
                    }
                }
                Sent::NeedFullSnapshot { .. } => {
                    pair.server.receive_need_full_snapshot(CLIENT_PEER);
                }
                _ => {}
            }
        }
    }

    // Drain the pipeline with zero-step inputs, still dropping every
    // second packet.
    for _ in 0..6 {
        pair.server_tick();
        pair.pump_server_to_client();
        pair.client_tick();
        for message in pair.client_net.drain() {
            if let Sent::Inputs { payload, .. } = message {
                packet_index += 1;
                if packet_index % 2 == 0 {
                    pair.server.receive_inputs(CLIENT_PEER, &payload);
                }
            }
        }
    }

    // Every one of the step-1 inputs landed exactly once: no double
    // application, no hole.
    assert_eq!(
        pair.server_host.get("hero", "pos"),
        Some(VarValue::Int(ROUNDS as i64))
    );
    assert_eq!(
        pair.client_host.get("hero", "pos"),
        Some(VarValue::Int(ROUNDS as i64))
    );
}

#[test]
fn duplicate_packets_have_no_side_effect() {
    let mut pair = TestPair::new();
    let client_steps = pair
        .client_host
        .make_controller("hero", ControllerConfig::default());
    pair.server_host
        .make_controller("hero", ControllerConfig::default());
    pair.server_net.set_authority("hero", CLIENT_PEER);
    pair.client_net.set_authority("hero", CLIENT_PEER);
    pair.register_mirrored("hero", &[("pos", VarValue::Int(0))]);

    for _ in 0..5 {
        client_steps.borrow_mut().push_back(2);
        pair.server_tick();
        pair.pump_server_to_client();
        pair.client_tick();

        // Deliver every packet three times.
        for message in pair.client_net.drain() {
            if let Sent::Inputs { payload, .. } = message {
                pair.server.receive_inputs(CLIENT_PEER, &payload);
                assert!(!pair.server.receive_inputs(CLIENT_PEER, &payload));
                assert!(!pair.server.receive_inputs(CLIENT_PEER, &payload));
            }
        }
    }
    for _ in 0..4 {
        pair.round();
    }

    assert_eq!(pair.server_host.get("hero", "pos"), Some(VarValue::Int(10)));
}
