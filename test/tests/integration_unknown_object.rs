//! Scenario: a delta references a net id the client never learned (the
//! naming snapshot was lost). The client asks for a full snapshot once,
//! binds the object by name, and resumes delta processing.

use netsync_shared::VarValue;
use netsync_test::helpers::{Sent, TestPair, CLIENT_PEER};

#[test]
fn lost_name_binding_recovers_through_a_full_snapshot() {
    let mut pair = TestPair::new();
    pair.register_mirrored("platform", &[("x", VarValue::Int(0))]);
    pair.round();

    // A new object appears mid-session on both scenes; only the server
    // registers it for sync right away. The client pre-registers its
    // local scene object, as an application would on spawn.
    pair.server_host.spawn("Enemy3", &[("hp", VarValue::Int(30))]);
    pair.client_host.spawn("Enemy3", &[("hp", VarValue::Int(30))]);
    let server_enemy = {
        let handle = pair.server_host.fetch("Enemy3");
        pair.server
            .register_object(&mut pair.server_host, &mut pair.server_net, handle)
            .unwrap()
    };
    pair.server
        .register_variable(&mut pair.server_host, server_enemy, "hp")
        .unwrap();
    let client_enemy = {
        let handle = pair.client_host.fetch("Enemy3");
        pair.client
            .register_object(&mut pair.client_host, &mut pair.client_net, handle)
            .unwrap()
    };
    pair.client
        .register_variable(&mut pair.client_host, client_enemy, "hp")
        .unwrap();

    // The snapshot that would have taught the client the name is lost.
    pair.server_tick();
    pair.server_net.drain();

    // The next delta references the enemy by net id only.
    pair.server_host.set("Enemy3", "hp", VarValue::Int(25));
    pair.server_tick();
    pair.pump_server_to_client();

    let requests: Vec<Sent> = pair
        .client_net
        .drain()
        .into_iter()
        .filter(|m| matches!(m, Sent::NeedFullSnapshot { .. }))
        .collect();
    assert_eq!(requests.len(), 1, "exactly one full-snapshot request");
    pair.server.receive_need_full_snapshot(CLIENT_PEER);

    // The enemy is still unbound and untouched.
    assert_eq!(pair.client_host.get("Enemy3", "hp"), Some(VarValue::Int(30)));

    // The full snapshot carries the name; the client binds and applies.
    pair.server_tick();
    pair.pump_server_to_client();
    pair.client_tick();

    assert_eq!(pair.client_host.get("Enemy3", "hp"), Some(VarValue::Int(25)));
    let bound = pair
        .client
        .core()
        .store()
        .get(client_enemy)
        .map(|od| od.net_id());
    assert_eq!(
        bound,
        pair.server
            .core()
            .store()
            .get(server_enemy)
            .map(|od| od.net_id()),
        "the client adopted the server's net id"
    );
}
