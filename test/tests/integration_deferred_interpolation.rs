//! Scenario: a deferred object streams opaque epoch buffers; the client
//! interpolates between the two most recent epochs and waits when the
//! stream runs dry.

use std::cell::RefCell;
use std::rc::Rc;

use netsync_shared::{BitWrite, SyncGroups, VarValue};
use netsync_test::helpers::{TestPair, CLIENT_PEER};

#[test]
fn epochs_interpolate_with_the_expected_alpha_steps() {
    let _ = env_logger::builder().is_test(true).try_init();
    let mut pair = TestPair::new();

    pair.server_host.spawn("cloud", &[("density", VarValue::Int(0))]);
    pair.client_host.spawn("cloud", &[("density", VarValue::Int(0))]);

    let server_cloud = {
        let handle = pair.server_host.fetch("cloud");
        pair.server
            .register_object(&mut pair.server_host, &mut pair.server_net, handle)
            .unwrap()
    };
    let client_cloud = {
        let handle = pair.client_host.fetch("cloud");
        pair.client
            .register_object(&mut pair.client_host, &mut pair.client_net, handle)
            .unwrap()
    };

    // Server: collect the density as one byte per epoch.
    let server_world = pair.server_host.world();
    pair.server
        .core_mut()
        .setup_deferred_sync(
            server_cloud,
            Box::new(move |writer| {
                let value = match server_world.borrow().get("cloud", "density") {
                    Some(VarValue::Int(value)) => value,
                    _ => 0,
                };
                writer.write_byte(value as u8);
            }),
            Box::new(|_, _, _, _| {}),
        )
        .unwrap();

    // Client: collect its current rendered density, apply the
    // interpolation into the world, and log every (alpha, past, future).
    let applied: Rc<RefCell<Vec<(f64, u8, u8)>>> = Rc::new(RefCell::new(Vec::new()));
    let sink = applied.clone();
    let client_world = pair.client_host.world();
    let collect_world = client_world.clone();
    pair.client
        .core_mut()
        .setup_deferred_sync(
            client_cloud,
            Box::new(move |writer| {
                let value = match collect_world.borrow().get("cloud", "density") {
                    Some(VarValue::Int(value)) => value,
                    _ => 0,
                };
                writer.write_byte(value as u8);
            }),
            Box::new(move |_delta, alpha, past, future| {
                let past_byte = past.read_byte().unwrap_or(0);
                let future_byte = future.read_byte().unwrap_or(0);
                sink.borrow_mut().push((alpha, past_byte, future_byte));

                let blend = alpha.clamp(0.0, 1.0);
                let value = f64::from(past_byte)
                    + (f64::from(future_byte) - f64::from(past_byte)) * blend;
                client_world
                    .borrow_mut()
                    .set("cloud", "density", VarValue::Int(value.round() as i64));
            }),
        )
        .unwrap();

    // A dedicated group where the cloud streams at one update per ten
    // accumulation ticks.
    let group = pair.server.sync_group_create();
    pair.server.sync_group_add_object(server_cloud, group, false);
    pair.server
        .sync_group_set_deferred_update_rate(server_cloud, group, 0.1);
    pair.server.sync_group_move_peer_to(CLIENT_PEER, group);

    // First epoch: binds the object and seeds the stream, which then
    // waits for a second endpoint.
    pair.server_host.set("cloud", "density", VarValue::Int(10));
    for _ in 0..12 {
        pair.round();
    }
    assert!(
        applied.borrow().is_empty(),
        "one epoch is not enough to interpolate"
    );
    assert_eq!(pair.client.deferred_streams().len(), 1);
    assert!(pair.client.deferred_streams()[0].is_waiting());

    // Second epoch one emission period later: interpolation starts from
    // alpha 0 with steps of 1/(epoch distance).
    pair.server_host.set("cloud", "density", VarValue::Int(20));
    for _ in 0..12 {
        pair.round();
    }

    let stream_step = {
        let stream = &pair.client.deferred_streams()[0];
        assert!(stream.future_epoch > stream.past_epoch);
        1.0 / f64::from(stream.future_epoch - stream.past_epoch)
    };

    let samples = applied.borrow().clone();
    assert!(!samples.is_empty(), "interpolation must have started");
    let (first_alpha, _past, future) = samples[0];
    assert!(
        (first_alpha - stream_step).abs() < 1e-9,
        "the first applied alpha is one epoch step, got {first_alpha}"
    );
    assert_eq!(future, 20, "the future endpoint is the newest epoch");
    for window in samples.windows(2) {
        let step = window[1].0 - window[0].0;
        assert!(
            (step - stream_step).abs() < 1e-9,
            "alpha advances by the same step every tick, got {step}"
        );
    }

    // The interpolated value moved toward the future endpoint.
    match pair.client_host.get("cloud", "density") {
        Some(VarValue::Int(value)) => assert!(value > 0, "density should have advanced"),
        other => panic!("unexpected density {other:?}"),
    }
}

#[test]
fn deferred_objects_are_not_simulated_on_the_client() {
    let mut pair = TestPair::new();

    pair.server_host.spawn("cloud", &[("density", VarValue::Int(5))]);
    pair.client_host.spawn("cloud", &[("density", VarValue::Int(5))]);

    let server_cloud = {
        let handle = pair.server_host.fetch("cloud");
        pair.server
            .register_object(&mut pair.server_host, &mut pair.server_net, handle)
            .unwrap()
    };
    pair.server
        .register_variable(&mut pair.server_host, server_cloud, "density")
        .unwrap();
    let client_cloud = {
        let handle = pair.client_host.fetch("cloud");
        pair.client
            .register_object(&mut pair.client_host, &mut pair.client_net, handle)
            .unwrap()
    };
    pair.client
        .register_variable(&mut pair.client_host, client_cloud, "density")
        .unwrap();
    pair.server
        .core_mut()
        .setup_deferred_sync(
            server_cloud,
            Box::new(|writer| writer.write_byte(0)),
            Box::new(|_, _, _, _| {}),
        )
        .unwrap();

    let group = pair.server.sync_group_create();
    pair.server.sync_group_add_object(server_cloud, group, false);
    pair.server.sync_group_move_peer_to(CLIENT_PEER, group);

    for _ in 0..3 {
        pair.round();
    }

    // The active-object list of the group snapshot excluded the cloud,
    // so the client disabled realtime sync for it.
    let realtime = pair
        .client
        .core()
        .store()
        .get(client_cloud)
        .map(|od| od.realtime_enabled);
    assert_eq!(realtime, Some(false));
}
