use netsync_client::ClientSynchronizer;
use netsync_server::ServerSynchronizer;
use netsync_shared::{ObjectLocalId, PeerId, VarValue};

use super::memory_adapter::{MemoryAdapter, Sent};
use super::mock_host::MockHost;

pub const SERVER_PEER: PeerId = 1;
pub const CLIENT_PEER: PeerId = 2;

/// One server and one connected client with mirrored mock scenes, plus
/// hand-cranked packet delivery between them.
pub struct TestPair {
    pub server: ServerSynchronizer,
    pub client: ClientSynchronizer,
    pub server_host: MockHost,
    pub client_host: MockHost,
    pub server_net: MemoryAdapter,
    pub client_net: MemoryAdapter,
    pub delta: f64,
}

impl Default for TestPair {
    fn default() -> Self {
        Self::new()
    }
}

impl TestPair {
    pub fn new() -> Self {
        let mut server = ServerSynchronizer::new();
        // Tests want a snapshot per tick unless they say otherwise.
        server.core_mut().config.server_notify_state_interval = 0.0;
        server.on_peer_connected(CLIENT_PEER);

        let mut client = ClientSynchronizer::new();
        client.core_mut().on_peer_connected(SERVER_PEER);

        Self {
            server,
            client,
            server_host: MockHost::new(),
            client_host: MockHost::new(),
            server_net: MemoryAdapter::new(SERVER_PEER, SERVER_PEER),
            client_net: MemoryAdapter::new(CLIENT_PEER, SERVER_PEER),
            delta: 1.0 / 60.0,
        }
    }

    /// Spawns the object in both scenes and registers it (with its
    /// variables) on both synchronizers. Returns (server id, client id).
    pub fn register_mirrored(
        &mut self,
        name: &str,
        vars: &[(&str, VarValue)],
    ) -> (ObjectLocalId, ObjectLocalId) {
        self.server_host.spawn(name, vars);
        self.client_host.spawn(name, vars);

        let server_handle = self.server_host.fetch(name);
        let client_handle = self.client_host.fetch(name);

        let server_id = self
            .server
            .register_object(&mut self.server_host, &mut self.server_net, server_handle)
            .expect("server registration");
        let client_id = self
            .client
            .register_object(&mut self.client_host, &mut self.client_net, client_handle)
            .expect("client registration");

        for (var, _) in vars {
            self.server
                .register_variable(&mut self.server_host, server_id, var)
                .expect("server variable");
            self.client
                .register_variable(&mut self.client_host, client_id, var)
                .expect("client variable");
        }

        (server_id, client_id)
    }

    pub fn server_tick(&mut self) {
        self.server
            .process(&mut self.server_host, &mut self.server_net, self.delta);
    }

    pub fn client_tick(&mut self) {
        self.client
            .process(&mut self.client_host, &mut self.client_net, self.delta);
    }

    /// Delivers everything the server sent to the client. Returns the
    /// raw messages for assertions.
    pub fn pump_server_to_client(&mut self) -> Vec<Sent> {
        let messages = self.server_net.drain();
        for message in &messages {
            match message {
                Sent::State { peer, payload } if *peer == CLIENT_PEER => {
                    self.client
                        .receive_snapshot(&mut self.client_host, &mut self.client_net, payload);
                }
                Sent::DeferredData { peer, payload } if *peer == CLIENT_PEER => {
                    self.client.receive_deferred_sync_data(payload);
                }
                Sent::TickSpeedup { peer, distance } if *peer == CLIENT_PEER => {
                    self.client.receive_tick_speedup(*distance);
                }
                Sent::SetNetworkingEnabled { peer, enabled } if *peer == CLIENT_PEER => {
                    self.client.receive_set_networking_enabled(*enabled);
                }
                Sent::ServerControlled {
                    peer,
                    object,
                    server_controlled,
                } if *peer == CLIENT_PEER => {
                    self.client.receive_server_controlled(
                        &mut self.client_net,
                        *object,
                        *server_controlled,
                    );
                }
                _ => {}
            }
        }
        messages
    }

    /// Delivers everything the client sent to the server.
    pub fn pump_client_to_server(&mut self) -> Vec<Sent> {
        let messages = self.client_net.drain();
        for message in &messages {
            match message {
                Sent::Inputs { peer, payload } if *peer == SERVER_PEER => {
                    self.server.receive_inputs(CLIENT_PEER, payload);
                }
                Sent::NeedFullSnapshot { peer } if *peer == SERVER_PEER => {
                    self.server.receive_need_full_snapshot(CLIENT_PEER);
                }
                _ => {}
            }
        }
        messages
    }

    /// One full round: server tick, server->client delivery, client
    /// tick, client->server delivery.
    pub fn round(&mut self) {
        self.server_tick();
        self.pump_server_to_client();
        self.client_tick();
        self.pump_client_to_server();
    }
}

impl MockHost {
    /// Panicking handle lookup for test setup.
    pub fn fetch(&mut self, name: &str) -> netsync_shared::ObjectHandle {
        use netsync_shared::SceneHost;
        self.fetch_app_object(name)
            .unwrap_or_else(|| panic!("object `{name}` was never spawned"))
    }
}
