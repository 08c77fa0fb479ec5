use std::collections::{HashMap, VecDeque};

use netsync_shared::{NetworkAdapter, ObjectNetId, PeerId};

/// Everything a synchronizer pushed into the transport, in send order.
#[derive(Clone, Debug)]
pub enum Sent {
    State { peer: PeerId, payload: Vec<u8> },
    NeedFullSnapshot { peer: PeerId },
    SetNetworkingEnabled { peer: PeerId, enabled: bool },
    PeerStatus { peer: PeerId, enabled: bool },
    TickSpeedup { peer: PeerId, distance: i8 },
    ServerControlled { peer: PeerId, object: ObjectNetId, server_controlled: bool },
    Inputs { peer: PeerId, payload: Vec<u8> },
    DeferredData { peer: PeerId, payload: Vec<u8> },
}

/// An already-connected, loss-free in-memory transport. Tests drain
/// `sent` and deliver (or drop) messages by hand.
pub struct MemoryAdapter {
    local_peer: PeerId,
    server_peer: PeerId,
    authority: HashMap<String, PeerId>,
    pub sent: VecDeque<Sent>,
}

impl MemoryAdapter {
    pub fn new(local_peer: PeerId, server_peer: PeerId) -> Self {
        Self {
            local_peer,
            server_peer,
            authority: HashMap::new(),
            sent: VecDeque::new(),
        }
    }

    pub fn set_authority(&mut self, object_name: &str, peer: PeerId) {
        self.authority.insert(object_name.to_string(), peer);
    }

    pub fn drain(&mut self) -> Vec<Sent> {
        self.sent.drain(..).collect()
    }
}

impl NetworkAdapter for MemoryAdapter {
    fn local_peer_id(&self) -> PeerId {
        self.local_peer
    }

    fn server_peer_id(&self) -> PeerId {
        self.server_peer
    }

    fn authority_of(&self, object_name: &str) -> Option<PeerId> {
        self.authority.get(object_name).copied()
    }

    fn send_state(&mut self, peer: PeerId, payload: Vec<u8>) {
        self.sent.push_back(Sent::State { peer, payload });
    }

    fn send_need_full_snapshot(&mut self, peer: PeerId) {
        self.sent.push_back(Sent::NeedFullSnapshot { peer });
    }

    fn send_set_networking_enabled(&mut self, peer: PeerId, enabled: bool) {
        self.sent
            .push_back(Sent::SetNetworkingEnabled { peer, enabled });
    }

    fn send_peer_status(&mut self, peer: PeerId, enabled: bool) {
        self.sent.push_back(Sent::PeerStatus { peer, enabled });
    }

    fn send_tick_speedup(&mut self, peer: PeerId, distance: i8) {
        self.sent.push_back(Sent::TickSpeedup { peer, distance });
    }

    fn send_server_controlled(
        &mut self,
        peer: PeerId,
        object: ObjectNetId,
        server_controlled: bool,
    ) {
        self.sent.push_back(Sent::ServerControlled {
            peer,
            object,
            server_controlled,
        });
    }

    fn send_inputs(&mut self, peer: PeerId, payload: Vec<u8>) {
        self.sent.push_back(Sent::Inputs { peer, payload });
    }

    fn send_deferred_data(&mut self, peer: PeerId, payload: Vec<u8>) {
        self.sent.push_back(Sent::DeferredData { peer, payload });
    }
}
