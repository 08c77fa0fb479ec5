use std::collections::{BTreeMap, VecDeque};

use log::{debug, error, trace, warn};

use netsync_serde::{BitReader, BitWriter, Serde, SerdeErr};
use netsync_shared::scene::SceneCore;
use netsync_shared::{
    compare_snapshots, HostType, InputId, NetEventFlag, NetworkAdapter, ObjectHandle,
    ObjectLocalId, ObjectNetId, SceneHost, Snapshot, SnapshotVar, SyncEvent, VarId, VarValue,
    NONE_INPUT_ID,
};

use crate::deferred::DeferredStream;

/// The predictive synchronizer living on each client. Simulates the local
/// player optimistically, stores one client snapshot per produced input,
/// and reconciles against the server snapshot stream.
pub struct ClientSynchronizer {
    core: SceneCore,
    player_controller: Option<ObjectLocalId>,
    /// Net-id-to-name bindings learned from snapshots, kept so later
    /// nameless deltas can still bind late-registered objects.
    object_names: BTreeMap<ObjectNetId, String>,
    /// Deltas are incremental; the last received snapshot is the base
    /// they are reconstructed onto.
    last_received_snapshot: Snapshot,
    client_snapshots: VecDeque<Snapshot>,
    server_snapshots: VecDeque<Snapshot>,
    last_checked_input: InputId,
    enabled: bool,
    want_to_enable: bool,
    need_full_snapshot_notified: bool,
    /// Old values captured at the first sync write per variable, keyed by
    /// (net id, var id) so END_SYNC fires once per settled variable.
    end_sync_events: BTreeMap<(u16, u32), (ObjectLocalId, VarValue)>,
    deferred: Vec<DeferredStream>,
}

impl Default for ClientSynchronizer {
    fn default() -> Self {
        Self::new()
    }
}

impl ClientSynchronizer {
    pub fn new() -> Self {
        Self {
            core: SceneCore::new(HostType::Client),
            player_controller: None,
            object_names: BTreeMap::new(),
            last_received_snapshot: Snapshot::new(),
            client_snapshots: VecDeque::new(),
            server_snapshots: VecDeque::new(),
            last_checked_input: 0,
            enabled: true,
            want_to_enable: false,
            need_full_snapshot_notified: false,
            end_sync_events: BTreeMap::new(),
            deferred: Vec::new(),
        }
    }

    pub fn core(&self) -> &SceneCore {
        &self.core
    }

    pub fn core_mut(&mut self) -> &mut SceneCore {
        &mut self.core
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn last_checked_input(&self) -> InputId {
        self.last_checked_input
    }

    pub fn player_controller(&self) -> Option<ObjectLocalId> {
        self.player_controller
    }

    pub fn take_events(&mut self) -> Vec<SyncEvent> {
        self.core.take_events()
    }

    // ---------------------------------------------------------- Registration

    /// Registers a host object. The net id stays unassigned until a
    /// snapshot binds it.
    pub fn register_object(
        &mut self,
        host: &mut dyn SceneHost,
        net: &mut dyn NetworkAdapter,
        handle: ObjectHandle,
    ) -> Result<ObjectLocalId, netsync_shared::StoreError> {
        let id = self.core.register_object(host, handle)?;
        self.core.reset_controller(id, net, false);
        self.refresh_player_controller();
        Ok(id)
    }

    pub fn unregister_object(&mut self, id: ObjectLocalId) {
        if let Some(object) = self.core.unregister_object(id) {
            if !object.net_id().is_none() {
                self.last_received_snapshot.drop_object(object.net_id());
            }
        }
        self.deferred.retain(|stream| stream.object != id);
        if self.player_controller == Some(id) {
            self.player_controller = None;
            self.server_snapshots.clear();
            self.client_snapshots.clear();
        }
    }

    pub fn register_variable(
        &mut self,
        host: &mut dyn SceneHost,
        id: ObjectLocalId,
        name: &str,
    ) -> Result<VarId, netsync_shared::StoreError> {
        self.core.register_variable(host, id, name)
    }

    /// Postponed enable: the next received snapshot flips it on, so the
    /// client re-enters sync from a consistent state.
    pub fn set_enabled(&mut self, enabled: bool) {
        if self.enabled == enabled {
            return;
        }
        if enabled {
            self.want_to_enable = true;
        } else {
            self.enabled = false;
            self.want_to_enable = false;
            self.server_snapshots.clear();
            self.client_snapshots.clear();
            self.core.events_mut().push(SyncEvent::SyncPaused);
        }
    }

    /// Server-driven enable toggle (reliable channel).
    pub fn receive_set_networking_enabled(&mut self, enabled: bool) {
        self.set_enabled(enabled);
    }

    /// Server tick-rate hint for the local player controller.
    pub fn receive_tick_speedup(&mut self, distance: i8) {
        let Some(id) = self.player_controller else {
            return;
        };
        if let Some(od) = self.core.store_mut().get_mut(id) {
            if let Some(controller) = &mut od.controller {
                controller.receive_tick_speedup(distance);
            }
        }
    }

    /// The server flipped a controller between AI possession and client
    /// possession; rebuild the local role accordingly.
    pub fn receive_server_controlled(
        &mut self,
        net: &mut dyn NetworkAdapter,
        net_id: ObjectNetId,
        server_controlled: bool,
    ) {
        let Some(local) = self.core.store().local_id_of_net(net_id) else {
            warn!("server_controlled toggle for unknown net id {}", net_id.0);
            return;
        };
        self.core.set_server_controlled(local, net, server_controlled);
        self.refresh_player_controller();
    }

    /// Relayed input stream for a remote player's doll.
    pub fn receive_doll_inputs(&mut self, net_id: ObjectNetId, payload: &[u8]) -> bool {
        let Some(local) = self.core.store().local_id_of_net(net_id) else {
            return false;
        };
        let timestamp = netsync_shared::Timestamp::now_ms();
        let core = &mut self.core;
        let Some(od) = core.store_mut().get_mut(local) else {
            return false;
        };
        let Some(controller) = &mut od.controller else {
            return false;
        };
        let mut events = Vec::new();
        let newly = controller.receive_inputs(payload, timestamp, &mut events);
        core.events_mut().extend(events);
        newly
    }

    // --------------------------------------------------------------- Process

    /// One client tick: predictive simulation, server-state
    /// reconciliation, END_SYNC dispatch, deferred interpolation.
    pub fn process(&mut self, host: &mut dyn SceneHost, net: &mut dyn NetworkAdapter, delta: f64) {
        self.core.update_peers(net);
        self.refresh_player_controller();

        self.process_simulation(host, net, delta);
        self.process_received_server_state(host, net, delta);
        self.signal_end_sync_changed_variables(host);
        self.process_received_deferred_sync_data(delta);
    }

    fn process_simulation(
        &mut self,
        host: &mut dyn SceneHost,
        net: &mut dyn NetworkAdapter,
        delta: f64,
    ) {
        let Some(player_id) = self.player_controller.filter(|_| self.enabled) else {
            // No local player; keep listeners fed anyway.
            self.core.detect_changes(host, NetEventFlag::CHANGE);
            return;
        };

        let ticks_per_second = 1.0 / delta.max(1e-9);
        let sub_ticks = {
            let Some(od) = self.core.store_mut().get_mut(player_id) else {
                return;
            };
            let Some(controller) = &mut od.controller else {
                return;
            };
            controller.calculate_sub_ticks(delta, ticks_per_second)
        };

        if sub_ticks == 0 {
            trace!("no sub ticks this frame; the lag compensation is slowing us down");
        }

        for _ in 0..sub_ticks {
            if let Some(od) = self.core.store_mut().get_mut(player_id) {
                if let Some(controller) = &mut od.controller {
                    controller.clear_player_new_input();
                }
            }

            self.core.process_functions_execute(delta, net);
            self.core.detect_changes(host, NetEventFlag::CHANGE);

            let produced = self
                .core
                .store()
                .get(player_id)
                .and_then(|od| od.controller.as_ref())
                .map(|c| c.player_has_new_input())
                .unwrap_or(false);
            if produced {
                self.store_snapshot(host, player_id);
            }
        }
    }

    /// Captures the post-tick state under the input id that produced it.
    fn store_snapshot(&mut self, host: &mut dyn SceneHost, player_id: ObjectLocalId) {
        let input_id = self
            .core
            .store()
            .get(player_id)
            .and_then(|od| od.controller.as_ref())
            .map(|c| c.current_input_id())
            .unwrap_or(NONE_INPUT_ID);

        if let Some(back) = self.client_snapshots.back() {
            debug_assert!(
                back.input_id == NONE_INPUT_ID || input_id > back.input_id,
                "client snapshot ids must be monotone: {} then {}",
                back.input_id,
                input_id
            );
        }

        let mut snapshot = Snapshot::new();
        snapshot.input_id = input_id;
        self.update_client_snapshot(host, &mut snapshot);
        self.client_snapshots.push_back(snapshot);
    }

    /// Refreshes `snapshot` from the live store: every realtime object's
    /// enabled variables, plus the application custom data.
    fn update_client_snapshot(&mut self, host: &mut dyn SceneHost, snapshot: &mut Snapshot) {
        snapshot.has_custom_data = false;
        if let Some(custom) = host.snapshot_get_custom_data(None) {
            snapshot.has_custom_data = true;
            snapshot.custom_data = custom;
        }

        for object in self.core.store().iter() {
            let net_id = object.net_id();
            if net_id.is_none() || !object.realtime_enabled {
                continue;
            }
            let slot = snapshot.ensure_object_slot(net_id);
            slot.clear();
            slot.resize(object.vars.len(), SnapshotVar::default());
            for (index, var) in object.vars.iter().enumerate() {
                if var.enabled {
                    slot[index] = SnapshotVar {
                        name: var.name.clone(),
                        value: var.value.clone(),
                    };
                }
            }
        }
    }

    // ------------------------------------------------------ Incoming state

    /// Entry point for a received state payload (reliable channel).
    pub fn receive_snapshot(
        &mut self,
        host: &mut dyn SceneHost,
        net: &mut dyn NetworkAdapter,
        payload: &[u8],
    ) {
        if !self.parse_snapshot(host, net, payload) {
            return;
        }
        let snapshot = self.last_received_snapshot.clone();
        self.store_controllers_snapshot(snapshot);
    }

    fn parse_snapshot(
        &mut self,
        host: &mut dyn SceneHost,
        net: &mut dyn NetworkAdapter,
        payload: &[u8],
    ) -> bool {
        if self.want_to_enable {
            if self.enabled {
                error!("the client was supposed to be disabled while waiting to re-enable");
            }
            self.enabled = true;
            self.want_to_enable = false;
            self.core.events_mut().push(SyncEvent::SyncStarted);
        }

        // A fresh snapshot resets the single-shot full-snapshot request.
        self.need_full_snapshot_notified = false;

        let mut received = self.last_received_snapshot.clone();
        received.input_id = NONE_INPUT_ID;
        received.active_object_ids = None;

        match self.parse_sync_data(host, net, payload, &mut received) {
            Ok(()) => {
                if received.input_id == NONE_INPUT_ID && self.player_controller.is_some() {
                    debug!(
                        "the received snapshot carries no input id while a player controller \
                         exists; the server likely destroyed the peer controller"
                    );
                }
                self.last_received_snapshot = received;
                true
            }
            Err(err) => {
                error!("snapshot parsing failed ({err}); requesting a full snapshot");
                self.notify_server_full_snapshot_is_needed(net);
                false
            }
        }
    }

    fn parse_sync_data(
        &mut self,
        host: &mut dyn SceneHost,
        net: &mut dyn NetworkAdapter,
        payload: &[u8],
        received: &mut Snapshot,
    ) -> Result<(), SerdeErr> {
        let mut reader = BitReader::new(payload);
        if reader.remaining_bits() == 0 {
            return Ok(());
        }

        let input_id = InputId::de(&mut reader)?;
        if self.player_controller.is_some() {
            received.input_id = input_id;
        }

        let has_active_list = bool::de(&mut reader)?;
        let mut active_objects = Vec::new();
        if has_active_list {
            loop {
                let id = ObjectNetId::de(&mut reader)?;
                if id.is_none() {
                    break;
                }
                active_objects.push(id);
            }
        }

        if bool::de(&mut reader)? {
            received.has_custom_data = true;
            received.custom_data = VarValue::de(&mut reader)?;
        }

        loop {
            let net_id = ObjectNetId::de(&mut reader)?;
            if net_id.is_none() {
                break;
            }

            let has_name = bool::de(&mut reader)?;
            let mut object_name = None;
            if has_name {
                let name = String::de(&mut reader)?;
                self.object_names.insert(net_id, name.clone());
                object_name = Some(name);
            }

            let local = self.resolve_snapshot_object(host, net, net_id, object_name);

            let vars_count = usize::from(u8::de(&mut reader)?);
            match local {
                None => {
                    // Unknown object: consume its variables and move on.
                    for _ in 0..vars_count {
                        if bool::de(&mut reader)? {
                            VarValue::de(&mut reader)?;
                        }
                    }
                }
                Some(local_id) => {
                    received.ensure_object_slot(net_id);
                    let local_var_len = self
                        .core
                        .store()
                        .get(local_id)
                        .map(|od| od.vars.len())
                        .unwrap_or(0);

                    for index in 0..vars_count {
                        if !bool::de(&mut reader)? {
                            continue;
                        }
                        let value = VarValue::de(&mut reader)?;
                        if index >= local_var_len {
                            warn!(
                                "snapshot carries variable {index} for net id {} but only \
                                 {local_var_len} are registered locally; dropping it",
                                net_id.0
                            );
                            continue;
                        }
                        let name = self
                            .core
                            .store()
                            .get(local_id)
                            .map(|od| od.vars[index].name.clone())
                            .unwrap_or_default();
                        received.set_var(net_id, VarId(index as u32), &name, value);
                    }
                }
            }
        }

        if has_active_list {
            received.active_object_ids = Some(active_objects.clone());
            self.apply_active_object_list(net, active_objects);
        }

        Ok(())
    }

    /// Resolves (or late-binds) the object a snapshot record refers to.
    fn resolve_snapshot_object(
        &mut self,
        host: &mut dyn SceneHost,
        net: &mut dyn NetworkAdapter,
        net_id: ObjectNetId,
        object_name: Option<String>,
    ) -> Option<ObjectLocalId> {
        if let Some(local) = self.core.store().local_id_of_net(net_id) {
            return Some(local);
        }

        let name = object_name.or_else(|| self.object_names.get(&net_id).cloned());
        let Some(name) = name else {
            warn!("object with net id {} is not known by this peer yet", net_id.0);
            self.notify_server_full_snapshot_is_needed(net);
            return None;
        };

        let Some(handle) = host.fetch_app_object(&name) else {
            warn!("the object `{name}` still doesn't exist on this peer");
            return None;
        };

        match self.core.register_object(host, handle) {
            Ok(local) => {
                if let Err(err) = self.core.store_mut().set_net_id(local, net_id) {
                    error!("failed binding net id {} to `{name}`: {err}", net_id.0);
                    return None;
                }
                self.core.reset_controller(local, net, false);
                self.refresh_player_controller();
                trace!("bound `{name}` to net id {}", net_id.0);
                Some(local)
            }
            Err(err) => {
                error!("object `{name}` resolved but could not be registered: {err}");
                None
            }
        }
    }

    fn apply_active_object_list(
        &mut self,
        net: &mut dyn NetworkAdapter,
        mut active_objects: Vec<ObjectNetId>,
    ) {
        let ids: Vec<(ObjectLocalId, ObjectNetId)> = self
            .core
            .store()
            .iter()
            .map(|od| (od.local_id(), od.net_id()))
            .collect();

        for (local, net_id) in ids {
            let is_active = match active_objects.iter().position(|id| *id == net_id) {
                Some(index) => {
                    active_objects.swap_remove(index);
                    true
                }
                None => false,
            };

            let store = self.core.store_mut();
            let mut activation_changed = false;
            if let Some(od) = store.get_mut(local) {
                if od.realtime_enabled != is_active {
                    od.realtime_enabled = is_active;
                    activation_changed = true;
                }
            }
            if activation_changed {
                store.mark_process_cache_dirty();
            }
            if is_active {
                // A realtime object cannot also be streaming.
                self.deferred.retain(|stream| stream.object != local);
            }
        }

        if !active_objects.is_empty() {
            error!(
                "the active-object list references {} objects this peer never registered; \
                 requesting a full snapshot",
                active_objects.len()
            );
            self.notify_server_full_snapshot_is_needed(net);
        }
    }

    fn store_controllers_snapshot(&mut self, snapshot: Snapshot) {
        if !snapshot.has_input_id() {
            if self.player_controller.is_some() {
                // No info for our controller in there; skip it.
                return;
            }
            trace!("received a server snapshot without input id");
            self.server_snapshots.clear();
            self.server_snapshots.push_back(snapshot);
            return;
        }

        if let Some(back) = self.server_snapshots.back_mut() {
            if snapshot.input_id == back.input_id {
                *back = snapshot;
            } else if snapshot.input_id < back.input_id {
                warn!(
                    "out-of-order server snapshot {} (last stored {}); ignoring it",
                    snapshot.input_id, back.input_id
                );
            } else {
                self.server_snapshots.push_back(snapshot);
            }
        } else {
            self.server_snapshots.push_back(snapshot);
        }
    }

    fn notify_server_full_snapshot_is_needed(&mut self, net: &mut dyn NetworkAdapter) {
        if self.need_full_snapshot_notified {
            return;
        }
        self.need_full_snapshot_notified = true;
        let server_peer = net.server_peer_id();
        net.send_need_full_snapshot(server_peer);
    }

    // ------------------------------------------------------- Reconciliation

    fn process_received_server_state(
        &mut self,
        host: &mut dyn SceneHost,
        net: &mut dyn NetworkAdapter,
        delta: f64,
    ) {
        if self.server_snapshots.is_empty() {
            return;
        }

        if !self.server_snapshots.back().unwrap().has_input_id() {
            // A no-input snapshot is simply the most up-to-date state.
            let snapshot = self.server_snapshots.back().unwrap().clone();
            self.apply_snapshot(host, &snapshot, NetEventFlag::SYNC_RECOVER, false);
            self.server_snapshots.clear();
            self.client_snapshots.clear();
            return;
        }

        if self.player_controller.is_none() {
            return;
        }

        if self.client_snapshots.is_empty() {
            // The local stream is paused; adopt the newest server state.
            self.process_paused_controller_recovery(host);
            return;
        }

        // The newest input id present in both queues.
        let mut checkable_input_id = NONE_INPUT_ID;
        'outer: for server_snapshot in self.server_snapshots.iter().rev() {
            for client_snapshot in &self.client_snapshots {
                if client_snapshot.input_id == server_snapshot.input_id {
                    checkable_input_id = client_snapshot.input_id;
                    break 'outer;
                }
            }
        }
        if checkable_input_id == NONE_INPUT_ID {
            return;
        }

        while self
            .server_snapshots
            .front()
            .map(|s| s.input_id < checkable_input_id)
            .unwrap_or(false)
        {
            self.server_snapshots.pop_front();
        }
        while self
            .client_snapshots
            .front()
            .map(|s| s.input_id < checkable_input_id)
            .unwrap_or(false)
        {
            self.client_snapshots.pop_front();
        }

        debug_assert_eq!(
            self.server_snapshots.front().map(|s| s.input_id),
            Some(checkable_input_id)
        );
        debug_assert_eq!(
            self.client_snapshots.front().map(|s| s.input_id),
            Some(checkable_input_id)
        );

        let compare = {
            let server_snapshot = self.server_snapshots.front().unwrap();
            let client_snapshot = self.client_snapshots.front().unwrap();
            let store = self.core.store();
            let host_ref: &dyn SceneHost = &*host;
            compare_snapshots(
                server_snapshot,
                client_snapshot,
                |net_id, var_id| {
                    store
                        .get_by_net(net_id)
                        .and_then(|od| od.vars.get(var_id.0 as usize))
                        .map(|var| var.skip_rewinding)
                        .unwrap_or(false)
                },
                |a, b| host_ref.compare(a, b),
            )
        };

        if !compare.is_equal {
            self.emit_desync_events(checkable_input_id, &compare.different_objects);
        }

        // The compared client snapshot is consumed either way.
        self.client_snapshots.pop_front();

        if !compare.is_equal {
            debug!("rewind needed at input {checkable_input_id}");
            let server_snapshot = self.server_snapshots.front().unwrap().clone();
            self.apply_snapshot(
                host,
                &server_snapshot,
                NetEventFlag::SYNC_RECOVER | NetEventFlag::SYNC_RESET,
                false,
            );
            self.rewind(host, net, delta, checkable_input_id);
        } else {
            if let Some(recover) = &compare.no_rewind_recover {
                // Partial snapshots never carry custom data.
                let recover = recover.clone();
                self.apply_snapshot(host, &recover, NetEventFlag::SYNC_RECOVER, true);
                if !self.client_snapshots.is_empty() {
                    let mut back = std::mem::take(self.client_snapshots.back_mut().unwrap());
                    self.update_client_snapshot(host, &mut back);
                    *self.client_snapshots.back_mut().unwrap() = back;
                }
            }
            self.core
                .events_mut()
                .push(SyncEvent::StateValidated {
                    input_id: checkable_input_id,
                });
            self.notify_controllers_input_checked(checkable_input_id);
        }

        self.server_snapshots.pop_front();
        self.last_checked_input = checkable_input_id;
    }

    /// Reset happened; replay every still-pending input deterministically,
    /// refreshing the matching client snapshots in place.
    fn rewind(
        &mut self,
        host: &mut dyn SceneHost,
        net: &mut dyn NetworkAdapter,
        delta: f64,
        checkable_input_id: InputId,
    ) {
        self.core
            .events_mut()
            .push(SyncEvent::StateValidated {
                input_id: checkable_input_id,
            });
        self.notify_controllers_input_checked(checkable_input_id);

        let Some(player_id) = self.player_controller else {
            return;
        };
        let remaining = self
            .core
            .store()
            .get(player_id)
            .and_then(|od| od.controller.as_ref())
            .map(|c| c.player_input_count())
            .unwrap_or(0);

        debug_assert_eq!(
            remaining,
            self.client_snapshots.len(),
            "the synchronizer and the player controller must hold the same history"
        );
        let count = remaining.min(self.client_snapshots.len());

        for index in 0..count {
            let input_id = self
                .core
                .store()
                .get(player_id)
                .and_then(|od| od.controller.as_ref())
                .and_then(|c| c.player_stored_input_id(index))
                .unwrap_or(NONE_INPUT_ID);

            self.core.events_mut().push(SyncEvent::RewindFrameBegin {
                input_id,
                index,
                count,
            });

            if let Some(od) = self.core.store_mut().get_mut(player_id) {
                if let Some(controller) = &mut od.controller {
                    if let Err(err) = controller.queue_instant(index) {
                        error!("rewind step {index} failed: {err}");
                        break;
                    }
                }
            }

            self.core
                .change_events_begin(NetEventFlag::SYNC_RECOVER | NetEventFlag::SYNC_REWIND);
            self.core.process_functions_execute(delta, net);
            let changes = self
                .core
                .detect_changes(host, NetEventFlag::SYNC_RECOVER | NetEventFlag::SYNC_REWIND);
            self.track_end_sync_changes(&changes);

            let mut snapshot = std::mem::take(&mut self.client_snapshots[index]);
            self.update_client_snapshot(host, &mut snapshot);
            self.client_snapshots[index] = snapshot;
        }
    }

    fn process_paused_controller_recovery(&mut self, host: &mut dyn SceneHost) {
        while self.server_snapshots.len() > 1 {
            self.server_snapshots.pop_front();
        }
        let snapshot = self.server_snapshots.front().unwrap().clone();
        debug!("paused controller recovery from snapshot {}", snapshot.input_id);
        self.apply_snapshot(host, &snapshot, NetEventFlag::SYNC_RECOVER, false);
        self.server_snapshots.pop_front();
    }

    /// Writes a snapshot onto the scene. Every differing variable is
    /// pushed into the host and announced on the change bus under `flag`.
    fn apply_snapshot(
        &mut self,
        host: &mut dyn SceneHost,
        snapshot: &Snapshot,
        flag: NetEventFlag,
        skip_custom_data: bool,
    ) {
        self.core.change_events_begin(flag);

        let mut applied: Vec<(ObjectLocalId, VarId, VarValue)> = Vec::new();

        for (index, object_vars) in snapshot.object_vars.iter().enumerate() {
            let Some(vars) = object_vars else {
                continue;
            };
            let net_id = ObjectNetId(index as u16);
            let Some(local) = self.core.store().local_id_of_net(net_id) else {
                // The server does not always sync every object; fine.
                continue;
            };

            let store = self.core.store_mut();
            let Some(od) = store.get_mut(local) else {
                continue;
            };
            if !od.realtime_enabled {
                continue;
            }
            let Some(handle) = od.handle else {
                continue;
            };

            for (var_index, snapshot_var) in vars.iter().enumerate() {
                if !snapshot_var.is_set() {
                    continue;
                }
                let Some(descriptor) = od.vars.get_mut(var_index) else {
                    continue;
                };

                let old_value =
                    std::mem::replace(&mut descriptor.value, snapshot_var.value.clone());
                if !host.compare(&old_value, &snapshot_var.value) {
                    host.set_variable(handle, &snapshot_var.name, &snapshot_var.value);
                    applied.push((local, VarId(var_index as u32), old_value));
                }
            }
        }

        for (local, var_id, old_value) in &applied {
            self.core.change_event_add(*local, *var_id, old_value);
        }
        if flag.intersects(NetEventFlag::SYNC) {
            let changes: Vec<netsync_shared::ChangedVar> = applied
                .iter()
                .map(|(object, var_id, old_value)| netsync_shared::ChangedVar {
                    object: *object,
                    var_id: *var_id,
                    old_value: old_value.clone(),
                })
                .collect();
            self.track_end_sync_changes(&changes);
        }

        if snapshot.has_custom_data && !skip_custom_data {
            host.snapshot_set_custom_data(&snapshot.custom_data);
        }

        self.core.change_events_flush();
    }

    /// Remembers the pre-sync value of every variable touched during
    /// recovery; END_SYNC later compares against the settled value.
    fn track_end_sync_changes(&mut self, changes: &[netsync_shared::ChangedVar]) {
        for change in changes {
            let Some(net_id) = self
                .core
                .store()
                .get(change.object)
                .map(|od| od.net_id())
                .filter(|id| !id.is_none())
            else {
                continue;
            };
            self.end_sync_events
                .entry((net_id.0, change.var_id.0))
                .or_insert_with(|| (change.object, change.old_value.clone()));
        }
    }

    /// Fires END_SYNC for every recovered variable whose settled value
    /// differs from its value when the sync began.
    fn signal_end_sync_changed_variables(&mut self, host: &mut dyn SceneHost) {
        if self.end_sync_events.is_empty() {
            return;
        }
        self.core.change_events_begin(NetEventFlag::END_SYNC);

        let events = std::mem::take(&mut self.end_sync_events);
        for ((_net, var), (object, old_value)) in events {
            let current = self
                .core
                .store()
                .get(object)
                .and_then(|od| od.vars.get(var as usize))
                .map(|descriptor| descriptor.value.clone());
            let Some(current) = current else {
                continue;
            };
            if !host.compare(&current, &old_value) {
                self.core.change_event_add(object, VarId(var), &old_value);
            }
        }

        self.core.change_events_flush();
    }

    fn emit_desync_events(&mut self, input_id: InputId, different_objects: &[ObjectNetId]) {
        for net_id in different_objects {
            let Some(local) = self.core.store().local_id_of_net(*net_id) else {
                continue;
            };

            let server_vars = self
                .server_snapshots
                .front()
                .and_then(|s| s.object(*net_id));
            let client_vars = self
                .client_snapshots
                .front()
                .and_then(|s| s.object(*net_id));
            let count = server_vars
                .map(|v| v.len())
                .unwrap_or(0)
                .max(client_vars.map(|v| v.len()).unwrap_or(0));

            let mut var_names = vec![String::new(); count];
            let mut server_values = vec![VarValue::Nil; count];
            let mut client_values = vec![VarValue::Nil; count];
            for index in 0..count {
                if let Some(var) = server_vars.and_then(|v| v.get(index)) {
                    if var.is_set() {
                        var_names[index] = var.name.clone();
                        server_values[index] = var.value.clone();
                    }
                }
                if let Some(var) = client_vars.and_then(|v| v.get(index)) {
                    if var.is_set() {
                        if var_names[index].is_empty() {
                            var_names[index] = var.name.clone();
                        }
                        client_values[index] = var.value.clone();
                    }
                }
            }

            self.core.events_mut().push(SyncEvent::DesyncDetected {
                input_id,
                object: local,
                var_names,
                client_values,
                server_values,
            });
        }
    }

    fn notify_controllers_input_checked(&mut self, input_id: InputId) {
        for object in self.core.store_mut().iter_mut() {
            if let Some(controller) = &mut object.controller {
                controller.notify_input_checked(input_id);
            }
        }
    }

    /// Keeps `player_controller` pointing at the one Player-role
    /// controller; any change flushes both snapshot queues.
    fn refresh_player_controller(&mut self) {
        let mut player = None;
        for object in self.core.store().iter() {
            if let Some(controller) = &object.controller {
                if controller.is_player() {
                    if player.is_some() {
                        error!(
                            "only one player controller is supported; `{}` is ignored",
                            object.object_name
                        );
                        continue;
                    }
                    player = Some(object.local_id());
                }
            }
        }

        if player != self.player_controller {
            self.player_controller = player;
            self.server_snapshots.clear();
            self.client_snapshots.clear();
        }
    }

    // ---------------------------------------------------------- Deferred sync

    /// Entry point for a deferred bulk payload (unreliable channel).
    pub fn receive_deferred_sync_data(&mut self, payload: &[u8]) {
        let mut reader = BitReader::new(payload);
        let epoch = match u32::de(&mut reader) {
            Ok(epoch) => epoch,
            Err(_) => {
                error!("deferred sync payload too short to carry an epoch; dropping it");
                return;
            }
        };

        loop {
            if reader.remaining_bits() < 1 {
                break;
            }
            let Ok(wide_id) = bool::de(&mut reader) else {
                break;
            };
            let net_id = if wide_id {
                match u16::de(&mut reader) {
                    Ok(id) => ObjectNetId(id),
                    Err(_) => break,
                }
            } else {
                match u8::de(&mut reader) {
                    Ok(id) => ObjectNetId(u16::from(id)),
                    Err(_) => break,
                }
            };

            let Ok(bit_count) = u16::de(&mut reader) else {
                break;
            };
            let bit_count = u32::from(bit_count);
            if reader.remaining_bits() < bit_count {
                error!(
                    "deferred buffer for net id {} declares {bit_count} bits but only {} \
                     remain; dropping the rest of the payload",
                    net_id.0,
                    reader.remaining_bits()
                );
                break;
            }

            let Ok(future_bytes) = reader.read_bits(bit_count) else {
                break;
            };

            let Some(local) = self.core.store().local_id_of_net(net_id) else {
                debug!("skipping deferred data for unknown net id {}", net_id.0);
                continue;
            };

            // Collect the current state as the past endpoint before the
            // future buffer replaces it.
            let mut past_writer = BitWriter::new();
            {
                let Some(od) = self.core.store_mut().get_mut(local) else {
                    continue;
                };
                let Some(collect) = od.collect_epoch.as_mut() else {
                    debug!(
                        "skipping deferred data for `{}`: no collect callback registered",
                        od.object_name
                    );
                    continue;
                };
                collect(&mut past_writer);
            }

            let stream = match self.deferred.iter_mut().find(|s| s.object == local) {
                Some(stream) => stream,
                None => {
                    self.deferred.push(DeferredStream::new(local));
                    self.deferred.last_mut().unwrap()
                }
            };
            stream.past_buffer = past_writer.to_bits();
            stream.seed(epoch, (future_bytes, bit_count));
        }
    }

    /// Advances every active stream's alpha and hands both epoch buffers
    /// to the host's apply callback.
    fn process_received_deferred_sync_data(&mut self, delta: f64) {
        let Self { core, deferred, .. } = self;

        for stream in deferred.iter_mut() {
            if stream.is_waiting() {
                continue;
            }

            let Some(od) = core.store_mut().get_mut(stream.object) else {
                continue;
            };
            let Some(apply) = od.apply_epoch.as_mut() else {
                error!(
                    "deferred object `{}` has no apply callback; \
                     use setup_deferred_sync on this peer too",
                    od.object_name
                );
                continue;
            };

            stream.alpha += stream.alpha_advance;
            let mut past = BitReader::with_bit_length(&stream.past_buffer.0, stream.past_buffer.1);
            let mut future =
                BitReader::with_bit_length(&stream.future_buffer.0, stream.future_buffer.1);
            apply(delta, stream.alpha, &mut past, &mut future);
        }
    }

    pub fn deferred_streams(&self) -> &[DeferredStream] {
        &self.deferred
    }
}
