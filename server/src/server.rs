use log::{error, trace, warn};

use netsync_serde::{BitWriter, Serde};
use netsync_shared::scene::SceneCore;
use netsync_shared::{
    BitWrite, Epoch, HostType, NetEventFlag, NetworkAdapter, ObjectData, ObjectHandle,
    ObjectLocalId, ObjectNetId, PeerId, SceneHost, SyncEvent, SyncGroupId, SyncGroups, Timestamp,
    VarId, GLOBAL_SYNC_GROUP_ID, NONE_INPUT_ID,
};

use crate::sync_group::{Change, GroupError, SyncGroup};

/// Bits one deferred epoch buffer may occupy on the wire.
const MAX_DEFERRED_BUFFER_BITS: u32 = u16::MAX as u32;

#[derive(Clone, Copy, PartialEq, Eq)]
enum SnapshotGenerationMode {
    /// Net id plus the changed variables.
    Normal,
    /// Name binding only, no variable values (deferred objects).
    ForceNameOnly,
    /// Everything, no matter what.
    ForceFull,
}

/// The authoritative synchronizer. Owns the scene core and the sync
/// groups; one instance lives on the server for the whole session.
pub struct ServerSynchronizer {
    core: SceneCore,
    groups: Vec<SyncGroup>,
    relevancy_timer: f64,
    epoch: Epoch,
}

impl Default for ServerSynchronizer {
    fn default() -> Self {
        Self::new()
    }
}

impl ServerSynchronizer {
    pub fn new() -> Self {
        Self {
            core: SceneCore::new(HostType::Server),
            // Group 0 is the implicit global group holding every object.
            groups: vec![SyncGroup::new()],
            relevancy_timer: 0.0,
            epoch: 0,
        }
    }

    pub fn core(&self) -> &SceneCore {
        &self.core
    }

    pub fn core_mut(&mut self) -> &mut SceneCore {
        &mut self.core
    }

    pub fn epoch(&self) -> Epoch {
        self.epoch
    }

    pub fn take_events(&mut self) -> Vec<SyncEvent> {
        self.core.take_events()
    }

    // ---------------------------------------------------------- Registration

    /// Registers a host object; the net id is minted here and never
    /// changes for the object's lifetime. The object joins the global
    /// group as realtime.
    pub fn register_object(
        &mut self,
        host: &mut dyn SceneHost,
        net: &mut dyn NetworkAdapter,
        handle: ObjectHandle,
    ) -> Result<ObjectLocalId, netsync_shared::StoreError> {
        let id = self.core.register_object(host, handle)?;
        self.groups[GLOBAL_SYNC_GROUP_ID as usize].add_object(id, true);

        let is_controller = self
            .core
            .store()
            .get(id)
            .map(|od| od.controller.is_some())
            .unwrap_or(false);
        if is_controller {
            self.core.reset_controller(id, net, false);
            // The owning peer must get a full snapshot carrying this
            // controller as soon as it is known.
            let authority = self
                .core
                .store()
                .get(id)
                .and_then(|od| net.authority_of(&od.object_name));
            if let Some(peer) = authority {
                if let Some(pd) = self.core.peer_mut(peer) {
                    pd.force_notify_snapshot = true;
                    pd.need_full_snapshot = true;
                }
            }
        }
        Ok(id)
    }

    pub fn unregister_object(&mut self, id: ObjectLocalId) -> Option<ObjectData> {
        for group in &mut self.groups {
            group.remove_object(id);
        }
        self.core.unregister_object(id)
    }

    pub fn register_variable(
        &mut self,
        host: &mut dyn SceneHost,
        id: ObjectLocalId,
        name: &str,
    ) -> Result<VarId, netsync_shared::StoreError> {
        let var_id = self.core.register_variable(host, id, name)?;
        for group in &mut self.groups {
            group.notify_new_variable(id, name);
        }
        Ok(var_id)
    }

    pub fn unregister_variable(
        &mut self,
        id: ObjectLocalId,
        name: &str,
    ) -> Result<(), netsync_shared::StoreError> {
        self.core.unregister_variable(id, name)
    }

    // ---------------------------------------------------------------- Groups

    pub fn group(&self, group: SyncGroupId) -> Result<&SyncGroup, GroupError> {
        self.groups
            .get(group as usize)
            .ok_or(GroupError::UnknownGroup(group))
    }

    fn editable_group(&mut self, group: SyncGroupId) -> Result<&mut SyncGroup, GroupError> {
        if group == GLOBAL_SYNC_GROUP_ID {
            return Err(GroupError::GlobalGroupImmutable);
        }
        self.groups
            .get_mut(group as usize)
            .ok_or(GroupError::UnknownGroup(group))
    }

    pub fn try_sync_group_add_object(
        &mut self,
        object: ObjectLocalId,
        group: SyncGroupId,
        realtime: bool,
    ) -> Result<(), GroupError> {
        self.editable_group(group)?.add_object(object, realtime);
        Ok(())
    }

    pub fn try_sync_group_remove_object(
        &mut self,
        object: ObjectLocalId,
        group: SyncGroupId,
    ) -> Result<(), GroupError> {
        self.editable_group(group)?.remove_object(object);
        Ok(())
    }

    pub fn try_sync_group_replace_objects(
        &mut self,
        group: SyncGroupId,
        realtime: Vec<ObjectLocalId>,
        deferred: Vec<(ObjectLocalId, f64)>,
    ) -> Result<(), GroupError> {
        self.editable_group(group)?
            .replace_objects(realtime, deferred);
        Ok(())
    }

    pub fn try_sync_group_move_peer_to(
        &mut self,
        peer: PeerId,
        group: SyncGroupId,
    ) -> Result<(), GroupError> {
        if group as usize >= self.groups.len() {
            return Err(GroupError::UnknownGroup(group));
        }

        for g in &mut self.groups {
            g.peers.retain(|p| *p != peer);
        }
        self.groups[group as usize].peers.push(peer);

        let controller_id = self.core.controller_of_peer(peer);
        if let Some(pd) = self.core.peer_mut(peer) {
            pd.sync_group = group;
            // A new group is a new world: start it from a full snapshot.
            pd.force_notify_snapshot = true;
            pd.need_full_snapshot = true;
        }

        // The peer's own controller always rides along.
        if group != GLOBAL_SYNC_GROUP_ID {
            if let Some(id) = controller_id {
                self.groups[group as usize].add_object(id, true);
            }
        }
        Ok(())
    }

    pub fn sync_group_peers(&self, group: SyncGroupId) -> Result<&[PeerId], GroupError> {
        Ok(&self.group(group)?.peers)
    }

    pub fn sync_group_set_user_data(
        &mut self,
        group: SyncGroupId,
        user_data: u64,
    ) -> Result<(), GroupError> {
        self.groups
            .get_mut(group as usize)
            .ok_or(GroupError::UnknownGroup(group))?
            .user_data = user_data;
        Ok(())
    }

    pub fn sync_group_user_data(&self, group: SyncGroupId) -> Result<u64, GroupError> {
        Ok(self.group(group)?.user_data)
    }

    // ----------------------------------------------------------- Peer state

    pub fn on_peer_connected(&mut self, peer: PeerId) {
        self.core.on_peer_connected(peer);
        for group in &mut self.groups {
            group.peers.retain(|p| *p != peer);
        }
        self.groups[GLOBAL_SYNC_GROUP_ID as usize].peers.push(peer);
        if let Some(pd) = self.core.peer_mut(peer) {
            pd.force_notify_snapshot = true;
            pd.need_full_snapshot = true;
        }
    }

    pub fn on_peer_disconnected(&mut self, peer: PeerId) {
        self.core.on_peer_disconnected(peer);
        for group in &mut self.groups {
            group.peers.retain(|p| *p != peer);
        }
    }

    /// Toggles whether a peer is allowed to simulate; the decision is
    /// pushed to the peer and announced to everyone else.
    pub fn set_peer_networking_enable(
        &mut self,
        net: &mut dyn NetworkAdapter,
        peer: PeerId,
        enabled: bool,
    ) {
        let Some(pd) = self.core.peer_mut(peer) else {
            warn!("set_peer_networking_enable: unknown peer {peer}");
            return;
        };
        if pd.enabled == enabled {
            return;
        }
        pd.enabled = enabled;
        pd.need_full_snapshot = enabled;
        pd.force_notify_snapshot = enabled;
        net.send_set_networking_enabled(peer, enabled);
        net.send_peer_status(peer, enabled);
        self.core.dirty_peers();
    }

    /// Hands input possession between the server AI and the owning
    /// client: the role flips here and the decision travels to every
    /// peer so their dolls and players flip too.
    pub fn set_server_controlled(
        &mut self,
        net: &mut dyn NetworkAdapter,
        id: ObjectLocalId,
        server_controlled: bool,
    ) {
        let net_id = match self.core.store().get(id) {
            Some(od) if !od.net_id().is_none() => od.net_id(),
            _ => {
                warn!("set_server_controlled: object {id:?} is not registered with a net id");
                return;
            }
        };
        self.core.set_server_controlled(id, net, server_controlled);
        let peers: Vec<PeerId> = self.core.peers().keys().copied().collect();
        for peer in peers {
            net.send_server_controlled(peer, net_id, server_controlled);
        }
    }

    /// A client lost sync and asked for a self-contained snapshot.
    pub fn receive_need_full_snapshot(&mut self, peer: PeerId) {
        if let Some(pd) = self.core.peer_mut(peer) {
            pd.need_full_snapshot = true;
            pd.force_notify_snapshot = true;
        }
    }

    /// An input packet arrived for the controller driven by `peer`.
    /// Returns true when at least one previously unseen input id landed.
    pub fn receive_inputs(&mut self, peer: PeerId, payload: &[u8]) -> bool {
        let Some(controller_id) = self.core.controller_of_peer(peer) else {
            warn!("received inputs from peer {peer} which drives no controller");
            return false;
        };
        let timestamp = Timestamp::now_ms();
        let core = &mut self.core;
        let Some(object) = core.store_mut().get_mut(controller_id) else {
            return false;
        };
        let Some(controller) = &mut object.controller else {
            return false;
        };
        let mut events = Vec::new();
        let newly_seen = controller.receive_inputs(payload, timestamp, &mut events);
        core.events_mut().extend(events);
        newly_seen
    }

    /// Marks every peer of the group for an immediate snapshot.
    pub fn force_state_notify(&mut self, group: SyncGroupId) -> Result<(), GroupError> {
        let peers = self.group(group)?.peers.clone();
        for peer in peers {
            if let Some(pd) = self.core.peer_mut(peer) {
                pd.force_notify_snapshot = true;
            }
        }
        Ok(())
    }

    pub fn force_state_notify_all(&mut self) {
        for group in 0..self.groups.len() as u32 {
            let _ = self.force_state_notify(group);
        }
    }

    pub fn dirty_peers(&mut self) {
        self.core.dirty_peers();
    }

    // --------------------------------------------------------------- Process

    /// One authoritative tick. The sequence is fixed: peer update,
    /// relevancy, epoch advance, process functions, change detection,
    /// snapshot notification, deferred streaming.
    pub fn process(&mut self, host: &mut dyn SceneHost, net: &mut dyn NetworkAdapter, delta: f64) {
        self.core.update_peers(net);

        if self.relevancy_timer >= self.core.config.objects_relevancy_update_time {
            host.update_objects_relevancy(self);
            self.relevancy_timer = 0.0;
        }
        self.relevancy_timer += delta;

        self.epoch = self.epoch.wrapping_add(1);

        self.core.process_functions_execute(delta, net);

        let changes = self.core.detect_changes(host, NetEventFlag::CHANGE);
        for change in &changes {
            let Some(name) = self
                .core
                .store()
                .get(change.object)
                .and_then(|od| od.vars.get(change.var_id.0 as usize))
                .map(|var| var.name.clone())
            else {
                continue;
            };
            for group in &mut self.groups {
                group.notify_variable_changed(change.object, &name);
            }
        }

        self.process_snapshot_notificator(host, net, delta);
        self.process_deferred_sync(net);
    }

    fn process_snapshot_notificator(
        &mut self,
        host: &mut dyn SceneHost,
        net: &mut dyn NetworkAdapter,
        delta: f64,
    ) {
        if self.core.peers().is_empty() {
            return;
        }
        let interval = self.core.config.server_notify_state_interval;

        for group_index in 0..self.groups.len() {
            if self.groups[group_index].peers.is_empty() {
                continue;
            }

            self.groups[group_index].state_notifier_timer += delta;
            let notify_state = self.groups[group_index].state_notifier_timer >= interval;
            if notify_state {
                self.groups[group_index].state_notifier_timer = 0.0;
            }

            // At most one full and one delta body per group, shared by
            // every peer that needs them.
            let mut full_body: Option<(Vec<u8>, u32)> = None;
            let mut delta_body: Option<(Vec<u8>, u32)> = None;

            let peers = self.groups[group_index].peers.clone();
            for peer in peers {
                let (send, need_full, controller_id) = {
                    let Some(pd) = self.core.peer_mut(peer) else {
                        error!(
                            "snapshot notificator found peer {peer} in group {group_index} \
                             without peer data; it was removed but never cleared from the group"
                        );
                        continue;
                    };
                    if !pd.force_notify_snapshot && !notify_state {
                        (false, false, None)
                    } else {
                        pd.force_notify_snapshot = false;
                        let need_full = pd.need_full_snapshot;
                        if need_full {
                            pd.need_full_snapshot = false;
                        }
                        (true, need_full, pd.controller_id)
                    }
                };
                if !send {
                    continue;
                }

                let input_id = controller_id
                    .and_then(|id| self.core.store().get(id))
                    .and_then(|od| od.controller.as_ref())
                    .map(|c| c.current_input_id())
                    .unwrap_or(NONE_INPUT_ID);

                let body = if need_full {
                    if full_body.is_none() {
                        full_body = Some(self.generate_snapshot(host, group_index, true));
                    }
                    full_body.as_ref().unwrap()
                } else {
                    if delta_body.is_none() {
                        delta_body = Some(self.generate_snapshot(host, group_index, false));
                    }
                    delta_body.as_ref().unwrap()
                };

                // The snapshot body is shared; the input id prefix is
                // this peer's own.
                let mut packet = BitWriter::new();
                input_id.ser(&mut packet);
                packet.write_bits(&body.0, body.1);
                net.send_state(peer, packet.to_bytes());

                if let Some(id) = controller_id {
                    if let Some(od) = self.core.store_mut().get_mut(id) {
                        if let Some(controller) = &mut od.controller {
                            controller.notify_send_state();
                        }
                    }
                }
            }

            if notify_state {
                self.groups[group_index].mark_changes_notified();
            }
        }
    }

    /// Serializes one snapshot body for a group: active-object list when
    /// membership changed, custom data, name-only records for unknown
    /// deferred objects, then every realtime object.
    fn generate_snapshot(
        &self,
        host: &mut dyn SceneHost,
        group_index: usize,
        force_full: bool,
    ) -> (Vec<u8>, u32) {
        let group = &self.groups[group_index];
        let mut writer = BitWriter::new();

        if group.is_realtime_list_changed() || force_full {
            true.ser(&mut writer);
            for info in group.realtime_objects() {
                let Some(od) = self.core.store().get(info.id) else {
                    continue;
                };
                debug_assert!(!od.net_id().is_none());
                od.net_id().ser(&mut writer);
            }
            ObjectNetId::NONE.ser(&mut writer);
        } else {
            false.ser(&mut writer);
        }

        match host.snapshot_get_custom_data(Some(group_index as SyncGroupId)) {
            Some(value) => {
                true.ser(&mut writer);
                value.ser(&mut writer);
            }
            None => false.ser(&mut writer),
        }

        if group.is_deferred_list_changed() || force_full {
            for info in group.deferred_objects() {
                if !(info.unknown || force_full) {
                    continue;
                }
                if let Some(od) = self.core.store().get(info.id) {
                    Self::generate_snapshot_object_data(
                        od,
                        SnapshotGenerationMode::ForceNameOnly,
                        &Change::default(),
                        &mut writer,
                    );
                }
            }
        }

        let mode = if force_full {
            SnapshotGenerationMode::ForceFull
        } else {
            SnapshotGenerationMode::Normal
        };
        for info in group.realtime_objects() {
            if let Some(od) = self.core.store().get(info.id) {
                Self::generate_snapshot_object_data(od, mode, &info.change, &mut writer);
            }
        }

        ObjectNetId::NONE.ser(&mut writer);
        writer.to_bits()
    }

    fn generate_snapshot_object_data(
        od: &ObjectData,
        mode: SnapshotGenerationMode,
        change: &Change,
        writer: &mut BitWriter,
    ) {
        if od.handle.is_none() || od.net_id().is_none() {
            return;
        }

        let force_using_name = mode != SnapshotGenerationMode::Normal;
        let force_variables = mode == SnapshotGenerationMode::ForceFull || change.unknown;
        let skip_variables = mode == SnapshotGenerationMode::ForceNameOnly;
        let has_changes = !change.vars.is_empty();

        od.net_id().ser(writer);

        // An unknown object always travels with its name: the peer has to
        // learn the binding before it can apply anything.
        if force_using_name || change.unknown {
            true.ser(writer);
            od.object_name.ser(writer);
        } else {
            false.ser(writer);
        }

        let allow_variables = force_variables || (has_changes && !skip_variables);

        // The count lets a client skip objects it cannot bind yet.
        debug_assert!(od.vars.len() <= usize::from(u8::MAX));
        (od.vars.len() as u8).ser(writer);

        for var in &od.vars {
            let mut has_value = allow_variables && var.enabled;
            if !force_variables && !change.vars.contains(&var.name) {
                // Delta snapshot and this variable did not change.
                has_value = false;
            }
            if skip_variables {
                has_value = false;
            }
            has_value.ser(writer);
            if has_value {
                var.value.ser(writer);
            }
        }
    }

    /// Streams deferred objects: per group, objects whose priority
    /// crossed 1.0 are collected into one epoch-prefixed buffer and
    /// broadcast unreliably.
    fn process_deferred_sync(&mut self, net: &mut dyn NetworkAdapter) {
        let Self {
            core,
            groups,
            epoch,
            ..
        } = self;
        let max_per_update = core.config.max_deferred_objects_per_update;

        for group in groups.iter_mut() {
            if group.peers.is_empty() || group.deferred_objects().is_empty() {
                continue;
            }

            group.sort_deferred_by_update_priority();

            let mut writer = BitWriter::new();
            epoch.ser(&mut writer);
            let mut update_count = 0usize;

            for info in group.deferred_objects_mut() {
                if info.update_priority < 1.0 || update_count >= max_per_update {
                    info.update_priority += info.update_rate;
                    continue;
                }

                let Some(od) = core.store_mut().get_mut(info.id) else {
                    continue;
                };
                let net_id = od.net_id();
                if net_id.is_none() {
                    continue;
                }
                let Some(collect) = od.collect_epoch.as_mut() else {
                    error!(
                        "deferred object `{}` has no collect callback; \
                         use setup_deferred_sync to initialize it",
                        od.object_name
                    );
                    info.update_priority += info.update_rate;
                    continue;
                };

                info.update_priority = 0.0;

                let mut tmp = BitWriter::new();
                collect(&mut tmp);
                let (bytes, bits) = tmp.to_bits();
                if bits > MAX_DEFERRED_BUFFER_BITS {
                    error!(
                        "deferred object `{}` collected {bits} bits, over the \
                         {MAX_DEFERRED_BUFFER_BITS}-bit cap; dropping this epoch",
                        od.object_name
                    );
                    continue;
                }

                update_count += 1;

                // Small ids ride in a byte.
                if net_id.0 > u16::from(u8::MAX) {
                    true.ser(&mut writer);
                    net_id.0.ser(&mut writer);
                } else {
                    false.ser(&mut writer);
                    (net_id.0 as u8).ser(&mut writer);
                }
                (bits as u16).ser(&mut writer);
                writer.write_bits(&bytes, bits);
            }

            if update_count > 0 {
                trace!("deferred epoch {} carries {update_count} objects", *epoch);
                let payload = writer.to_bytes();
                for peer in &group.peers {
                    net.send_deferred_data(*peer, payload.clone());
                }
            }
        }
    }
}

impl SyncGroups for ServerSynchronizer {
    fn sync_group_create(&mut self) -> SyncGroupId {
        let id = self.groups.len() as SyncGroupId;
        self.groups.push(SyncGroup::new());
        id
    }

    fn sync_group_add_object(&mut self, object: ObjectLocalId, group: SyncGroupId, realtime: bool) {
        if let Err(err) = self.try_sync_group_add_object(object, group, realtime) {
            warn!("sync_group_add_object: {err}");
        }
    }

    fn sync_group_remove_object(&mut self, object: ObjectLocalId, group: SyncGroupId) {
        if let Err(err) = self.try_sync_group_remove_object(object, group) {
            warn!("sync_group_remove_object: {err}");
        }
    }

    fn sync_group_remove_all_objects(&mut self, group: SyncGroupId) {
        match self.editable_group(group) {
            Ok(g) => g.remove_all_objects(),
            Err(err) => warn!("sync_group_remove_all_objects: {err}"),
        }
    }

    fn sync_group_move_peer_to(&mut self, peer: PeerId, group: SyncGroupId) {
        if let Err(err) = self.try_sync_group_move_peer_to(peer, group) {
            warn!("sync_group_move_peer_to: {err}");
        }
    }

    fn sync_group_set_deferred_update_rate(
        &mut self,
        object: ObjectLocalId,
        group: SyncGroupId,
        rate: f64,
    ) {
        match self.editable_group(group) {
            Ok(g) => g.set_deferred_update_rate(object, rate),
            Err(err) => warn!("sync_group_set_deferred_update_rate: {err}"),
        }
    }
}
