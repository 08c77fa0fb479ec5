//! The engine base shared by the server and client synchronizers: object
//! registry, variable tracking, change detection, the change-event bus,
//! process-function dispatch and the peer table.

use std::collections::BTreeMap;

use log::{trace, warn};
use netsync_serde::{BitReader, BitWriter};

use crate::config::SyncConfig;
use crate::controller::RoleKind;
use crate::event::SyncEvent;
use crate::event_flag::NetEventFlag;
use crate::host::{NetworkAdapter, ObjectHandle, SceneHost};
use crate::listener::{ListenerError, ListenerHandle, ListenerStore};
use crate::object::{
    ObjectData, ObjectDataStore, ProcessHandle, ProcessPhase, StoreError, VarDescriptor,
};
use crate::peer::PeerData;
use crate::types::{HostType, ObjectLocalId, PeerId, VarId};
use crate::value::VarValue;

/// One detected variable write, as handed back to the synchronizer that
/// asked for change detection.
#[derive(Clone, Debug)]
pub struct ChangedVar {
    pub object: ObjectLocalId,
    pub var_id: VarId,
    pub old_value: VarValue,
}

pub struct SceneCore {
    host_type: HostType,
    /// Only the server mints net ids; clients learn them from snapshots.
    generate_ids: bool,
    pub config: SyncConfig,
    store: ObjectDataStore,
    listeners: ListenerStore,
    event_flag: NetEventFlag,
    recover_in_progress: bool,
    reset_in_progress: bool,
    rewinding_in_progress: bool,
    end_sync_in_progress: bool,
    process_order: Vec<ObjectLocalId>,
    peers: BTreeMap<PeerId, PeerData>,
    peer_dirty: bool,
    events: Vec<SyncEvent>,
    next_process_handle: u32,
}

impl SceneCore {
    pub fn new(host_type: HostType) -> Self {
        Self {
            host_type,
            generate_ids: host_type == HostType::Server,
            config: SyncConfig::default(),
            store: ObjectDataStore::new(),
            listeners: ListenerStore::new(),
            event_flag: NetEventFlag::EMPTY,
            recover_in_progress: false,
            reset_in_progress: false,
            rewinding_in_progress: false,
            end_sync_in_progress: false,
            process_order: Vec::new(),
            peers: BTreeMap::new(),
            peer_dirty: false,
            events: Vec::new(),
            next_process_handle: 0,
        }
    }

    pub fn host_type(&self) -> HostType {
        self.host_type
    }

    pub fn store(&self) -> &ObjectDataStore {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut ObjectDataStore {
        &mut self.store
    }

    pub fn events_mut(&mut self) -> &mut Vec<SyncEvent> {
        &mut self.events
    }

    pub fn take_events(&mut self) -> Vec<SyncEvent> {
        std::mem::take(&mut self.events)
    }

    // ---------------------------------------------------------- Registration

    /// Registers a host object for synchronization. Registering the same
    /// handle twice returns the existing id.
    pub fn register_object(
        &mut self,
        host: &mut dyn SceneHost,
        handle: ObjectHandle,
    ) -> Result<ObjectLocalId, StoreError> {
        if let Some(existing) = self.store.find_by_handle(handle) {
            return Ok(existing);
        }

        let name = host.object_name(handle);
        let instance_id = host.object_id(handle);
        let local_id = self.store.allocate(name.clone(), handle, instance_id)?;

        if self.generate_ids {
            let net_id = self.store.generate_net_id()?;
            self.store.set_net_id(local_id, net_id)?;
            trace!("registered `{name}` as net id {}", net_id.0);
        } else {
            trace!("registered `{name}` awaiting a net id");
        }

        if let Some((driver, config)) = host.extract_controller(handle) {
            let object = self.store.get_mut(local_id).expect("just allocated");
            object.controller = Some(crate::controller::ControllerCore::new(driver, config));
            self.peer_dirty = true;
        }

        Ok(local_id)
    }

    /// Unregisters and returns the object. Listener back-references are
    /// nulled in place so surviving listeners keep their value ordering.
    pub fn unregister_object(&mut self, id: ObjectLocalId) -> Option<ObjectData> {
        let object = self.store.deallocate(id)?;
        self.listeners.detach_object(id);
        if object.controller.is_some() {
            self.peer_dirty = true;
        }
        Some(object)
    }

    /// Starts tracking a variable. Ids are dense insertion indices; a
    /// re-registered variable is re-enabled under its old id.
    pub fn register_variable(
        &mut self,
        host: &mut dyn SceneHost,
        id: ObjectLocalId,
        name: &str,
    ) -> Result<VarId, StoreError> {
        let object = self
            .store
            .get_mut(id)
            .ok_or(StoreError::UnknownObject(id))?;

        if let Some(var_id) = object.find_variable_id(name) {
            object.vars[var_id.0 as usize].enabled = true;
            return Ok(var_id);
        }

        let handle = object.handle.ok_or(StoreError::UnknownObject(id))?;
        let initial = match host.get_variable(handle, name) {
            Some(value) => value,
            None => {
                warn!(
                    "variable `{name}` not found on `{}`; tracking it as Nil",
                    object.object_name
                );
                VarValue::Nil
            }
        };

        let var_id = VarId(object.vars.len() as u32);
        object.vars.push(VarDescriptor {
            id: var_id,
            name: name.to_string(),
            value: initial,
            enabled: true,
            skip_rewinding: false,
            listeners: Vec::new(),
        });

        debug_assert!(object
            .vars
            .iter()
            .enumerate()
            .all(|(index, var)| var.id.0 as usize == index));

        Ok(var_id)
    }

    /// Never removes the descriptor: variable order is load-bearing.
    pub fn unregister_variable(
        &mut self,
        id: ObjectLocalId,
        name: &str,
    ) -> Result<(), StoreError> {
        let object = self
            .store
            .get_mut(id)
            .ok_or(StoreError::UnknownObject(id))?;
        let var_id = object
            .find_variable_id(name)
            .ok_or_else(|| StoreError::UnknownVariable {
                object: id,
                variable: name.to_string(),
            })?;

        let var = &mut object.vars[var_id.0 as usize];
        var.enabled = false;
        var.listeners.clear();
        self.listeners.detach_variable(id, var_id);
        Ok(())
    }

    pub fn set_skip_rewinding(
        &mut self,
        id: ObjectLocalId,
        name: &str,
        skip: bool,
    ) -> Result<(), StoreError> {
        let object = self
            .store
            .get_mut(id)
            .ok_or(StoreError::UnknownObject(id))?;
        let var_id = object
            .find_variable_id(name)
            .ok_or_else(|| StoreError::UnknownVariable {
                object: id,
                variable: name.to_string(),
            })?;
        object.vars[var_id.0 as usize].skip_rewinding = skip;
        Ok(())
    }

    pub fn setup_deferred_sync(
        &mut self,
        id: ObjectLocalId,
        collect: Box<dyn FnMut(&mut BitWriter)>,
        apply: Box<dyn FnMut(f64, f64, &mut BitReader, &mut BitReader)>,
    ) -> Result<(), StoreError> {
        let object = self
            .store
            .get_mut(id)
            .ok_or(StoreError::UnknownObject(id))?;
        object.collect_epoch = Some(collect);
        object.apply_epoch = Some(apply);
        Ok(())
    }

    // -------------------------------------------------------------- Listeners

    pub fn track_variable_changes(
        &mut self,
        watches: Vec<(ObjectLocalId, String)>,
        flags: NetEventFlag,
        callback: Box<dyn FnMut(&[VarValue])>,
    ) -> Result<ListenerHandle, ListenerError> {
        if watches.is_empty() {
            return Err(ListenerError::MismatchedWatchLists {
                objects: 0,
                variables: 0,
            });
        }

        let mut resolved = Vec::with_capacity(watches.len());
        for (object, variable) in &watches {
            let od = self
                .store
                .get(*object)
                .ok_or(ListenerError::UnknownObject(*object))?;
            let var_id =
                od.find_variable_id(variable)
                    .ok_or_else(|| ListenerError::UnknownVariable {
                        object: *object,
                        variable: variable.clone(),
                    })?;
            resolved.push((*object, var_id));
        }

        let handle = self.listeners.insert(flags, resolved.clone(), callback);
        for (object, var_id) in resolved {
            let od = self.store.get_mut(object).expect("validated above");
            od.vars[var_id.0 as usize].listeners.push(handle);
        }
        Ok(handle)
    }

    pub fn untrack_variable_changes(&mut self, handle: ListenerHandle) {
        if self.listeners.remove(handle).is_none() {
            return;
        }
        for object in self.store.iter_mut() {
            for var in &mut object.vars {
                var.listeners.retain(|h| *h != handle);
            }
        }
    }

    // ------------------------------------------------------ Process functions

    pub fn register_process(
        &mut self,
        id: ObjectLocalId,
        phase: ProcessPhase,
        func: Box<dyn FnMut(f64)>,
    ) -> Result<ProcessHandle, StoreError> {
        let handle = ProcessHandle(self.next_process_handle);
        self.next_process_handle += 1;

        let object = self
            .store
            .get_mut(id)
            .ok_or(StoreError::UnknownObject(id))?;
        object.functions[phase.index()].push(crate::object::ProcessFunction { handle, func });
        self.store.mark_process_cache_dirty();
        Ok(handle)
    }

    pub fn unregister_process(
        &mut self,
        id: ObjectLocalId,
        phase: ProcessPhase,
        handle: ProcessHandle,
    ) -> Result<(), StoreError> {
        let object = self
            .store
            .get_mut(id)
            .ok_or(StoreError::UnknownObject(id))?;
        object.functions[phase.index()].retain(|f| f.handle != handle);
        self.store.mark_process_cache_dirty();
        Ok(())
    }

    /// Runs one simulation (sub-)tick: every phase in order, every object
    /// in net-id order, controllers at the head of the `Process` phase.
    /// On clients, objects with realtime sync disabled are skipped.
    pub fn process_functions_execute(
        &mut self,
        delta: f64,
        net: &mut dyn NetworkAdapter,
    ) {
        if self.store.take_process_cache_dirty() {
            self.rebuild_process_order();
        }

        let is_client = self.host_type == HostType::Client;
        for phase in ProcessPhase::ALL {
            for index in 0..self.process_order.len() {
                let id = self.process_order[index];
                let Some(object) = self.store.get_mut(id) else {
                    continue;
                };
                if is_client && !object.realtime_enabled {
                    continue;
                }

                if phase == ProcessPhase::Process {
                    if let Some(controller) = &mut object.controller {
                        controller.process(delta, net, &mut self.events);
                    }
                }

                for function in &mut object.functions[phase.index()] {
                    (function.func)(delta);
                }
            }
        }
    }

    /// Deterministic cross-peer order: net-id order first, then objects
    /// still waiting for a net id in insertion order.
    fn rebuild_process_order(&mut self) {
        self.process_order.clear();
        self.process_order.extend(self.store.net_ordered_ids());
        for object in self.store.iter() {
            if object.net_id().is_none() {
                self.process_order.push(object.local_id());
            }
        }
    }

    // --------------------------------------------------------- Change events

    pub fn change_events_begin(&mut self, flag: NetEventFlag) {
        debug_assert!(!self.recover_in_progress);
        debug_assert!(!self.reset_in_progress);
        debug_assert!(!self.rewinding_in_progress);
        debug_assert!(!self.end_sync_in_progress);

        self.event_flag = flag;
        self.recover_in_progress = NetEventFlag::SYNC.intersects(flag);
        self.reset_in_progress = NetEventFlag::SYNC_RESET.intersects(flag);
        self.rewinding_in_progress = NetEventFlag::SYNC_REWIND.intersects(flag);
        self.end_sync_in_progress = NetEventFlag::END_SYNC.intersects(flag);
    }

    pub fn change_event_add(&mut self, object: ObjectLocalId, var_id: VarId, old: &VarValue) {
        let Some(od) = self.store.get(object) else {
            return;
        };
        let Some(var) = od.vars.get(var_id.0 as usize) else {
            return;
        };
        if var.listeners.is_empty() {
            return;
        }
        let handles = var.listeners.clone();
        self.listeners
            .record_change(&handles, self.event_flag, object, var_id, old);
    }

    pub fn change_events_flush(&mut self) {
        let store = &self.store;
        self.listeners.flush(|object, var_id| {
            store
                .get(object)
                .and_then(|od| od.vars.get(var_id.0 as usize))
                .map(|var| var.value.clone())
                .unwrap_or(VarValue::Nil)
        });

        self.recover_in_progress = false;
        self.reset_in_progress = false;
        self.rewinding_in_progress = false;
        self.end_sync_in_progress = false;
        self.event_flag = NetEventFlag::EMPTY;
    }

    /// Diffs every enabled variable against the host's current value,
    /// stores the new values, dispatches listeners, and returns what
    /// changed so the synchronizer can feed groups or end-sync tracking.
    pub fn detect_changes(
        &mut self,
        host: &mut dyn SceneHost,
        flag: NetEventFlag,
    ) -> Vec<ChangedVar> {
        if self.event_flag != flag {
            self.change_events_begin(flag);
        }

        let mut changes = Vec::new();
        for object in self.store.iter_mut() {
            let Some(handle) = object.handle else {
                continue;
            };
            let object_local_id = object.local_id();
            for var in object.vars.iter_mut().filter(|var| var.enabled) {
                let Some(current) = host.get_variable(handle, &var.name) else {
                    continue;
                };
                if !host.compare(&current, &var.value) {
                    let old_value = std::mem::replace(&mut var.value, current);
                    changes.push(ChangedVar {
                        object: object_local_id,
                        var_id: var.id,
                        old_value,
                    });
                }
            }
        }

        for change in &changes {
            self.change_event_add(change.object, change.var_id, &change.old_value);
        }
        self.change_events_flush();
        changes
    }

    pub fn is_recovered(&self) -> bool {
        self.recover_in_progress
    }

    pub fn is_resetted(&self) -> bool {
        self.reset_in_progress
    }

    pub fn is_rewinding(&self) -> bool {
        self.rewinding_in_progress
    }

    pub fn is_end_sync(&self) -> bool {
        self.end_sync_in_progress
    }

    // ---------------------------------------------------------------- Peers

    pub fn on_peer_connected(&mut self, peer: PeerId) {
        self.peers.entry(peer).or_default();
        self.peer_dirty = true;
    }

    pub fn on_peer_disconnected(&mut self, peer: PeerId) {
        self.peers.remove(&peer);
        self.peer_dirty = true;
    }

    pub fn peers(&self) -> &BTreeMap<PeerId, PeerData> {
        &self.peers
    }

    pub fn peer_mut(&mut self, peer: PeerId) -> Option<&mut PeerData> {
        self.peers.get_mut(&peer)
    }

    pub fn dirty_peers(&mut self) {
        self.peer_dirty = true;
    }

    pub fn controller_of_peer(&self, peer: PeerId) -> Option<ObjectLocalId> {
        self.peers.get(&peer).and_then(|pd| pd.controller_id)
    }

    /// Rebinds dirty controllers to peers by authority and resets every
    /// controller whose role no longer matches where it lives.
    pub fn update_peers(&mut self, net: &mut dyn NetworkAdapter) {
        if !self.peer_dirty {
            return;
        }
        self.peer_dirty = false;

        let controller_ids: Vec<ObjectLocalId> = self
            .store
            .iter()
            .filter(|od| od.controller.is_some())
            .map(|od| od.local_id())
            .collect();

        for pd in self.peers.values_mut() {
            pd.controller_id = None;
        }

        for id in controller_ids {
            let authority = {
                let object = self.store.get(id).expect("listed above");
                net.authority_of(&object.object_name)
            };

            let mut peer_enabled = false;
            if let Some(peer) = authority {
                if let Some(pd) = self.peers.get_mut(&peer) {
                    pd.controller_id = Some(id);
                    peer_enabled = pd.enabled;
                }
            }

            let object = self.store.get_mut(id).expect("listed above");
            if let Some(controller) = &mut object.controller {
                controller.peer = authority;
                controller.set_peer_enabled(peer_enabled);
            }
            self.reset_controller(id, net, false);
        }

        let statuses: Vec<SyncEvent> = self
            .peers
            .iter()
            .map(|(peer, pd)| SyncEvent::PeerStatusUpdated {
                peer: *peer,
                controller: pd.controller_id,
                connected: true,
                enabled: pd.enabled,
            })
            .collect();
        self.events.extend(statuses);
    }

    /// Recreates the role value when the computed role differs (or when
    /// forced, e.g. on a `server_controlled` toggle).
    pub fn reset_controller(
        &mut self,
        id: ObjectLocalId,
        net: &mut dyn NetworkAdapter,
        force: bool,
    ) {
        let local_peer = net.local_peer_id();
        let host_type = self.host_type;

        let Some(object) = self.store.get_mut(id) else {
            return;
        };
        let Some(controller) = &mut object.controller else {
            return;
        };

        let kind = match host_type {
            HostType::NoNetwork => RoleKind::NoNet,
            HostType::Server => {
                if controller.config.server_controlled {
                    RoleKind::AutonomousServer
                } else {
                    RoleKind::Server
                }
            }
            HostType::Client => {
                if controller.peer == Some(local_peer) && !controller.config.server_controlled {
                    RoleKind::Player
                } else {
                    RoleKind::Doll
                }
            }
        };

        if force || controller.role_kind() != kind {
            controller.reset_role(kind);
            trace!(
                "controller `{}` now runs as {:?}",
                object.object_name,
                kind
            );
            self.events.push(SyncEvent::ControllerReset { object: id });
        }
    }

    /// Flips `server_controlled` and rebuilds the role. On the server the
    /// new value travels to the clients with the next snapshot cycle via
    /// the transport's reliable channel.
    pub fn set_server_controlled(
        &mut self,
        id: ObjectLocalId,
        net: &mut dyn NetworkAdapter,
        server_controlled: bool,
    ) {
        let Some(object) = self.store.get_mut(id) else {
            return;
        };
        let Some(controller) = &mut object.controller else {
            return;
        };
        if controller.config.server_controlled == server_controlled {
            return;
        }
        controller.config.server_controlled = server_controlled;
        self.reset_controller(id, net, true);
        self.dirty_peers();
    }
}
