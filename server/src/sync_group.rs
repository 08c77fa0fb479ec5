use std::collections::HashSet;

use thiserror::Error;

use netsync_shared::{ObjectLocalId, PeerId, SyncGroupId};

/// Errors that can occur during sync group operations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GroupError {
    /// The group id does not exist
    #[error("sync group {0} does not exist")]
    UnknownGroup(SyncGroupId),

    /// Group 0 holds every object and cannot be edited by the caller
    #[error("the global sync group is read-only; create a new group instead")]
    GlobalGroupImmutable,
}

/// What one group still has to tell its peers about one realtime object.
#[derive(Clone, Debug, Default)]
pub struct Change {
    /// The peers of this group have never been told about this object;
    /// the next snapshot must carry its name and full state.
    pub unknown: bool,
    /// Variable names changed since the last notified snapshot.
    pub vars: HashSet<String>,
}

impl Change {
    pub fn is_empty(&self) -> bool {
        !self.unknown && self.vars.is_empty()
    }
}

#[derive(Debug)]
pub struct RealtimeObjectInfo {
    pub id: ObjectLocalId,
    pub change: Change,
}

#[derive(Debug)]
pub struct DeferredObjectInfo {
    pub id: ObjectLocalId,
    /// Priority gained per tick while not emitted.
    pub update_rate: f64,
    /// Accumulated priority; emitted (and reset) at >= 1.0.
    pub update_priority: f64,
    /// The peers don't know this object's name yet.
    pub unknown: bool,
}

impl DeferredObjectInfo {
    fn new(id: ObjectLocalId, update_rate: f64) -> Self {
        Self {
            id,
            update_rate,
            update_priority: 0.0,
            unknown: true,
        }
    }
}

/// A set of peers sharing one view of a subset of objects. Realtime
/// members are delta-diffed and rolled back on clients; deferred members
/// are streamed as opaque epoch buffers and interpolated.
pub struct SyncGroup {
    realtime: Vec<RealtimeObjectInfo>,
    deferred: Vec<DeferredObjectInfo>,
    pub peers: Vec<PeerId>,
    pub state_notifier_timer: f64,
    realtime_list_changed: bool,
    deferred_list_changed: bool,
    pub user_data: u64,
}

impl Default for SyncGroup {
    fn default() -> Self {
        Self::new()
    }
}

impl SyncGroup {
    pub fn new() -> Self {
        Self {
            realtime: Vec::new(),
            deferred: Vec::new(),
            peers: Vec::new(),
            state_notifier_timer: 0.0,
            realtime_list_changed: false,
            deferred_list_changed: false,
            user_data: 0,
        }
    }

    pub fn realtime_objects(&self) -> &[RealtimeObjectInfo] {
        &self.realtime
    }

    pub fn deferred_objects(&self) -> &[DeferredObjectInfo] {
        &self.deferred
    }

    pub(crate) fn realtime_objects_mut(&mut self) -> &mut [RealtimeObjectInfo] {
        &mut self.realtime
    }

    pub(crate) fn deferred_objects_mut(&mut self) -> &mut [DeferredObjectInfo] {
        &mut self.deferred
    }

    pub fn contains(&self, id: ObjectLocalId) -> bool {
        self.realtime.iter().any(|info| info.id == id)
            || self.deferred.iter().any(|info| info.id == id)
    }

    /// Adds an object to one of the two subsets. An object never sits in
    /// both: adding to one side removes it from the other. Re-adding to
    /// the same side is a no-op.
    pub fn add_object(&mut self, id: ObjectLocalId, realtime: bool) {
        if realtime {
            if self.realtime.iter().any(|info| info.id == id) {
                return;
            }
            if let Some(index) = self.deferred.iter().position(|info| info.id == id) {
                self.deferred.remove(index);
                self.deferred_list_changed = true;
            }
            self.realtime.push(RealtimeObjectInfo {
                id,
                change: Change {
                    unknown: true,
                    vars: HashSet::new(),
                },
            });
            self.realtime_list_changed = true;
        } else {
            if self.deferred.iter().any(|info| info.id == id) {
                return;
            }
            if let Some(index) = self.realtime.iter().position(|info| info.id == id) {
                self.realtime.remove(index);
                self.realtime_list_changed = true;
            }
            self.deferred.push(DeferredObjectInfo::new(id, 1.0));
            self.deferred_list_changed = true;
        }
    }

    pub fn remove_object(&mut self, id: ObjectLocalId) {
        if let Some(index) = self.realtime.iter().position(|info| info.id == id) {
            self.realtime.remove(index);
            self.realtime_list_changed = true;
        }
        if let Some(index) = self.deferred.iter().position(|info| info.id == id) {
            self.deferred.remove(index);
            self.deferred_list_changed = true;
        }
    }

    /// Swaps in a whole new membership. Objects that survive on the same
    /// side keep their pending change record and deferred priority.
    pub fn replace_objects(
        &mut self,
        new_realtime: Vec<ObjectLocalId>,
        new_deferred: Vec<(ObjectLocalId, f64)>,
    ) {
        let old_realtime = std::mem::take(&mut self.realtime);
        let old_deferred = std::mem::take(&mut self.deferred);

        for id in new_realtime {
            match old_realtime.iter().position(|info| info.id == id) {
                Some(index) => self.realtime.push(RealtimeObjectInfo {
                    id,
                    change: old_realtime[index].change.clone(),
                }),
                None => self.realtime.push(RealtimeObjectInfo {
                    id,
                    change: Change {
                        unknown: true,
                        vars: HashSet::new(),
                    },
                }),
            }
        }

        for (id, rate) in new_deferred {
            match old_deferred.iter().find(|info| info.id == id) {
                Some(old) => self.deferred.push(DeferredObjectInfo {
                    id,
                    update_rate: rate,
                    update_priority: old.update_priority,
                    unknown: old.unknown,
                }),
                None => self.deferred.push(DeferredObjectInfo::new(id, rate)),
            }
        }

        self.realtime_list_changed = true;
        self.deferred_list_changed = true;
    }

    pub fn remove_all_objects(&mut self) {
        if !self.realtime.is_empty() {
            self.realtime.clear();
            self.realtime_list_changed = true;
        }
        if !self.deferred.is_empty() {
            self.deferred.clear();
            self.deferred_list_changed = true;
        }
    }

    pub fn set_deferred_update_rate(&mut self, id: ObjectLocalId, rate: f64) {
        if let Some(info) = self.deferred.iter_mut().find(|info| info.id == id) {
            info.update_rate = rate;
        }
    }

    pub fn deferred_update_rate(&self, id: ObjectLocalId) -> Option<f64> {
        self.deferred
            .iter()
            .find(|info| info.id == id)
            .map(|info| info.update_rate)
    }

    /// A freshly registered variable must reach the peers even if its
    /// value never changes again.
    pub fn notify_new_variable(&mut self, id: ObjectLocalId, var_name: &str) {
        if let Some(info) = self.realtime.iter_mut().find(|info| info.id == id) {
            info.change.vars.insert(var_name.to_string());
        }
    }

    pub fn notify_variable_changed(&mut self, id: ObjectLocalId, var_name: &str) {
        if let Some(info) = self.realtime.iter_mut().find(|info| info.id == id) {
            info.change.vars.insert(var_name.to_string());
        }
    }

    /// The notified state is the new checkpoint: the next delta carries
    /// only what changes from here on.
    pub fn mark_changes_notified(&mut self) {
        for info in &mut self.realtime {
            info.change.unknown = false;
            info.change.vars.clear();
        }
        for info in &mut self.deferred {
            info.unknown = false;
        }
        self.realtime_list_changed = false;
        self.deferred_list_changed = false;
    }

    pub fn is_realtime_list_changed(&self) -> bool {
        self.realtime_list_changed
    }

    pub fn is_deferred_list_changed(&self) -> bool {
        self.deferred_list_changed
    }

    /// Highest accumulated priority first, so the per-update cap cuts off
    /// the least starved objects.
    pub fn sort_deferred_by_update_priority(&mut self) {
        self.deferred.sort_by(|a, b| {
            b.update_priority
                .partial_cmp(&a.update_priority)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
    }
}
