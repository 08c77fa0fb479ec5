use thiserror::Error;

use crate::event_flag::NetEventFlag;
use crate::types::{ObjectLocalId, VarId};
use crate::value::VarValue;

/// Errors that can occur while registering change listeners
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ListenerError {
    /// The watched object/variable lists must pair up one to one
    #[error("objects and variables must have the same non-zero length ({objects} vs {variables})")]
    MismatchedWatchLists { objects: usize, variables: usize },

    /// A watched object is not registered
    #[error("object {0:?} is not registered")]
    UnknownObject(ObjectLocalId),

    /// A watched variable does not exist on the object
    #[error("variable `{variable}` does not exist on object {object:?}")]
    UnknownVariable {
        object: ObjectLocalId,
        variable: String,
    },
}

/// Stable handle into the listener arena. Slots are never reused, so a
/// stale handle can only miss, never alias.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ListenerHandle(pub u32);

/// One variable watched by a listener. When the object or variable is
/// dropped the entry is nulled in place: ordering carries the meaning of
/// the old-values callback slice, so entries never move.
pub struct WatchedVar {
    pub object: Option<ObjectLocalId>,
    pub var_id: VarId,
    pub(crate) old_set: bool,
}

pub struct ChangesListener {
    pub flags: NetEventFlag,
    pub watching: Vec<WatchedVar>,
    old_values: Vec<VarValue>,
    emitted: bool,
    callback: Box<dyn FnMut(&[VarValue])>,
}

/// Arena of change listeners. Variables reference entries by stable index;
/// a removed listener leaves a `None` slot behind.
#[derive(Default)]
pub struct ListenerStore {
    entries: Vec<Option<ChangesListener>>,
}

impl ListenerStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(
        &mut self,
        flags: NetEventFlag,
        watching: Vec<(ObjectLocalId, VarId)>,
        callback: Box<dyn FnMut(&[VarValue])>,
    ) -> ListenerHandle {
        let old_values = vec![VarValue::Nil; watching.len()];
        let watching = watching
            .into_iter()
            .map(|(object, var_id)| WatchedVar {
                object: Some(object),
                var_id,
                old_set: false,
            })
            .collect();

        let handle = ListenerHandle(self.entries.len() as u32);
        self.entries.push(Some(ChangesListener {
            flags,
            watching,
            old_values,
            emitted: true,
            callback,
        }));
        handle
    }

    pub fn remove(&mut self, handle: ListenerHandle) -> Option<ChangesListener> {
        self.entries.get_mut(handle.0 as usize)?.take()
    }

    pub fn get(&self, handle: ListenerHandle) -> Option<&ChangesListener> {
        self.entries.get(handle.0 as usize)?.as_ref()
    }

    /// Nulls every watch entry pointing at `object`, preserving positions.
    pub fn detach_object(&mut self, object: ObjectLocalId) {
        for entry in self.entries.iter_mut().flatten() {
            for watched in &mut entry.watching {
                if watched.object == Some(object) {
                    watched.object = None;
                }
            }
        }
    }

    /// Nulls every watch entry pointing at one variable of `object`.
    pub fn detach_variable(&mut self, object: ObjectLocalId, var_id: VarId) {
        for entry in self.entries.iter_mut().flatten() {
            for watched in &mut entry.watching {
                if watched.object == Some(object) && watched.var_id == var_id {
                    watched.object = None;
                }
            }
        }
    }

    /// Records `old` into every listener attached to this variable whose
    /// mask intersects the current event mode. Marks the listener pending
    /// for the next `flush`.
    pub fn record_change(
        &mut self,
        handles: &[ListenerHandle],
        event_flag: NetEventFlag,
        object: ObjectLocalId,
        var_id: VarId,
        old: &VarValue,
    ) {
        for handle in handles {
            let Some(Some(listener)) = self.entries.get_mut(handle.0 as usize) else {
                continue;
            };

            if !listener.flags.intersects(event_flag) {
                continue;
            }

            listener.emitted = false;

            for (index, watched) in listener.watching.iter_mut().enumerate() {
                if watched.object == Some(object) && watched.var_id == var_id {
                    watched.old_set = true;
                    listener.old_values[index] = old.clone();
                }
            }
        }
    }

    /// Invokes every pending listener exactly once. Watched variables that
    /// were not individually observed this batch report their current
    /// value, fetched through `current_value`.
    pub fn flush(&mut self, mut current_value: impl FnMut(ObjectLocalId, VarId) -> VarValue) {
        for entry in self.entries.iter_mut().flatten() {
            if entry.emitted {
                continue;
            }
            entry.emitted = true;

            for (index, watched) in entry.watching.iter_mut().enumerate() {
                if !watched.old_set {
                    entry.old_values[index] = match watched.object {
                        Some(object) => current_value(object, watched.var_id),
                        None => VarValue::Nil,
                    };
                }
                watched.old_set = false;
            }

            (entry.callback)(&entry.old_values);
        }
    }
}
