use std::collections::HashMap;

use super::error::StoreError;
use super::object_data::ObjectData;
use crate::host::ObjectHandle;
use crate::types::{ObjectLocalId, ObjectNetId};

/// Exclusive owner of every ObjectData. All other structures reference
/// objects through stable ids, so index maps can never drift from the
/// objects themselves.
///
/// Two iteration orders are maintained: insertion order (process-function
/// dispatch) and net-id order (snapshot reconstruction).
#[derive(Default)]
pub struct ObjectDataStore {
    objects: Vec<Option<ObjectData>>,
    handle_index: HashMap<ObjectHandle, ObjectLocalId>,
    net_index: Vec<Option<ObjectLocalId>>,
    next_net_id: u16,
    /// Consumed by the scene core to rebuild the process-function order.
    process_cache_dirty: bool,
}

impl ObjectDataStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allocate(
        &mut self,
        object_name: String,
        handle: ObjectHandle,
        instance_id: u64,
    ) -> Result<ObjectLocalId, StoreError> {
        if self.handle_index.contains_key(&handle) {
            return Err(StoreError::AlreadyRegistered { name: object_name });
        }

        let local_id = ObjectLocalId(self.objects.len() as u32);
        self.objects.push(Some(ObjectData::new(
            local_id,
            object_name,
            handle,
            instance_id,
        )));
        self.handle_index.insert(handle, local_id);
        self.process_cache_dirty = true;
        Ok(local_id)
    }

    /// Local ids are never reused; the slot stays tombstoned.
    pub fn deallocate(&mut self, id: ObjectLocalId) -> Option<ObjectData> {
        let slot = self.objects.get_mut(id.0 as usize)?;
        let object = slot.take()?;

        if let Some(handle) = object.handle {
            self.handle_index.remove(&handle);
        }
        if !object.net_id().is_none() {
            if let Some(entry) = self.net_index.get_mut(object.net_id().0 as usize) {
                *entry = None;
            }
        }
        self.process_cache_dirty = true;
        Some(object)
    }

    pub fn find_by_handle(&self, handle: ObjectHandle) -> Option<ObjectLocalId> {
        self.handle_index.get(&handle).copied()
    }

    pub fn get(&self, id: ObjectLocalId) -> Option<&ObjectData> {
        self.objects.get(id.0 as usize)?.as_ref()
    }

    pub fn get_mut(&mut self, id: ObjectLocalId) -> Option<&mut ObjectData> {
        self.objects.get_mut(id.0 as usize)?.as_mut()
    }

    pub fn local_id_of_net(&self, net_id: ObjectNetId) -> Option<ObjectLocalId> {
        if net_id.is_none() {
            return None;
        }
        self.net_index.get(net_id.0 as usize).copied().flatten()
    }

    pub fn get_by_net(&self, net_id: ObjectNetId) -> Option<&ObjectData> {
        self.get(self.local_id_of_net(net_id)?)
    }

    pub fn get_by_net_mut(&mut self, net_id: ObjectNetId) -> Option<&mut ObjectData> {
        let local = self.local_id_of_net(net_id)?;
        self.get_mut(local)
    }

    /// Binds `net_id` to the object. Once a server assigns a net id it
    /// never changes; on clients a snapshot may assign it late.
    pub fn set_net_id(
        &mut self,
        id: ObjectLocalId,
        net_id: ObjectNetId,
    ) -> Result<(), StoreError> {
        if !net_id.is_none() {
            if let Some(owner) = self.local_id_of_net(net_id) {
                if owner != id {
                    return Err(StoreError::NetIdTaken { net_id, owner });
                }
                return Ok(());
            }
        }

        let object = self
            .objects
            .get_mut(id.0 as usize)
            .and_then(|slot| slot.as_mut())
            .ok_or(StoreError::UnknownObject(id))?;

        let previous = object.net_id();
        object.set_net_id_internal(net_id);

        if !previous.is_none() {
            if let Some(entry) = self.net_index.get_mut(previous.0 as usize) {
                *entry = None;
            }
        }
        if !net_id.is_none() {
            let index = net_id.0 as usize;
            if self.net_index.len() <= index {
                self.net_index.resize(index + 1, None);
            }
            self.net_index[index] = Some(id);
        }

        if object.has_registered_process_functions() {
            self.process_cache_dirty = true;
        }
        Ok(())
    }

    pub fn generate_net_id(&mut self) -> Result<ObjectNetId, StoreError> {
        // 0xFFFF is the wire terminator, never assignable.
        if self.next_net_id == u16::MAX {
            return Err(StoreError::NetIdExhausted);
        }
        let id = ObjectNetId(self.next_net_id);
        self.next_net_id += 1;
        Ok(id)
    }

    /// Insertion order, live objects only.
    pub fn iter(&self) -> impl Iterator<Item = &ObjectData> {
        self.objects.iter().flatten()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut ObjectData> {
        self.objects.iter_mut().flatten()
    }

    pub fn local_ids(&self) -> impl Iterator<Item = ObjectLocalId> + '_ {
        self.objects.iter().flatten().map(|od| od.local_id())
    }

    /// Net-id order, live objects only.
    pub fn net_ordered_ids(&self) -> impl Iterator<Item = ObjectLocalId> + '_ {
        self.net_index.iter().copied().flatten()
    }

    /// Highest net id seen so far (for sizing snapshot vectors).
    pub fn biggest_net_id(&self) -> Option<ObjectNetId> {
        self.net_index
            .iter()
            .rposition(|entry| entry.is_some())
            .map(|index| ObjectNetId(index as u16))
    }

    pub fn mark_process_cache_dirty(&mut self) {
        self.process_cache_dirty = true;
    }

    pub fn take_process_cache_dirty(&mut self) -> bool {
        std::mem::replace(&mut self.process_cache_dirty, false)
    }

    pub fn len(&self) -> usize {
        self.handle_index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handle_index.is_empty()
    }
}
