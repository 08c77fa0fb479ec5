use log::trace;

use crate::types::{InputId, ObjectNetId, VarId, NONE_INPUT_ID};
use crate::value::VarValue;

/// One variable inside a snapshot. An empty name means "not included in
/// this snapshot"; the slot exists only to keep variable ids positional.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SnapshotVar {
    pub name: String,
    pub value: VarValue,
}

impl SnapshotVar {
    pub fn is_set(&self) -> bool {
        !self.name.is_empty()
    }
}

pub type SnapshotObject = Vec<SnapshotVar>;

/// A scene state sample. Plain value type: `clone()` is the one deep-copy
/// operation, and no internal vector is ever aliased.
#[derive(Clone, Debug, Default)]
pub struct Snapshot {
    /// Input id of the owning controller, or `NONE_INPUT_ID` when the
    /// snapshot carries no input (no controller, or stream paused).
    pub input_id: InputId,
    /// Indexed by net id. `None` means the object was not part of this
    /// snapshot at all.
    pub object_vars: Vec<Option<SnapshotObject>>,
    pub has_custom_data: bool,
    pub custom_data: VarValue,
    /// `Some` when the snapshot carried the full active-object list.
    pub active_object_ids: Option<Vec<ObjectNetId>>,
}

impl Snapshot {
    pub fn new() -> Self {
        Self {
            input_id: NONE_INPUT_ID,
            ..Default::default()
        }
    }

    pub fn has_input_id(&self) -> bool {
        self.input_id != NONE_INPUT_ID
    }

    pub fn ensure_object_slot(&mut self, net_id: ObjectNetId) -> &mut SnapshotObject {
        let index = net_id.0 as usize;
        if self.object_vars.len() <= index {
            self.object_vars.resize(index + 1, None);
        }
        self.object_vars[index].get_or_insert_with(Vec::new)
    }

    pub fn object(&self, net_id: ObjectNetId) -> Option<&SnapshotObject> {
        self.object_vars.get(net_id.0 as usize)?.as_ref()
    }

    pub fn set_var(&mut self, net_id: ObjectNetId, var_id: VarId, name: &str, value: VarValue) {
        let object = self.ensure_object_slot(net_id);
        let index = var_id.0 as usize;
        if object.len() <= index {
            object.resize(index + 1, SnapshotVar::default());
        }
        object[index] = SnapshotVar {
            name: name.to_string(),
            value,
        };
    }

    pub fn drop_object(&mut self, net_id: ObjectNetId) {
        if let Some(slot) = self.object_vars.get_mut(net_id.0 as usize) {
            *slot = None;
        }
    }
}

/// The outcome of checking a client prediction against the authoritative
/// state at the same input id.
pub struct SnapshotCompare {
    /// True when no difference requires a rewind. Skip-rewinding
    /// discrepancies alone leave this true.
    pub is_equal: bool,
    /// The skip-rewinding diffs, as a partial snapshot to apply in place.
    pub no_rewind_recover: Option<Snapshot>,
    /// Net ids with any difference at all, for desync reporting.
    pub different_objects: Vec<ObjectNetId>,
}

/// Compares the authoritative snapshot against the predicted one.
///
/// A variable the server included but the client did not predict counts
/// as a difference. Variables flagged `skip_rewinding` are collected into
/// the partial recover snapshot instead of demanding a rewind.
pub fn compare_snapshots(
    server: &Snapshot,
    client: &Snapshot,
    skip_rewinding: impl Fn(ObjectNetId, VarId) -> bool,
    equals: impl Fn(&VarValue, &VarValue) -> bool,
) -> SnapshotCompare {
    let mut is_equal = true;
    let mut no_rewind_recover: Option<Snapshot> = None;
    let mut different_objects = Vec::new();

    for (index, server_object) in server.object_vars.iter().enumerate() {
        let Some(server_vars) = server_object else {
            continue;
        };
        let net_id = ObjectNetId(index as u16);
        let client_vars = client.object(net_id);
        let mut object_differs = false;

        for (var_index, server_var) in server_vars.iter().enumerate() {
            if !server_var.is_set() {
                continue;
            }
            let var_id = VarId(var_index as u32);

            let client_var = client_vars
                .and_then(|vars| vars.get(var_index))
                .filter(|var| var.is_set());

            let matches = match client_var {
                Some(client_var) => equals(&server_var.value, &client_var.value),
                None => false,
            };
            if matches {
                continue;
            }

            object_differs = true;
            if skip_rewinding(net_id, var_id) {
                trace!(
                    "skip-rewinding diff on net {} var `{}`",
                    net_id.0,
                    server_var.name
                );
                no_rewind_recover.get_or_insert_with(Snapshot::new).set_var(
                    net_id,
                    var_id,
                    &server_var.name,
                    server_var.value.clone(),
                );
            } else {
                is_equal = false;
            }
        }

        if object_differs {
            different_objects.push(net_id);
        }
    }

    SnapshotCompare {
        is_equal,
        no_rewind_recover,
        different_objects,
    }
}
