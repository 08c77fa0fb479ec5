use netsync_serde::{BitReader, BitWriter};

use crate::controller::ControllerCore;
use crate::host::ObjectHandle;
use crate::listener::ListenerHandle;
use crate::types::{ObjectLocalId, ObjectNetId, VarId};
use crate::value::VarValue;

/// The phases process functions run in, in order, every simulation tick.
/// Controllers consume their input at the start of `Process`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProcessPhase {
    Early,
    PreProcess,
    Process,
    PostProcess,
    Late,
}

pub const PROCESS_PHASE_COUNT: usize = 5;

impl ProcessPhase {
    pub const ALL: [ProcessPhase; PROCESS_PHASE_COUNT] = [
        ProcessPhase::Early,
        ProcessPhase::PreProcess,
        ProcessPhase::Process,
        ProcessPhase::PostProcess,
        ProcessPhase::Late,
    ];

    pub fn index(&self) -> usize {
        match self {
            ProcessPhase::Early => 0,
            ProcessPhase::PreProcess => 1,
            ProcessPhase::Process => 2,
            ProcessPhase::PostProcess => 3,
            ProcessPhase::Late => 4,
        }
    }
}

/// Handle returned by `register_process`, used to unregister the function
/// again.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ProcessHandle(pub u32);

/// One tracked variable. The id always equals the position in
/// `ObjectData::vars`; unregistering disables the descriptor but never
/// erases it, so ids stay dense and are never reused.
pub struct VarDescriptor {
    pub id: VarId,
    pub name: String,
    pub value: VarValue,
    pub enabled: bool,
    /// Discrepancies on this variable are patched in place instead of
    /// triggering a full rewind.
    pub skip_rewinding: bool,
    pub listeners: Vec<ListenerHandle>,
}

pub(crate) struct ProcessFunction {
    pub(crate) handle: ProcessHandle,
    pub(crate) func: Box<dyn FnMut(f64)>,
}

/// The replicated representation of one scene object.
pub struct ObjectData {
    local_id: ObjectLocalId,
    net_id: ObjectNetId,
    pub object_name: String,
    pub handle: Option<ObjectHandle>,
    pub instance_id: u64,
    pub controller: Option<ControllerCore>,
    pub vars: Vec<VarDescriptor>,
    pub(crate) functions: [Vec<ProcessFunction>; PROCESS_PHASE_COUNT],
    pub collect_epoch: Option<Box<dyn FnMut(&mut BitWriter)>>,
    pub apply_epoch: Option<Box<dyn FnMut(f64, f64, &mut BitReader, &mut BitReader)>>,
    /// Whether the client simulates, compares and rewinds this object.
    /// Deferred objects stream instead.
    pub realtime_enabled: bool,
}

impl ObjectData {
    pub(crate) fn new(
        local_id: ObjectLocalId,
        object_name: String,
        handle: ObjectHandle,
        instance_id: u64,
    ) -> Self {
        Self {
            local_id,
            net_id: ObjectNetId::NONE,
            object_name,
            handle: Some(handle),
            instance_id,
            controller: None,
            vars: Vec::new(),
            functions: Default::default(),
            collect_epoch: None,
            apply_epoch: None,
            realtime_enabled: true,
        }
    }

    pub fn local_id(&self) -> ObjectLocalId {
        self.local_id
    }

    pub fn net_id(&self) -> ObjectNetId {
        self.net_id
    }

    pub(crate) fn set_net_id_internal(&mut self, net_id: ObjectNetId) {
        self.net_id = net_id;
    }

    pub fn find_variable_id(&self, name: &str) -> Option<VarId> {
        self.vars
            .iter()
            .find(|var| var.name == name)
            .map(|var| var.id)
    }

    pub fn has_registered_process_functions(&self) -> bool {
        self.functions.iter().any(|phase| !phase.is_empty())
    }

    pub fn has_deferred_sync(&self) -> bool {
        self.collect_epoch.is_some() && self.apply_epoch.is_some()
    }
}
