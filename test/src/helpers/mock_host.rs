use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::rc::Rc;

use netsync_serde::{BitReader, BitWriter};
use netsync_shared::{
    BitWrite, ControllerConfig, ControllerDriver, ObjectHandle, SceneHost, SyncGroups, VarValue,
};

/// Scripted input source shared between a test and its mover driver.
pub type StepQueue = Rc<RefCell<VecDeque<u8>>>;

#[derive(Default)]
pub struct MockWorld {
    /// Object name -> variables.
    objects: BTreeMap<String, BTreeMap<String, VarValue>>,
}

impl MockWorld {
    pub fn get(&self, object: &str, var: &str) -> Option<VarValue> {
        self.objects.get(object)?.get(var).cloned()
    }

    pub fn set(&mut self, object: &str, var: &str, value: VarValue) {
        if let Some(vars) = self.objects.get_mut(object) {
            vars.insert(var.to_string(), value);
        }
    }
}

/// A deterministic test controller: each input is one `u8` step added to
/// the object's `pos` variable. Replaying the same inputs over the same
/// state always lands on the same `pos`.
struct MoverDriver {
    world: Rc<RefCell<MockWorld>>,
    object: String,
    steps: StepQueue,
}

impl ControllerDriver for MoverDriver {
    fn collect_inputs(&mut self, _delta: f64, buffer: &mut BitWriter) {
        let step = self.steps.borrow_mut().pop_front().unwrap_or(0);
        buffer.write_byte(step);
    }

    fn controller_process(&mut self, _delta: f64, input: &mut BitReader) {
        let step = input.read_byte().unwrap_or(0);
        let mut world = self.world.borrow_mut();
        let current = match world.get(&self.object, "pos") {
            Some(VarValue::Int(value)) => value,
            _ => 0,
        };
        world.set(&self.object, "pos", VarValue::Int(current + i64::from(step)));
    }
}

/// An in-memory scene graph implementing `SceneHost`. Handles are dense
/// indices into the spawn order.
pub struct MockHost {
    world: Rc<RefCell<MockWorld>>,
    handles: HashMap<ObjectHandle, String>,
    names: HashMap<String, ObjectHandle>,
    next_handle: ObjectHandle,
    controllers: HashMap<String, (StepQueue, ControllerConfig)>,
    custom_data: Option<VarValue>,
    pub applied_custom_data: Vec<VarValue>,
}

impl Default for MockHost {
    fn default() -> Self {
        Self::new()
    }
}

impl MockHost {
    pub fn new() -> Self {
        Self {
            world: Rc::new(RefCell::new(MockWorld::default())),
            handles: HashMap::new(),
            names: HashMap::new(),
            next_handle: 1,
            controllers: HashMap::new(),
            custom_data: None,
            applied_custom_data: Vec::new(),
        }
    }

    pub fn world(&self) -> Rc<RefCell<MockWorld>> {
        self.world.clone()
    }

    pub fn spawn(&mut self, name: &str, vars: &[(&str, VarValue)]) -> ObjectHandle {
        let handle = self.next_handle;
        self.next_handle += 1;
        self.handles.insert(handle, name.to_string());
        self.names.insert(name.to_string(), handle);
        let mut world = self.world.borrow_mut();
        world.objects.insert(
            name.to_string(),
            vars.iter()
                .map(|(var, value)| (var.to_string(), value.clone()))
                .collect(),
        );
        handle
    }

    /// Makes `name` a controller driven by the scripted step queue.
    pub fn make_controller(&mut self, name: &str, config: ControllerConfig) -> StepQueue {
        let steps: StepQueue = Rc::new(RefCell::new(VecDeque::new()));
        self.controllers
            .insert(name.to_string(), (steps.clone(), config));
        steps
    }

    pub fn set_custom_data(&mut self, value: Option<VarValue>) {
        self.custom_data = value;
    }

    pub fn get(&self, object: &str, var: &str) -> Option<VarValue> {
        self.world.borrow().get(object, var)
    }

    pub fn set(&mut self, object: &str, var: &str, value: VarValue) {
        self.world.borrow_mut().set(object, var, value);
    }
}

impl SceneHost for MockHost {
    fn fetch_app_object(&mut self, name: &str) -> Option<ObjectHandle> {
        self.names.get(name).copied()
    }

    fn object_id(&self, handle: ObjectHandle) -> u64 {
        handle
    }

    fn object_name(&self, handle: ObjectHandle) -> String {
        self.handles.get(&handle).cloned().unwrap_or_default()
    }

    fn get_variable(&self, handle: ObjectHandle, name: &str) -> Option<VarValue> {
        let object = self.handles.get(&handle)?;
        self.world.borrow().get(object, name)
    }

    fn set_variable(&mut self, handle: ObjectHandle, name: &str, value: &VarValue) {
        if let Some(object) = self.handles.get(&handle) {
            self.world.borrow_mut().set(object, name, value.clone());
        }
    }

    fn extract_controller(
        &mut self,
        handle: ObjectHandle,
    ) -> Option<(Box<dyn ControllerDriver>, ControllerConfig)> {
        let object = self.handles.get(&handle)?.clone();
        let (steps, config) = self.controllers.get(&object)?;
        Some((
            Box::new(MoverDriver {
                world: self.world.clone(),
                object,
                steps: steps.clone(),
            }),
            config.clone(),
        ))
    }

    fn update_objects_relevancy(&mut self, _groups: &mut dyn SyncGroups) {}

    fn snapshot_get_custom_data(&self, _group: Option<netsync_shared::SyncGroupId>) -> Option<VarValue> {
        self.custom_data.clone()
    }

    fn snapshot_set_custom_data(&mut self, value: &VarValue) {
        self.applied_custom_data.push(value.clone());
    }
}
