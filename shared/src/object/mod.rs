mod error;
mod object_data;
mod store;

pub use error::StoreError;
pub use object_data::{
    ObjectData, ProcessHandle, ProcessPhase, VarDescriptor, PROCESS_PHASE_COUNT,
};
pub(crate) use object_data::ProcessFunction;
pub use store::ObjectDataStore;
