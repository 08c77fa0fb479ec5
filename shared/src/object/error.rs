use thiserror::Error;

use crate::types::{ObjectLocalId, ObjectNetId};

/// Errors that can occur during ObjectDataStore operations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// Attempted to register the same host object twice
    #[error("object `{name}` is already registered")]
    AlreadyRegistered { name: String },

    /// The local id does not resolve to a live object
    #[error("object {0:?} is not registered")]
    UnknownObject(ObjectLocalId),

    /// Attempted to bind a net id already owned by another object
    #[error("net id {net_id:?} is already bound to object {owner:?}")]
    NetIdTaken {
        net_id: ObjectNetId,
        owner: ObjectLocalId,
    },

    /// The server ran out of assignable net ids
    #[error("net id space exhausted (65535 objects)")]
    NetIdExhausted,

    /// The named variable does not exist on the object
    #[error("variable `{variable}` does not exist on object {object:?}")]
    UnknownVariable {
        object: ObjectLocalId,
        variable: String,
    },
}
