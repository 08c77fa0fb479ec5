use netsync_serde::{BitReader, BitWrite, Serde, SerdeErr};

/// Identifies one player input sample on one controller. Monotonically
/// increasing, never wraps within a session.
pub type InputId = u32;

/// The "no input" sentinel carried by snapshots of peers without an active
/// controller stream.
pub const NONE_INPUT_ID: InputId = u32::MAX;

/// Tags one deferred sync transmission per server tick.
pub type Epoch = u32;

pub const NONE_EPOCH: Epoch = u32::MAX;

pub type SyncGroupId = u32;

/// The implicit "all objects" group. Read-only to the caller.
pub const GLOBAL_SYNC_GROUP_ID: SyncGroupId = 0;

pub type PeerId = u64;

/// Engine-assigned object id, stable for the lifetime of the process.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjectLocalId(pub u32);

/// Server-assigned object id, stable across peers. Sparse, at most
/// `0xFFFE`; `0xFFFF` is the wire terminator.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjectNetId(pub u16);

impl ObjectNetId {
    pub const NONE: ObjectNetId = ObjectNetId(u16::MAX);

    pub fn is_none(&self) -> bool {
        *self == Self::NONE
    }
}

impl Serde for ObjectNetId {
    fn ser(&self, writer: &mut dyn BitWrite) {
        self.0.ser(writer);
    }

    fn de(reader: &mut BitReader) -> Result<Self, SerdeErr> {
        Ok(ObjectNetId(u16::de(reader)?))
    }
}

/// A variable id always equals its insertion position inside
/// `ObjectData::vars`; ids are dense and never reused.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VarId(pub u32);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum HostType {
    Server,
    Client,
    NoNetwork,
}

impl HostType {
    pub fn is_networked(&self) -> bool {
        !matches!(self, HostType::NoNetwork)
    }
}
