/// The event mode bit set carried by every change-listener dispatch.
///
/// `CHANGE` is the plain simulation-time change. The `SYNC_*` flags mark
/// writes performed while recovering from a server snapshot; `END_SYNC`
/// fires once recovery settles, for variables whose final value differs
/// from the value they had when the sync began.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct NetEventFlag(pub u8);

impl NetEventFlag {
    pub const EMPTY: NetEventFlag = NetEventFlag(0);
    pub const CHANGE: NetEventFlag = NetEventFlag(1 << 0);
    pub const SYNC_RECOVER: NetEventFlag = NetEventFlag(1 << 1);
    pub const SYNC_RESET: NetEventFlag = NetEventFlag(1 << 2);
    pub const SYNC_REWIND: NetEventFlag = NetEventFlag(1 << 3);
    pub const END_SYNC: NetEventFlag = NetEventFlag(1 << 4);

    /// Any of the recovery modes.
    pub const SYNC: NetEventFlag =
        NetEventFlag(Self::SYNC_RECOVER.0 | Self::SYNC_RESET.0 | Self::SYNC_REWIND.0);
    /// What listeners subscribe to when they don't say otherwise.
    pub const DEFAULT: NetEventFlag = NetEventFlag(Self::CHANGE.0 | Self::END_SYNC.0);
    pub const ALWAYS: NetEventFlag = NetEventFlag(
        Self::CHANGE.0
            | Self::SYNC_RECOVER.0
            | Self::SYNC_RESET.0
            | Self::SYNC_REWIND.0
            | Self::END_SYNC.0,
    );

    pub fn intersects(&self, other: NetEventFlag) -> bool {
        self.0 & other.0 != 0
    }
}

impl std::ops::BitOr for NetEventFlag {
    type Output = NetEventFlag;

    fn bitor(self, rhs: NetEventFlag) -> NetEventFlag {
        NetEventFlag(self.0 | rhs.0)
    }
}
