use std::fmt::{Debug, Display};

/// The 32-bit identity of a Z-Wave network, assigned by the primary
/// controller. All cross-driver lookups are keyed by this.
#[derive(Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct HomeId(u32);

impl HomeId {
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    /// The id formatted the way it appears in config file names: 8 hex digits.
    pub fn to_hex(&self) -> String {
        format!("{:08x}", self.0)
    }
}

impl From<u32> for HomeId {
    fn from(val: u32) -> Self {
        Self(val)
    }
}

impl From<HomeId> for u32 {
    fn from(val: HomeId) -> Self {
        val.0
    }
}

impl Debug for HomeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "0x{:08x}", self.0)
    }
}

impl Display for HomeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "0x{:08x}", self.0)
    }
}
