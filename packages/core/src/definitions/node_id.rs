use std::fmt::{Debug, Display};

/// Per-home identity of a device. Valid device ids are 1..=232;
/// node 1 is typically the controller itself.
#[derive(Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(u8);

pub const NODE_ID_UNSPECIFIED: NodeId = NodeId(0);
pub const NODE_ID_MAX: u8 = 232;

impl NodeId {
    pub const fn new(id: u8) -> Self {
        Self(id)
    }

    pub fn unspecified() -> Self {
        NODE_ID_UNSPECIFIED
    }

    pub fn is_valid(&self) -> bool {
        self.0 >= 1 && self.0 <= NODE_ID_MAX
    }
}

macro_rules! impl_conversions_for {
    ($t:ty) => {
        impl From<$t> for NodeId {
            fn from(val: $t) -> Self {
                Self(val as u8)
            }
        }

        impl From<NodeId> for $t {
            fn from(val: NodeId) -> Self {
                val.0 as $t
            }
        }

        impl PartialEq<$t> for NodeId {
            fn eq(&self, other: &$t) -> bool {
                self == &NodeId::from(*other)
            }
        }
    };
}

impl_conversions_for!(u8);
impl_conversions_for!(u16);
impl_conversions_for!(u32);

impl Debug for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:0>3}", self.0)
    }
}
