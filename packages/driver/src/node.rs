use crate::send_queue::PendingRequest;
use homewave_cc::prelude::*;
use homewave_core::prelude::*;
use std::collections::{BTreeMap, BTreeSet, VecDeque};

/// How far the ordered interview of a node has progressed. The stage
/// only moves forward during a session; going back requires an explicit
/// refresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum InterviewStage {
    None,
    /// Listening/routing/baud flags from the stick's topology table.
    ProtocolInfo,
    /// Waiting for the node's NIF with its supported classes.
    NodeInfo,
    /// The manufacturer/product triple and the device-database lookup.
    ManufacturerSpecific,
    /// Instance counts for multi-instance classes.
    Instances,
    /// Values that never change at runtime.
    Static,
    /// Association group enumeration.
    Associations,
    /// Values needed for a useful view that may still change.
    Session,
    /// Values expected to change at any time.
    Dynamic,
    Ready,
    /// A listening node stopped answering mid-interview. Kept in the
    /// registry but not queried further.
    Failed,
}

impl InterviewStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            InterviewStage::None => "None",
            InterviewStage::ProtocolInfo => "ProtocolInfo",
            InterviewStage::NodeInfo => "NodeInfo",
            InterviewStage::ManufacturerSpecific => "ManufacturerSpecific",
            InterviewStage::Instances => "Instances",
            InterviewStage::Static => "Static",
            InterviewStage::Associations => "Associations",
            InterviewStage::Session => "Session",
            InterviewStage::Dynamic => "Dynamic",
            InterviewStage::Ready => "Ready",
            InterviewStage::Failed => "Failed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        Some(match s {
            "None" => InterviewStage::None,
            "ProtocolInfo" => InterviewStage::ProtocolInfo,
            "NodeInfo" => InterviewStage::NodeInfo,
            "ManufacturerSpecific" => InterviewStage::ManufacturerSpecific,
            "Instances" => InterviewStage::Instances,
            "Static" => InterviewStage::Static,
            "Associations" => InterviewStage::Associations,
            "Session" => InterviewStage::Session,
            "Dynamic" => InterviewStage::Dynamic,
            "Ready" => InterviewStage::Ready,
            "Failed" => InterviewStage::Failed,
            _ => return None,
        })
    }
}

/// One implemented command class on one node.
#[derive(Debug)]
pub struct ClassSlot {
    pub handler: CcHandler,
    /// The version the node implements, learned during Static.
    pub version: u8,
    pub instances: u8,
}

impl ClassSlot {
    pub fn new(handler: CcHandler) -> Self {
        Self {
            handler,
            version: 1,
            instances: 1,
        }
    }
}

/// One association group of a node.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct GroupInfo {
    pub max_members: u8,
    pub members: Vec<NodeId>,
}

/// Everything the driver knows about one device.
pub struct NodeRecord {
    pub id: NodeId,
    pub protocol_info: Option<ProtocolInfo>,

    pub manufacturer_id: Option<u16>,
    pub product_type: Option<u16>,
    pub product_id: Option<u16>,
    pub manufacturer_name: String,
    pub product_name: String,

    /// User-chosen name, at most 16 characters.
    pub name: String,
    pub location: String,

    /// Every class id the node ever advertised, implemented or not.
    /// Grows monotonically during a session.
    pub advertised: BTreeSet<u8>,
    pub classes: BTreeMap<CommandClassId, ClassSlot>,

    pub group_count: u8,
    pub groups: BTreeMap<u8, GroupInfo>,

    pub interview: InterviewStage,
    /// An interview task is currently working this node.
    pub interview_active: bool,
    /// Set when the interview parked because the node was asleep.
    pub interview_parked: bool,

    /// Non-listening nodes sleep; outbound traffic waits in `pending`.
    pub awake: bool,
    pub pending: VecDeque<PendingRequest>,

    pub poll_enabled: bool,
}

pub const MAX_NODE_NAME_LEN: usize = 16;

impl NodeRecord {
    pub fn new(id: NodeId) -> Self {
        Self {
            id,
            protocol_info: None,
            manufacturer_id: None,
            product_type: None,
            product_id: None,
            manufacturer_name: String::new(),
            product_name: String::new(),
            name: String::new(),
            location: String::new(),
            advertised: BTreeSet::new(),
            classes: BTreeMap::new(),
            group_count: 0,
            groups: BTreeMap::new(),
            interview: InterviewStage::None,
            interview_active: false,
            interview_parked: false,
            awake: true,
            pending: VecDeque::new(),
            poll_enabled: false,
        }
    }

    pub fn listening(&self) -> bool {
        self.protocol_info.map(|info| info.listening).unwrap_or(true)
    }

    /// Battery nodes only listen briefly around wake-ups.
    pub fn can_sleep(&self) -> bool {
        !self.listening()
    }

    /// Whether outbound traffic for this node must be buffered.
    pub fn is_asleep(&self) -> bool {
        self.can_sleep() && !self.awake
    }

    pub fn supports(&self, class: CommandClassId) -> bool {
        self.advertised.contains(&(class as u8))
    }

    /// Records an advertised class and creates its handler when the
    /// library implements it. Classes are never removed during a
    /// session.
    pub fn add_class(&mut self, class_byte: u8) -> Option<CommandClassId> {
        self.advertised.insert(class_byte);
        let class = CommandClassId::try_from(class_byte).ok()?;
        if !self.classes.contains_key(&class) {
            let handler = create_handler(class)?;
            self.classes.insert(class, ClassSlot::new(handler));
        }
        Some(class)
    }

    /// Advances the interview. Regressions are ignored except for the
    /// explicit refresh reset the caller performs separately.
    pub fn advance_interview(&mut self, stage: InterviewStage) {
        if stage > self.interview {
            self.interview = stage;
        }
    }

    pub fn set_name(&mut self, name: &str) {
        self.name = name.chars().take(MAX_NODE_NAME_LEN).collect();
    }

    /// The class a poll should query: the primary actuator class when
    /// one exists, Basic otherwise.
    pub fn poll_class(&self) -> CommandClassId {
        if self.classes.contains_key(&CommandClassId::BinarySwitch) {
            CommandClassId::BinarySwitch
        } else {
            CommandClassId::Basic
        }
    }

    /// Whether Basic frames should be remapped onto an actuator class.
    pub fn basic_mapping(&self) -> Option<CommandClassId> {
        if self.classes.contains_key(&CommandClassId::BinarySwitch) {
            Some(CommandClassId::BinarySwitch)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_interview_is_monotonic() {
        let mut node = NodeRecord::new(NodeId::new(2));
        node.advance_interview(InterviewStage::Static);
        node.advance_interview(InterviewStage::NodeInfo);
        assert_eq!(node.interview, InterviewStage::Static);
        node.advance_interview(InterviewStage::Ready);
        assert_eq!(node.interview, InterviewStage::Ready);
    }

    #[test]
    fn test_class_set_is_monotonic() {
        let mut node = NodeRecord::new(NodeId::new(2));
        assert_eq!(node.add_class(0x25), Some(CommandClassId::BinarySwitch));
        // Unimplemented classes are remembered but get no handler
        assert_eq!(node.add_class(0x80), None);
        assert!(node.supports(CommandClassId::Battery));
        assert!(node.classes.contains_key(&CommandClassId::BinarySwitch));
    }

    #[test]
    fn test_name_truncation() {
        let mut node = NodeRecord::new(NodeId::new(2));
        node.set_name("a very long name for a light switch");
        assert_eq!(node.name.len(), 16);
    }
}
