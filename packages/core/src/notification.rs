use crate::definitions::{HomeId, NodeId};
use crate::value::ValueId;

/// Everything the library reports back to the application. Delivered to
/// registered watchers in the order the underlying updates occurred.
#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    /// The controller identity is known and the driver accepts commands.
    DriverReady { home_id: HomeId, controller_node: NodeId },
    /// The driver gave up on its port and stopped issuing traffic.
    DriverFailed { port: String },

    /// First sighting of a node that was not in the restored config.
    NodeNew { home_id: HomeId, node_id: NodeId },
    NodeAdded { home_id: HomeId, node_id: NodeId },
    NodeRemoved { home_id: HomeId, node_id: NodeId },
    NodeProtocolInfo { home_id: HomeId, node_id: NodeId },
    /// Name, location, or the manufacturer/product labels changed.
    NodeNaming { home_id: HomeId, node_id: NodeId },
    NodeEvent { home_id: HomeId, node_id: NodeId, event: u8 },

    ValueAdded { value_id: ValueId },
    ValueRemoved { value_id: ValueId },
    ValueChanged { value_id: ValueId },

    Group { home_id: HomeId, node_id: NodeId, group_index: u8 },

    NodeQueriesComplete { home_id: HomeId, node_id: NodeId },
    AwakeNodesQueried { home_id: HomeId },
    AllNodesQueried { home_id: HomeId },

    PollingEnabled { home_id: HomeId, node_id: NodeId },
    PollingDisabled { home_id: HomeId, node_id: NodeId },

    CreateButton { value_id: ValueId },
    DeleteButton { value_id: ValueId },
    ButtonOn { value_id: ValueId },
    ButtonOff { value_id: ValueId },

    /// Out-of-band events that don't change the device model.
    Event { home_id: HomeId, node_id: NodeId, code: NotificationCode },
}

/// Subtype of [Notification::Event].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationCode {
    /// The in-flight message completed its transaction.
    MessageComplete,
    /// Retries were exhausted; the message was dropped.
    MessageFailed,
    Timeout,
    /// A no-operation round-trip to the node finished.
    NoOperation,
}

impl Notification {
    pub fn home_id(&self) -> Option<HomeId> {
        match self {
            Notification::DriverReady { home_id, .. }
            | Notification::NodeNew { home_id, .. }
            | Notification::NodeAdded { home_id, .. }
            | Notification::NodeRemoved { home_id, .. }
            | Notification::NodeProtocolInfo { home_id, .. }
            | Notification::NodeNaming { home_id, .. }
            | Notification::NodeEvent { home_id, .. }
            | Notification::Group { home_id, .. }
            | Notification::NodeQueriesComplete { home_id, .. }
            | Notification::AwakeNodesQueried { home_id }
            | Notification::AllNodesQueried { home_id }
            | Notification::PollingEnabled { home_id, .. }
            | Notification::PollingDisabled { home_id, .. }
            | Notification::Event { home_id, .. } => Some(*home_id),
            Notification::ValueAdded { value_id }
            | Notification::ValueRemoved { value_id }
            | Notification::ValueChanged { value_id }
            | Notification::CreateButton { value_id }
            | Notification::DeleteButton { value_id }
            | Notification::ButtonOn { value_id }
            | Notification::ButtonOff { value_id } => Some(value_id.home_id()),
            Notification::DriverFailed { .. } => None,
        }
    }

    pub fn node_id(&self) -> Option<NodeId> {
        match self {
            Notification::NodeNew { node_id, .. }
            | Notification::NodeAdded { node_id, .. }
            | Notification::NodeRemoved { node_id, .. }
            | Notification::NodeProtocolInfo { node_id, .. }
            | Notification::NodeNaming { node_id, .. }
            | Notification::NodeEvent { node_id, .. }
            | Notification::Group { node_id, .. }
            | Notification::NodeQueriesComplete { node_id, .. }
            | Notification::PollingEnabled { node_id, .. }
            | Notification::PollingDisabled { node_id, .. }
            | Notification::Event { node_id, .. } => Some(*node_id),
            Notification::ValueAdded { value_id }
            | Notification::ValueRemoved { value_id }
            | Notification::ValueChanged { value_id }
            | Notification::CreateButton { value_id }
            | Notification::DeleteButton { value_id }
            | Notification::ButtonOn { value_id }
            | Notification::ButtonOff { value_id } => Some(value_id.node_id()),
            Notification::DriverReady { controller_node, .. } => Some(*controller_node),
            _ => None,
        }
    }
}
