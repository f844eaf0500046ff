use crate::error::Error;
use derive_try_from_primitive::*;
use homewave_core::prelude::*;

pub const ADD_NODE_ANY: u8 = 0x01;
pub const ADD_NODE_STOP: u8 = 0x05;
pub const ADD_NODE_OPTION_HIGH_POWER: u8 = 0x80;
pub const REMOVE_NODE_ANY: u8 = 0x01;
pub const REMOVE_NODE_STOP: u8 = 0x05;

/// APPLICATION_UPDATE event carrying a NIF.
pub const UPDATE_STATE_NODE_INFO_RECEIVED: u8 = 0x84;
/// APPLICATION_UPDATE event: the NIF request went unanswered.
pub const UPDATE_STATE_NODE_INFO_REQ_FAILED: u8 = 0x81;

/// Response to GET_NODE_PROTOCOL_INFO: capability bytes plus the
/// device class triple, served from the stick's own topology table.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GetNodeProtocolInfoResponse {
    pub protocol_info: ProtocolInfo,
}

impl GetNodeProtocolInfoResponse {
    pub fn parse(i: &[u8]) -> crate::error::Result<Self> {
        if i.len() < 6 {
            return Err(Error::Parse("malformed GET_NODE_PROTOCOL_INFO payload".into()));
        }
        let caps = [i[0], i[1], i[2]];
        let device_class = DeviceClass::new(i[3], i[4], i[5]);
        Ok(Self {
            protocol_info: ProtocolInfo::from_capabilities(caps, device_class),
        })
    }

    /// A generic class of zero means the stick has no such node.
    pub fn is_present(&self) -> bool {
        self.protocol_info.device_class.generic != 0
    }
}

/// Response to REQUEST_NODE_INFO: whether the stick accepted the request.
/// The NIF itself arrives later as an APPLICATION_UPDATE.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RequestNodeInfoResponse {
    pub accepted: bool,
}

impl RequestNodeInfoResponse {
    pub fn parse(i: &[u8]) -> crate::error::Result<Self> {
        match i.first() {
            Some(&status) => Ok(Self { accepted: status != 0 }),
            None => Err(Error::Parse("empty REQUEST_NODE_INFO payload".into())),
        }
    }
}

/// An unsolicited APPLICATION_UPDATE request. For NIF events it carries
/// the device class triple and the advertised command classes, already
/// split at the support/control mark.
#[derive(Debug, Clone, PartialEq)]
pub struct ApplicationUpdate {
    pub event: u8,
    pub node_id: NodeId,
    pub device_class: Option<DeviceClass>,
    pub supported: Vec<u8>,
    pub controlled: Vec<u8>,
}

impl ApplicationUpdate {
    pub fn parse(i: &[u8]) -> crate::error::Result<Self> {
        if i.len() < 2 {
            return Err(Error::Parse("malformed APPLICATION_UPDATE payload".into()));
        }
        let event = i[0];
        let node_id = NodeId::new(i[1]);

        if event != UPDATE_STATE_NODE_INFO_RECEIVED {
            return Ok(Self {
                event,
                node_id,
                device_class: None,
                supported: Vec::new(),
                controlled: Vec::new(),
            });
        }

        if i.len() < 6 {
            return Err(Error::Parse("truncated NIF in APPLICATION_UPDATE".into()));
        }
        let nif_len = i[2] as usize;
        if nif_len < 3 || i.len() < 3 + nif_len {
            return Err(Error::Parse("truncated NIF in APPLICATION_UPDATE".into()));
        }
        let device_class = DeviceClass::new(i[3], i[4], i[5]);
        let classes = &i[6..3 + nif_len];

        let mut supported = Vec::new();
        let mut controlled = Vec::new();
        let mut after_mark = false;
        for &class in classes {
            if class == COMMAND_CLASS_MARK {
                after_mark = true;
                continue;
            }
            if after_mark {
                controlled.push(class);
            } else {
                supported.push(class);
            }
        }

        Ok(Self {
            event,
            node_id,
            device_class: Some(device_class),
            supported,
            controlled,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive)]
#[repr(u8)]
pub enum AddNodeStatus {
    LearnReady = 0x01,
    NodeFound = 0x02,
    AddingSlave = 0x03,
    AddingController = 0x04,
    ProtocolDone = 0x05,
    Done = 0x06,
    Failed = 0x07,
}

/// Progress callback of an ADD_NODE_TO_NETWORK operation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AddNodeCallback {
    pub callback_id: u8,
    pub status: AddNodeStatus,
    pub node_id: NodeId,
}

impl AddNodeCallback {
    pub fn parse(i: &[u8]) -> crate::error::Result<Self> {
        if i.len() < 3 {
            return Err(Error::Parse("malformed ADD_NODE callback".into()));
        }
        let status = AddNodeStatus::try_from(i[1])
            .map_err(|_| Error::Parse(format!("unknown ADD_NODE status 0x{:02x}", i[1])))?;
        Ok(Self {
            callback_id: i[0],
            status,
            node_id: NodeId::new(i[2]),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive)]
#[repr(u8)]
pub enum RemoveNodeStatus {
    LearnReady = 0x01,
    NodeFound = 0x02,
    RemovingSlave = 0x03,
    RemovingController = 0x04,
    Done = 0x06,
    Failed = 0x07,
}

/// Progress callback of a REMOVE_NODE_FROM_NETWORK operation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RemoveNodeCallback {
    pub callback_id: u8,
    pub status: RemoveNodeStatus,
    pub node_id: NodeId,
}

impl RemoveNodeCallback {
    pub fn parse(i: &[u8]) -> crate::error::Result<Self> {
        if i.len() < 3 {
            return Err(Error::Parse("malformed REMOVE_NODE callback".into()));
        }
        let status = RemoveNodeStatus::try_from(i[1])
            .map_err(|_| Error::Parse(format!("unknown REMOVE_NODE status 0x{:02x}", i[1])))?;
        Ok(Self {
            callback_id: i[0],
            status,
            node_id: NodeId::new(i[2]),
        })
    }
}

/// Completion callback of SET_DEFAULT, REQUEST_NODE_NEIGHBOR_UPDATE and
/// REQUEST_NETWORK_UPDATE: the echoed id plus an optional status byte.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NetworkManagementCallback {
    pub function: FunctionType,
    pub callback_id: u8,
    pub status: Option<u8>,
}

impl NetworkManagementCallback {
    pub fn parse(function: FunctionType, i: &[u8]) -> crate::error::Result<Self> {
        match i.first() {
            Some(&callback_id) => Ok(Self {
                function,
                callback_id,
                status: i.get(1).copied(),
            }),
            None => Err(Error::Parse("empty network management callback".into())),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_nif_update_splits_at_mark() {
        // Node 2, NIF: len 8, device 04/10/01, classes 25 72 86 ef 20
        let payload = hex::decode("8402080410012572 86ef20".replace(' ', "")).unwrap();
        let parsed = ApplicationUpdate::parse(&payload).unwrap();
        assert_eq!(parsed.node_id, NodeId::new(2));
        assert_eq!(parsed.device_class, Some(DeviceClass::new(0x04, 0x10, 0x01)));
        assert_eq!(parsed.supported, vec![0x25, 0x72, 0x86]);
        assert_eq!(parsed.controlled, vec![0x20]);
    }

    #[test]
    fn test_nif_request_failed() {
        let payload = hex::decode("8100").unwrap();
        let parsed = ApplicationUpdate::parse(&payload).unwrap();
        assert_eq!(parsed.event, UPDATE_STATE_NODE_INFO_REQ_FAILED);
        assert!(parsed.device_class.is_none());
    }

    #[test]
    fn test_protocol_info_presence() {
        let present = GetNodeProtocolInfoResponse::parse(&hex::decode("d31c00041001").unwrap()).unwrap();
        assert!(present.is_present());
        assert!(present.protocol_info.listening);

        let absent = GetNodeProtocolInfoResponse::parse(&hex::decode("000000000000").unwrap()).unwrap();
        assert!(!absent.is_present());
    }
}
