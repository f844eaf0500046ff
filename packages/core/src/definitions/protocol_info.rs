use crate::definitions::DeviceClass;

/// Protocol-level facts about a node, learned from GET_NODE_PROTOCOL_INFO
/// before the node itself is ever addressed.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ProtocolInfo {
    /// Mains-powered, always able to receive.
    pub listening: bool,
    pub routing: bool,
    /// Supports beam wakeup for frequently listening devices.
    pub beaming: bool,
    pub max_baud_rate: u32,
    pub protocol_version: u8,
    pub device_class: DeviceClass,
}

impl ProtocolInfo {
    /// Decodes the three capability bytes and the device class triple
    /// of a GET_NODE_PROTOCOL_INFO response.
    pub fn from_capabilities(caps: [u8; 3], device_class: DeviceClass) -> Self {
        let listening = caps[0] & 0x80 != 0;
        let routing = caps[0] & 0x40 != 0;
        let max_baud_rate = if caps[0] & 0x38 == 0x10 { 40_000 } else { 9_600 };
        let protocol_version = (caps[0] & 0x07) + 1;
        let beaming = caps[1] & 0x10 != 0;

        Self {
            listening,
            routing,
            beaming,
            max_baud_rate,
            protocol_version,
            device_class,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_listening_switch() {
        // Capability bytes of a typical mains-powered binary switch
        let info = ProtocolInfo::from_capabilities([0xd3, 0x1c, 0x00], DeviceClass::new(0x04, 0x10, 0x01));
        assert!(info.listening);
        assert!(info.routing);
        assert_eq!(info.max_baud_rate, 40_000);
        assert_eq!(info.protocol_version, 4);
        assert!(info.beaming);
    }

    #[test]
    fn test_battery_sensor() {
        let info = ProtocolInfo::from_capabilities([0x53, 0x0c, 0x00], DeviceClass::new(0x04, 0x21, 0x01));
        assert!(!info.listening);
        assert_eq!(info.max_baud_rate, 40_000);
        assert!(!info.beaming);
    }
}
