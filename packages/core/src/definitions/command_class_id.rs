use derive_try_from_primitive::*;
use std::fmt::Display;

/// The command classes this library knows how to decode and encode.
///
/// A node may advertise classes beyond these; they are kept as raw ids in
/// the node's supported set and their frames are logged and dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, TryFromPrimitive)]
#[repr(u8)]
pub enum CommandClassId {
    NoOperation = 0x00,
    Basic = 0x20,
    BinarySwitch = 0x25,
    MultilevelSwitch = 0x26,
    MultilevelSensor = 0x31,
    MultiInstance = 0x60,
    Configuration = 0x70,
    ManufacturerSpecific = 0x72,
    Battery = 0x80,
    WakeUp = 0x84,
    Association = 0x85,
    Version = 0x86,
}

/// In a NIF, ids after this marker are controlled rather than supported.
pub const COMMAND_CLASS_MARK: u8 = 0xef;

impl CommandClassId {
    pub fn name(&self) -> &'static str {
        match self {
            CommandClassId::NoOperation => "COMMAND_CLASS_NO_OPERATION",
            CommandClassId::Basic => "COMMAND_CLASS_BASIC",
            CommandClassId::BinarySwitch => "COMMAND_CLASS_SWITCH_BINARY",
            CommandClassId::MultilevelSwitch => "COMMAND_CLASS_SWITCH_MULTILEVEL",
            CommandClassId::MultilevelSensor => "COMMAND_CLASS_SENSOR_MULTILEVEL",
            CommandClassId::MultiInstance => "COMMAND_CLASS_MULTI_INSTANCE",
            CommandClassId::Configuration => "COMMAND_CLASS_CONFIGURATION",
            CommandClassId::ManufacturerSpecific => "COMMAND_CLASS_MANUFACTURER_SPECIFIC",
            CommandClassId::Battery => "COMMAND_CLASS_BATTERY",
            CommandClassId::WakeUp => "COMMAND_CLASS_WAKE_UP",
            CommandClassId::Association => "COMMAND_CLASS_ASSOCIATION",
            CommandClassId::Version => "COMMAND_CLASS_VERSION",
        }
    }
}

impl Display for CommandClassId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

#[test]
fn test_known_ids_round_trip() {
    assert_eq!(CommandClassId::try_from(0x25), Ok(CommandClassId::BinarySwitch));
    assert_eq!(CommandClassId::try_from(0x84), Ok(CommandClassId::WakeUp));
    assert!(CommandClassId::try_from(0x9f).is_err());
}
