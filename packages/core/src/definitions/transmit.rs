use derive_try_from_primitive::*;

pub const TRANSMIT_OPTION_ACK: u8 = 0x01;
pub const TRANSMIT_OPTION_LOW_POWER: u8 = 0x02;
pub const TRANSMIT_OPTION_AUTO_ROUTE: u8 = 0x04;
pub const TRANSMIT_OPTION_NO_ROUTE: u8 = 0x10;

/// The options appended to every SEND_DATA frame.
pub fn default_transmit_options() -> u8 {
    TRANSMIT_OPTION_ACK | TRANSMIT_OPTION_AUTO_ROUTE
}

/// Delivery result reported in a SEND_DATA callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive)]
#[repr(u8)]
pub enum TransmitStatus {
    Ok = 0x00,
    NoAck = 0x01,
    Fail = 0x02,
    NotIdle = 0x03,
    NoRoute = 0x04,
}

impl TransmitStatus {
    pub fn is_ok(&self) -> bool {
        matches!(self, TransmitStatus::Ok)
    }
}
