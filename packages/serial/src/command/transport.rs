use crate::error::{Error, Result};
use bytes::Bytes;
use homewave_core::prelude::*;

/// Response to ZW_SEND_DATA: whether the stick queued the transmission.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SendDataResponse {
    pub accepted: bool,
}

impl SendDataResponse {
    pub fn parse(i: &[u8]) -> Result<Self> {
        match i.first() {
            Some(&status) => Ok(Self { accepted: status != 0 }),
            None => Err(Error::Parse("empty SEND_DATA response".into())),
        }
    }
}

/// Completion callback of ZW_SEND_DATA: the echoed callback id and the
/// radio-level delivery result.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SendDataCallback {
    pub callback_id: u8,
    pub tx_status: TransmitStatus,
}

impl SendDataCallback {
    pub fn parse(i: &[u8]) -> Result<Self> {
        if i.len() < 2 {
            return Err(Error::Parse("malformed SEND_DATA callback".into()));
        }
        let tx_status = TransmitStatus::try_from(i[1])
            .map_err(|_| Error::Parse(format!("unknown transmit status 0x{:02x}", i[1])))?;
        Ok(Self {
            callback_id: i[0],
            tx_status,
        })
    }

    pub fn is_ok(&self) -> bool {
        self.tx_status.is_ok()
    }
}

/// An unsolicited command-class frame from a node, as delivered by
/// APPLICATION_COMMAND_HANDLER. The payload starts with the class id.
#[derive(Debug, Clone, PartialEq)]
pub struct ApplicationCommand {
    pub rx_status: u8,
    pub source: NodeId,
    pub class_payload: Bytes,
}

impl ApplicationCommand {
    pub fn parse(i: &[u8]) -> Result<Self> {
        if i.len() < 3 {
            return Err(Error::Parse("malformed APPLICATION_COMMAND payload".into()));
        }
        let length = i[2] as usize;
        if length == 0 || i.len() < 3 + length {
            return Err(Error::Parse("truncated APPLICATION_COMMAND payload".into()));
        }
        Ok(Self {
            rx_status: i[0],
            source: NodeId::new(i[1]),
            class_payload: Bytes::copy_from_slice(&i[3..3 + length]),
        })
    }

    /// The command class id leading the payload.
    pub fn class_id_byte(&self) -> u8 {
        self.class_payload[0]
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_application_command() {
        // BinarySwitch::Report(0xff) from node 2
        let payload = hex::decode("0002032503ff").unwrap();
        let parsed = ApplicationCommand::parse(&payload).unwrap();
        assert_eq!(parsed.source, NodeId::new(2));
        assert_eq!(parsed.class_id_byte(), 0x25);
        assert_eq!(parsed.class_payload.as_ref(), &[0x25, 0x03, 0xff]);
    }

    #[test]
    fn test_send_data_callback() {
        let parsed = SendDataCallback::parse(&hex::decode("2100").unwrap()).unwrap();
        assert_eq!(parsed.callback_id, 0x21);
        assert!(parsed.is_ok());

        let parsed = SendDataCallback::parse(&hex::decode("2101").unwrap()).unwrap();
        assert_eq!(parsed.tx_status, TransmitStatus::NoAck);
    }
}
