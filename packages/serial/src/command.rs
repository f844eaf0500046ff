use crate::error::{Error, Result};
use crate::frame;
use bytes::Bytes;
use homewave_core::prelude::*;

mod capability;
mod network;
mod transport;

pub use capability::*;
pub use network::*;
pub use transport::*;

/// A checksum-validated data frame, split into its envelope fields.
#[derive(Debug, Clone, PartialEq)]
pub struct DataFrame {
    pub kind: FrameKind,
    pub function_byte: u8,
    pub payload: Bytes,
}

impl DataFrame {
    /// Splits a complete frame (SOF through checksum). Fails on short
    /// frames, bad checksums, and unknown TYPE bytes; the caller NAKs.
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < 5 {
            return Err(Error::Parse(format!("frame too short: {} bytes", bytes.len())));
        }
        if !frame::verify_checksum(bytes) {
            return Err(Error::Parse("checksum mismatch".into()));
        }
        let kind = FrameKind::try_from(bytes[2])
            .map_err(|_| Error::Parse(format!("unknown frame type 0x{:02x}", bytes[2])))?;
        Ok(Self {
            kind,
            function_byte: bytes[3],
            payload: Bytes::copy_from_slice(&bytes[4..bytes.len() - 1]),
        })
    }

    pub fn function(&self) -> Option<FunctionType> {
        FunctionType::try_from(self.function_byte).ok()
    }
}

/// Every inbound frame the driver understands, decoded. Frames with a
/// recognized function but malformed payload are a protocol error; the
/// frame is logged and discarded upstream.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    GetVersionResponse(GetVersionResponse),
    MemoryGetIdResponse(MemoryGetIdResponse),
    GetInitDataResponse(GetInitDataResponse),
    GetNodeProtocolInfoResponse(GetNodeProtocolInfoResponse),
    RequestNodeInfoResponse(RequestNodeInfoResponse),
    ApplicationUpdate(ApplicationUpdate),
    SendDataResponse(SendDataResponse),
    SendDataCallback(SendDataCallback),
    ApplicationCommand(ApplicationCommand),
    AddNodeCallback(AddNodeCallback),
    RemoveNodeCallback(RemoveNodeCallback),
    NetworkManagementCallback(NetworkManagementCallback),
    Unknown(DataFrame),
}

impl Command {
    pub fn parse(frame: &DataFrame) -> Result<Self> {
        let payload = frame.payload.as_ref();
        let cmd = match (frame.kind, frame.function()) {
            (FrameKind::Response, Some(FunctionType::GetVersion)) => {
                Command::GetVersionResponse(GetVersionResponse::parse(payload)?)
            }
            (FrameKind::Response, Some(FunctionType::MemoryGetId)) => {
                Command::MemoryGetIdResponse(MemoryGetIdResponse::parse(payload)?)
            }
            (FrameKind::Response, Some(FunctionType::GetInitData)) => {
                Command::GetInitDataResponse(GetInitDataResponse::parse(payload)?)
            }
            (FrameKind::Response, Some(FunctionType::GetNodeProtocolInfo)) => {
                Command::GetNodeProtocolInfoResponse(GetNodeProtocolInfoResponse::parse(payload)?)
            }
            (FrameKind::Response, Some(FunctionType::RequestNodeInfo)) => {
                Command::RequestNodeInfoResponse(RequestNodeInfoResponse::parse(payload)?)
            }
            (FrameKind::Request, Some(FunctionType::ApplicationUpdate)) => {
                Command::ApplicationUpdate(ApplicationUpdate::parse(payload)?)
            }
            (FrameKind::Response, Some(FunctionType::SendData)) => {
                Command::SendDataResponse(SendDataResponse::parse(payload)?)
            }
            (FrameKind::Request, Some(FunctionType::SendData)) => {
                Command::SendDataCallback(SendDataCallback::parse(payload)?)
            }
            (FrameKind::Request, Some(FunctionType::ApplicationCommandHandler)) => {
                Command::ApplicationCommand(ApplicationCommand::parse(payload)?)
            }
            (FrameKind::Request, Some(FunctionType::AddNodeToNetwork)) => {
                Command::AddNodeCallback(AddNodeCallback::parse(payload)?)
            }
            (FrameKind::Request, Some(FunctionType::RemoveNodeFromNetwork)) => {
                Command::RemoveNodeCallback(RemoveNodeCallback::parse(payload)?)
            }
            (
                FrameKind::Request,
                Some(
                    function @ (FunctionType::SetDefault
                    | FunctionType::RequestNodeNeighborUpdate
                    | FunctionType::RequestNetworkUpdate),
                ),
            ) => Command::NetworkManagementCallback(NetworkManagementCallback::parse(
                function, payload,
            )?),
            _ => Command::Unknown(frame.clone()),
        };
        Ok(cmd)
    }

    /// The echoed callback id, for frames that complete a transaction
    /// out of band.
    pub fn callback_id(&self) -> Option<u8> {
        match self {
            Command::SendDataCallback(cb) => Some(cb.callback_id),
            Command::AddNodeCallback(cb) => Some(cb.callback_id),
            Command::RemoveNodeCallback(cb) => Some(cb.callback_id),
            Command::NetworkManagementCallback(cb) => Some(cb.callback_id),
            _ => None,
        }
    }

    /// Whether this frame answers a request for the given function.
    pub fn is_response_to(&self, function: FunctionType) -> bool {
        match self {
            Command::GetVersionResponse(_) => function == FunctionType::GetVersion,
            Command::MemoryGetIdResponse(_) => function == FunctionType::MemoryGetId,
            Command::GetInitDataResponse(_) => function == FunctionType::GetInitData,
            Command::GetNodeProtocolInfoResponse(_) => {
                function == FunctionType::GetNodeProtocolInfo
            }
            Command::RequestNodeInfoResponse(_) => function == FunctionType::RequestNodeInfo,
            Command::SendDataResponse(_) => function == FunctionType::SendData,
            _ => false,
        }
    }
}
