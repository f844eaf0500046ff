use derive_try_from_primitive::*;

/// The Serial API calls used by this library. One byte on the wire,
/// directly after the frame type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, TryFromPrimitive)]
#[repr(u8)]
pub enum FunctionType {
    GetInitData = 0x02,
    ApplicationCommandHandler = 0x04,
    SerialSoftReset = 0x08,
    SendData = 0x13,
    GetVersion = 0x15,
    MemoryGetId = 0x20,
    GetNodeProtocolInfo = 0x41,
    SetDefault = 0x42,
    RequestNodeNeighborUpdate = 0x48,
    ApplicationUpdate = 0x49,
    AddNodeToNetwork = 0x4a,
    RemoveNodeFromNetwork = 0x4b,
    RequestNetworkUpdate = 0x53,
    RequestNodeInfo = 0x60,
}

/// The TYPE byte of a data frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive)]
#[repr(u8)]
pub enum FrameKind {
    Request = 0x00,
    Response = 0x01,
}
