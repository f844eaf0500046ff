pub use crate::command::*;
pub use crate::error::{Error, Result};
pub use crate::frame::{ControlByte, RawFrame};
pub use crate::message::Message;
pub use crate::port::{MockPort, MockRemote, SerialBinding, SerialPort};
