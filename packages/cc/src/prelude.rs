pub use crate::classes::{
    Association, Basic, BinarySwitch, CcHandler, CommandClass, Configuration,
    ManufacturerSpecific, MultiInstance, NoOperation, StateQuery, Version, WakeUp, create_handler,
    unwrap_encap, wake_up,
};
pub use crate::context::{CcContext, CcSideEffect, ExpectedReport, MessageSink};
