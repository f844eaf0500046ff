use crate::classes::CommandClass;
use crate::context::CcContext;
use homewave_core::prelude::*;

/// COMMAND_CLASS_NO_OPERATION. Carries no commands and no values; a
/// round-trip is used to probe whether a node is reachable.
#[derive(Debug, Default)]
pub struct NoOperation;

impl CommandClass for NoOperation {
    fn class_id(&self) -> CommandClassId {
        CommandClassId::NoOperation
    }

    fn create_values(&mut self, _ctx: &mut CcContext<'_>, _instance: u8) {}

    fn handle_msg(&mut self, _ctx: &mut CcContext<'_>, _payload: &[u8], _instance: u8) -> bool {
        // Receiving a NoOp is legal and means nothing
        true
    }
}
