use crate::classes::{CommandClass, StateQuery};
use crate::context::CcContext;
use homewave_core::prelude::*;

const BASIC_SET: u8 = 0x01;
const BASIC_GET: u8 = 0x02;
const BASIC_REPORT: u8 = 0x03;

/// COMMAND_CLASS_BASIC. The least common denominator every device
/// speaks: one byte of state. Nodes with a real actuator class get
/// their Basic frames remapped before this handler ever sees them.
#[derive(Debug, Default)]
pub struct Basic;

impl Basic {
    fn value_id(&self, ctx: &CcContext<'_>, instance: u8) -> ValueId {
        ctx.value_id(
            CommandClassId::Basic,
            ValueGenre::User,
            instance,
            0,
            ValueType::Byte,
        )
    }
}

impl CommandClass for Basic {
    fn class_id(&self) -> CommandClassId {
        CommandClassId::Basic
    }

    fn create_values(&mut self, ctx: &mut CcContext<'_>, instance: u8) {
        let id = self.value_id(ctx, instance);
        ctx.add_value(Value::new(id, ValueMeta::new("Basic"), ValueData::Byte(0)));
    }

    fn request_state(&mut self, ctx: &mut CcContext<'_>, query: StateQuery) {
        if query == StateQuery::Dynamic {
            ctx.send_to_node(&[CommandClassId::Basic as u8, BASIC_GET]);
            ctx.expect_report(CommandClassId::Basic, BASIC_REPORT);
        }
    }

    fn handle_msg(&mut self, ctx: &mut CcContext<'_>, payload: &[u8], instance: u8) -> bool {
        match payload {
            // An unsolicited Set is a device-originated state change and
            // is treated like a report
            [BASIC_REPORT, level, ..] | [BASIC_SET, level, ..] => {
                let id = self.value_id(ctx, instance);
                ctx.write_value(&id, ValueData::Byte(*level));
                true
            }
            _ => false,
        }
    }

    fn set_value(&mut self, ctx: &mut CcContext<'_>, value_id: &ValueId, data: &ValueData) -> bool {
        let ValueData::Byte(level) = data else {
            return false;
        };
        if value_id.index() != 0 {
            return false;
        }
        ctx.write_value(value_id, data.clone());
        ctx.send_to_node(&[CommandClassId::Basic as u8, BASIC_SET, *level]);
        true
    }
}
