use crate::classes::CommandClass;
use crate::context::{CcContext, CcSideEffect};
use homewave_core::prelude::*;

const VERSION_GET: u8 = 0x11;
const VERSION_REPORT: u8 = 0x12;
const VERSION_COMMAND_CLASS_GET: u8 = 0x13;
const VERSION_COMMAND_CLASS_REPORT: u8 = 0x14;

/// COMMAND_CLASS_VERSION: firmware versions of the node and the
/// per-class versions the interview stores on each class slot.
#[derive(Debug, Default)]
pub struct Version;

impl Version {
    fn value_id(&self, ctx: &CcContext<'_>, instance: u8, index: u8) -> ValueId {
        ctx.value_id(
            CommandClassId::Version,
            ValueGenre::System,
            instance,
            index,
            ValueType::String,
        )
    }

    /// Queues a query for the node's implementation of one class.
    pub fn request_class_version(&mut self, ctx: &mut CcContext<'_>, class: CommandClassId) {
        ctx.send_to_node(&[
            CommandClassId::Version as u8,
            VERSION_COMMAND_CLASS_GET,
            class as u8,
        ]);
        ctx.expect_report(CommandClassId::Version, VERSION_COMMAND_CLASS_REPORT);
    }
}

impl CommandClass for Version {
    fn class_id(&self) -> CommandClassId {
        CommandClassId::Version
    }

    fn create_values(&mut self, ctx: &mut CcContext<'_>, instance: u8) {
        for (index, label) in [
            (0u8, "Library Version"),
            (1u8, "Protocol Version"),
            (2u8, "Application Version"),
        ] {
            let id = self.value_id(ctx, instance, index);
            ctx.add_value(Value::new(
                id,
                ValueMeta::new(label).readonly(),
                ValueData::String(String::new()),
            ));
        }
    }

    fn request_static(&mut self, ctx: &mut CcContext<'_>) {
        ctx.send_to_node(&[CommandClassId::Version as u8, VERSION_GET]);
        ctx.expect_report(CommandClassId::Version, VERSION_REPORT);
    }

    fn handle_msg(&mut self, ctx: &mut CcContext<'_>, payload: &[u8], instance: u8) -> bool {
        match payload {
            [VERSION_REPORT, library, proto_major, proto_minor, app_major, app_minor, ..] => {
                let values = [
                    (0u8, library.to_string()),
                    (1u8, format!("{}.{}", proto_major, proto_minor)),
                    (2u8, format!("{}.{}", app_major, app_minor)),
                ];
                for (index, text) in values {
                    let id = self.value_id(ctx, instance, index);
                    ctx.write_value(&id, ValueData::String(text));
                }
                true
            }
            [VERSION_COMMAND_CLASS_REPORT, class, version, ..] => {
                if let Ok(class) = CommandClassId::try_from(*class) {
                    ctx.effects.push(CcSideEffect::ClassVersion {
                        class,
                        version: *version,
                    });
                }
                true
            }
            _ => false,
        }
    }
}
