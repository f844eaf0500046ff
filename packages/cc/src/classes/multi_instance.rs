use crate::classes::CommandClass;
use crate::context::{CcContext, CcSideEffect};
use homewave_core::prelude::*;

const MULTI_INSTANCE_GET: u8 = 0x04;
const MULTI_INSTANCE_REPORT: u8 = 0x05;
const MULTI_INSTANCE_CMD_ENCAP: u8 = 0x06;

/// COMMAND_CLASS_MULTI_INSTANCE: some nodes expose several independent
/// channels of one class. This handler learns the counts; the driver
/// unwraps encapsulated frames before dispatch.
#[derive(Debug, Default)]
pub struct MultiInstance;

impl MultiInstance {
    /// Queues an instance-count query for one class.
    pub fn request_instances(&mut self, ctx: &mut CcContext<'_>, class: CommandClassId) {
        ctx.send_to_node(&[
            CommandClassId::MultiInstance as u8,
            MULTI_INSTANCE_GET,
            class as u8,
        ]);
        ctx.expect_report(CommandClassId::MultiInstance, MULTI_INSTANCE_REPORT);
    }
}

/// Splits a MultiInstance encapsulation into (instance, inner class
/// payload). The inner payload again starts with a class id.
pub fn unwrap_encap(class_payload: &[u8]) -> Option<(u8, &[u8])> {
    match class_payload {
        [class, MULTI_INSTANCE_CMD_ENCAP, instance, inner @ ..]
            if *class == CommandClassId::MultiInstance as u8 && !inner.is_empty() =>
        {
            Some((*instance, inner))
        }
        _ => None,
    }
}

impl CommandClass for MultiInstance {
    fn class_id(&self) -> CommandClassId {
        CommandClassId::MultiInstance
    }

    fn create_values(&mut self, _ctx: &mut CcContext<'_>, _instance: u8) {}

    fn handle_msg(&mut self, ctx: &mut CcContext<'_>, payload: &[u8], _instance: u8) -> bool {
        match payload {
            [MULTI_INSTANCE_REPORT, class, count, ..] => {
                if let Ok(class) = CommandClassId::try_from(*class) {
                    ctx.effects.push(CcSideEffect::InstanceCount {
                        class,
                        count: *count,
                    });
                }
                true
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_unwrap_encap() {
        // MultiInstance encap of BinarySwitch::Report(0xff) on instance 2
        let payload = [0x60, 0x06, 0x02, 0x25, 0x03, 0xff];
        let (instance, inner) = unwrap_encap(&payload).unwrap();
        assert_eq!(instance, 2);
        assert_eq!(inner, &[0x25, 0x03, 0xff]);

        assert!(unwrap_encap(&[0x60, 0x05, 0x25, 0x02]).is_none());
        assert!(unwrap_encap(&[0x25, 0x03, 0xff]).is_none());
    }
}
