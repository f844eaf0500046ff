use crate::classes::{CommandClass, StateQuery};
use crate::context::CcContext;
use homewave_core::prelude::*;

const SWITCH_BINARY_SET: u8 = 0x01;
const SWITCH_BINARY_GET: u8 = 0x02;
const SWITCH_BINARY_REPORT: u8 = 0x03;

/// COMMAND_CLASS_SWITCH_BINARY: an on/off actuator.
#[derive(Debug, Default)]
pub struct BinarySwitch;

impl BinarySwitch {
    fn value_id(&self, ctx: &CcContext<'_>, instance: u8) -> ValueId {
        ctx.value_id(
            CommandClassId::BinarySwitch,
            ValueGenre::User,
            instance,
            0,
            ValueType::Bool,
        )
    }
}

impl CommandClass for BinarySwitch {
    fn class_id(&self) -> CommandClassId {
        CommandClassId::BinarySwitch
    }

    fn create_values(&mut self, ctx: &mut CcContext<'_>, instance: u8) {
        let id = self.value_id(ctx, instance);
        ctx.add_value(Value::new(id, ValueMeta::new("Switch"), ValueData::Bool(false)));
    }

    fn request_state(&mut self, ctx: &mut CcContext<'_>, query: StateQuery) {
        if query == StateQuery::Dynamic {
            ctx.send_to_node(&[CommandClassId::BinarySwitch as u8, SWITCH_BINARY_GET]);
            ctx.expect_report(CommandClassId::BinarySwitch, SWITCH_BINARY_REPORT);
        }
    }

    fn handle_msg(&mut self, ctx: &mut CcContext<'_>, payload: &[u8], instance: u8) -> bool {
        match payload {
            [SWITCH_BINARY_REPORT, level, ..] => {
                let id = self.value_id(ctx, instance);
                ctx.write_value(&id, ValueData::Bool(*level != 0));
                true
            }
            _ => false,
        }
    }

    fn set_value(&mut self, ctx: &mut CcContext<'_>, value_id: &ValueId, data: &ValueData) -> bool {
        let ValueData::Bool(on) = data else {
            return false;
        };
        if value_id.index() != 0 {
            return false;
        }
        // Optimistic: the local value flips now, the device's report
        // later confirms without a second notification
        ctx.write_value(value_id, data.clone());
        let level = if *on { 0xff } else { 0x00 };
        ctx.send_to_node(&[CommandClassId::BinarySwitch as u8, SWITCH_BINARY_SET, level]);
        true
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::context::{CcSideEffect, ExpectedReport, MessageSink};
    use homewave_serial::message::Message;

    struct Sink(Vec<Message>);

    impl MessageSink for Sink {
        fn send(&mut self, message: Message, _priority: SendPriority) {
            self.0.push(message);
        }
    }

    fn with_ctx(test: impl FnOnce(&mut CcContext<'_>, &mut BinarySwitch)) -> Vec<Notification> {
        let mut store = ValueStore::new();
        let mut sink = Sink(Vec::new());
        let mut notifications = Vec::new();
        let mut effects: Vec<CcSideEffect> = Vec::new();
        let mut expected: Vec<ExpectedReport> = Vec::new();
        let mut ctx = CcContext {
            home_id: HomeId::new(0xdeadbeef),
            node_id: NodeId::new(2),
            own_node_id: NodeId::new(1),
            store: &mut store,
            sink: &mut sink,
            notifications: &mut notifications,
            effects: &mut effects,
            expected: &mut expected,
        };
        let mut handler = BinarySwitch;
        handler.create_values(&mut ctx, 1);
        test(&mut ctx, &mut handler);
        notifications
    }

    #[test]
    fn test_optimistic_set_then_confirming_report() {
        let notifications = with_ctx(|ctx, handler| {
            let id = handler.value_id(ctx, 1);
            assert!(handler.set_value(ctx, &id, &ValueData::Bool(true)));
            // The confirming report must not notify again
            assert!(handler.handle_msg(ctx, &[SWITCH_BINARY_REPORT, 0xff], 1));
            // A contradicting report must
            assert!(handler.handle_msg(ctx, &[SWITCH_BINARY_REPORT, 0x00], 1));
        });

        let changes: Vec<_> = notifications
            .iter()
            .filter(|n| matches!(n, Notification::ValueChanged { .. }))
            .collect();
        assert_eq!(changes.len(), 2);
    }

    #[test]
    fn test_set_rejects_wrong_type() {
        with_ctx(|ctx, handler| {
            let id = handler.value_id(ctx, 1);
            assert!(!handler.set_value(ctx, &id, &ValueData::Int(1)));
        });
    }
}
