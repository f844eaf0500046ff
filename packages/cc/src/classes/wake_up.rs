use crate::classes::{CommandClass, StateQuery};
use crate::context::CcContext;
use homewave_core::prelude::*;

pub const WAKE_UP_INTERVAL_SET: u8 = 0x04;
pub const WAKE_UP_INTERVAL_GET: u8 = 0x05;
pub const WAKE_UP_INTERVAL_REPORT: u8 = 0x06;
pub const WAKE_UP_NOTIFICATION: u8 = 0x07;
pub const WAKE_UP_NO_MORE_INFORMATION: u8 = 0x08;

/// The frame that lets a battery node go back to sleep once its queue
/// has drained.
pub const NO_MORE_INFORMATION_PAYLOAD: [u8; 2] =
    [CommandClassId::WakeUp as u8, WAKE_UP_NO_MORE_INFORMATION];

/// COMMAND_CLASS_WAKE_UP: battery nodes sleep and only listen briefly
/// every interval. The driver owns the pending queue; this handler owns
/// the interval value and the frame encodings.
#[derive(Debug, Default)]
pub struct WakeUp;

impl WakeUp {
    fn interval_id(&self, ctx: &CcContext<'_>, instance: u8) -> ValueId {
        ctx.value_id(
            CommandClassId::WakeUp,
            ValueGenre::System,
            instance,
            0,
            ValueType::Int,
        )
    }
}

impl CommandClass for WakeUp {
    fn class_id(&self) -> CommandClassId {
        CommandClassId::WakeUp
    }

    fn create_values(&mut self, ctx: &mut CcContext<'_>, instance: u8) {
        let id = self.interval_id(ctx, instance);
        ctx.add_value(Value::new(
            id,
            ValueMeta::new("Wake-up Interval").units("seconds"),
            ValueData::Int(0),
        ));
    }

    fn request_state(&mut self, ctx: &mut CcContext<'_>, query: StateQuery) {
        if query == StateQuery::Session {
            ctx.send_to_node(&[CommandClassId::WakeUp as u8, WAKE_UP_INTERVAL_GET]);
            ctx.expect_report(CommandClassId::WakeUp, WAKE_UP_INTERVAL_REPORT);
        }
    }

    fn handle_msg(&mut self, ctx: &mut CcContext<'_>, payload: &[u8], instance: u8) -> bool {
        match payload {
            [WAKE_UP_INTERVAL_REPORT, b0, b1, b2, ..] => {
                let seconds =
                    (u32::from(*b0) << 16) | (u32::from(*b1) << 8) | u32::from(*b2);
                let id = self.interval_id(ctx, instance);
                ctx.write_value(&id, ValueData::Int(seconds as i32));
                true
            }
            [WAKE_UP_NOTIFICATION, ..] => {
                // The driver watches for this before dispatch and flushes
                // the node's pending queue; nothing to record here
                true
            }
            _ => false,
        }
    }

    fn set_value(&mut self, ctx: &mut CcContext<'_>, value_id: &ValueId, data: &ValueData) -> bool {
        let ValueData::Int(seconds) = data else {
            return false;
        };
        ctx.write_value(value_id, data.clone());
        let bytes = (*seconds as u32).to_be_bytes();
        ctx.send_to_node(&[
            CommandClassId::WakeUp as u8,
            WAKE_UP_INTERVAL_SET,
            bytes[1],
            bytes[2],
            bytes[3],
            // Wake-up notifications should come to us
            u8::from(ctx.own_node_id),
        ]);
        true
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::context::{CcSideEffect, ExpectedReport, MessageSink};
    use homewave_serial::message::Message;

    struct Sink;

    impl MessageSink for Sink {
        fn send(&mut self, _message: Message, _priority: SendPriority) {}
    }

    #[test]
    fn test_interval_report() {
        let mut store = ValueStore::new();
        let mut sink = Sink;
        let mut notifications = Vec::new();
        let mut effects: Vec<CcSideEffect> = Vec::new();
        let mut expected: Vec<ExpectedReport> = Vec::new();
        let mut ctx = CcContext {
            home_id: HomeId::new(0xdeadbeef),
            node_id: NodeId::new(3),
            own_node_id: NodeId::new(1),
            store: &mut store,
            sink: &mut sink,
            notifications: &mut notifications,
            effects: &mut effects,
            expected: &mut expected,
        };
        let mut handler = WakeUp;
        handler.create_values(&mut ctx, 1);

        // 600 seconds = 0x000258
        assert!(handler.handle_msg(&mut ctx, &[WAKE_UP_INTERVAL_REPORT, 0x00, 0x02, 0x58], 1));
        let id = handler.interval_id(&ctx, 1);
        assert_eq!(ctx.store.get(&id).unwrap().data, ValueData::Int(600));
    }
}
