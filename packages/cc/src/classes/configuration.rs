use crate::classes::CommandClass;
use crate::context::CcContext;
use homewave_core::prelude::*;
use std::collections::BTreeMap;

const CONFIGURATION_SET: u8 = 0x04;
const CONFIGURATION_GET: u8 = 0x05;
const CONFIGURATION_REPORT: u8 = 0x06;

/// The packed value-id index nibble caps the parameter range.
const MAX_PARAMETER: u8 = 15;

/// COMMAND_CLASS_CONFIGURATION: device-specific tunables, usually only
/// described in the manual. Values appear lazily when the device first
/// reports a parameter, sized to what it reported.
#[derive(Debug, Default)]
pub struct Configuration {
    /// Secondary index, kept sorted ascending by parameter id.
    params: BTreeMap<u8, ValueId>,
}

impl Configuration {
    pub fn parameter_ids(&self) -> impl Iterator<Item = u8> + '_ {
        self.params.keys().copied()
    }

    pub fn parameter_value(&self, param: u8) -> Option<&ValueId> {
        self.params.get(&param)
    }

    /// Queues a Get for one parameter.
    pub fn request_param(&mut self, ctx: &mut CcContext<'_>, param: u8) {
        ctx.send_to_node(&[
            CommandClassId::Configuration as u8,
            CONFIGURATION_GET,
            param,
        ]);
        ctx.expect_report(CommandClassId::Configuration, CONFIGURATION_REPORT);
    }

    /// Queues a Set, choosing the width from the magnitude of `value`:
    /// nonzero high word takes 4 bytes, a nonzero high byte of the low
    /// word takes 2, everything else 1. Signed values sign-extend.
    pub fn set_param(&mut self, ctx: &mut CcContext<'_>, param: u8, value: i32) {
        let mut payload = vec![
            CommandClassId::Configuration as u8,
            CONFIGURATION_SET,
            param,
        ];
        let bytes = value.to_be_bytes();
        if value as u32 & 0xffff_0000 != 0 {
            payload.push(4);
            payload.extend_from_slice(&bytes);
        } else if value as u32 & 0x0000_ff00 != 0 {
            payload.push(2);
            payload.extend_from_slice(&bytes[2..]);
        } else {
            payload.push(1);
            payload.push(bytes[3]);
        }
        ctx.send_to_node(&payload);

        // Optimistic only when the parameter is already known; its width
        // then stays whatever the device reported
        if let Some(id) = self.params.get(&param).copied() {
            let data = match id.value_type() {
                ValueType::Byte => ValueData::Byte(value as u8),
                ValueType::Short => ValueData::Short(value as i16),
                _ => ValueData::Int(value),
            };
            ctx.write_value(&id, data);
        }
    }

    fn handle_report(&mut self, ctx: &mut CcContext<'_>, payload: &[u8], instance: u8) -> bool {
        let [_, param, size_field, rest @ ..] = payload else {
            return false;
        };
        let param = *param;
        let size = (size_field & 0x07) as usize;
        if !matches!(size, 1 | 2 | 4) || rest.len() < size {
            return false;
        }
        if param > MAX_PARAMETER {
            // The packed id cannot address it; drop the report
            return true;
        }

        let mut raw: u32 = 0;
        for byte in &rest[..size] {
            raw = (raw << 8) | u32::from(*byte);
        }

        let (value_type, data) = match size {
            1 => (ValueType::Byte, ValueData::Byte(raw as u8)),
            2 => (ValueType::Short, ValueData::Short(raw as i16)),
            _ => (ValueType::Int, ValueData::Int(raw as i32)),
        };
        let id = ctx.value_id(
            CommandClassId::Configuration,
            ValueGenre::Config,
            instance,
            param,
            value_type,
        );
        self.params.insert(param, id);

        let meta = ValueMeta::new(format!("Parameter #{}", param));
        ctx.upsert_value(Value::new(id, meta, data));
        true
    }
}

impl CommandClass for Configuration {
    fn class_id(&self) -> CommandClassId {
        CommandClassId::Configuration
    }

    fn create_values(&mut self, _ctx: &mut CcContext<'_>, _instance: u8) {
        // Parameters cannot be discovered over the air; they appear when
        // reported or requested
    }

    fn handle_msg(&mut self, ctx: &mut CcContext<'_>, payload: &[u8], instance: u8) -> bool {
        match payload.first() {
            Some(&CONFIGURATION_REPORT) => self.handle_report(ctx, payload, instance),
            _ => false,
        }
    }

    fn set_value(&mut self, ctx: &mut CcContext<'_>, value_id: &ValueId, data: &ValueData) -> bool {
        let value = match data {
            ValueData::Byte(b) => i32::from(*b),
            ValueData::Short(s) => i32::from(*s),
            ValueData::Int(i) => *i,
            _ => return false,
        };
        self.set_param(ctx, value_id.index(), value);
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

    fn run(test: impl FnOnce(&mut CcContext<'_>, &mut Configuration)) -> Vec<Message> {
        let mut store = ValueStore::new();
        let mut sink = Sink(Vec::new());
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
        let mut handler = Configuration::default();
        test(&mut ctx, &mut handler);
        sink.0
    }

    fn set_payload(message: &Message) -> Vec<u8> {
        // SOF LEN TYPE FUNC node len | cc payload | txopts cbid chk
        let mut framed = message.clone();
        framed.set_callback_id(1);
        let bytes = framed.serialize();
        let cc_len = bytes[5] as usize;
        bytes[6..6 + cc_len].to_vec()
    }

    #[test]
    fn test_width_selection() {
        let sent = run(|ctx, handler| {
            handler.set_param(ctx, 1, 0x7f);
            handler.set_param(ctx, 2, 0x1234);
            handler.set_param(ctx, 3, 0x0001_0000);
            handler.set_param(ctx, 4, -2);
        });

        assert_eq!(set_payload(&sent[0]), vec![0x70, 0x04, 1, 1, 0x7f]);
        assert_eq!(set_payload(&sent[1]), vec![0x70, 0x04, 2, 2, 0x12, 0x34]);
        assert_eq!(
            set_payload(&sent[2]),
            vec![0x70, 0x04, 3, 4, 0x00, 0x01, 0x00, 0x00]
        );
        // Negative values have all high bits set and go out as 4 bytes
        assert_eq!(
            set_payload(&sent[3]),
            vec![0x70, 0x04, 4, 4, 0xff, 0xff, 0xff, 0xfe]
        );
    }

    #[test]
    fn test_report_creates_sized_value() {
        run(|ctx, handler| {
            let report = [CONFIGURATION_REPORT, 5, 2, 0x01, 0x00];
            assert!(handler.handle_msg(ctx, &report, 1));
            let id = *handler.parameter_value(5).unwrap();
            assert_eq!(id.value_type(), ValueType::Short);
            assert_eq!(ctx.store.get(&id).unwrap().data, ValueData::Short(0x0100));
            assert_eq!(ctx.store.get(&id).unwrap().meta.label, "Parameter #5");
        });
    }

    #[test]
    fn test_params_stay_sorted() {
        run(|ctx, handler| {
            for param in [9, 2, 7] {
                let report = [CONFIGURATION_REPORT, param, 1, 0x00];
                handler.handle_msg(ctx, &report, 1);
            }
            let ids: Vec<u8> = handler.parameter_ids().collect();
            assert_eq!(ids, vec![2, 7, 9]);
        });
    }
}
