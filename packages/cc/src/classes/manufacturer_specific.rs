use crate::classes::CommandClass;
use crate::context::{CcContext, CcSideEffect};
use homewave_core::prelude::*;

const MANUFACTURER_SPECIFIC_GET: u8 = 0x04;
const MANUFACTURER_SPECIFIC_REPORT: u8 = 0x05;

/// COMMAND_CLASS_MANUFACTURER_SPECIFIC: the 16-bit triple that
/// identifies make and model. Feeds the node registry and the device
/// database lookup rather than the value store.
#[derive(Debug, Default)]
pub struct ManufacturerSpecific;

impl CommandClass for ManufacturerSpecific {
    fn class_id(&self) -> CommandClassId {
        CommandClassId::ManufacturerSpecific
    }

    fn create_values(&mut self, _ctx: &mut CcContext<'_>, _instance: u8) {}

    fn request_static(&mut self, ctx: &mut CcContext<'_>) {
        ctx.send_to_node(&[
            CommandClassId::ManufacturerSpecific as u8,
            MANUFACTURER_SPECIFIC_GET,
        ]);
        ctx.expect_report(
            CommandClassId::ManufacturerSpecific,
            MANUFACTURER_SPECIFIC_REPORT,
        );
    }

    fn handle_msg(&mut self, ctx: &mut CcContext<'_>, payload: &[u8], _instance: u8) -> bool {
        match payload {
            [MANUFACTURER_SPECIFIC_REPORT, m0, m1, t0, t1, p0, p1, ..] => {
                ctx.effects.push(CcSideEffect::Manufacturer {
                    manufacturer_id: (u16::from(*m0) << 8) | u16::from(*m1),
                    product_type: (u16::from(*t0) << 8) | u16::from(*t1),
                    product_id: (u16::from(*p0) << 8) | u16::from(*p1),
                });
                true
            }
            _ => false,
        }
    }
}
