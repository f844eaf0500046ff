use crate::context::CcContext;
use enum_dispatch::enum_dispatch;
use homewave_core::prelude::*;

pub mod association;
pub mod basic;
pub mod binary_switch;
pub mod configuration;
pub mod manufacturer_specific;
pub mod multi_instance;
pub mod no_operation;
pub mod version;
pub mod wake_up;

pub use association::Association;
pub use basic::Basic;
pub use binary_switch::BinarySwitch;
pub use configuration::Configuration;
pub use manufacturer_specific::ManufacturerSpecific;
pub use multi_instance::{MultiInstance, unwrap_encap};
pub use no_operation::NoOperation;
pub use version::Version;
pub use wake_up::WakeUp;

/// Which flavor of runtime values a state query should refresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateQuery {
    /// Values needed for a useful view that may still change, like the
    /// wake-up interval.
    Session,
    /// Values expected to change at any time: readings, switch state.
    Dynamic,
}

/// The plug-in contract every command class implements. A handler is a
/// small state holder bound to one (node, class) pair; instances are a
/// parameter, not separate handlers.
///
/// Handlers must be optimistic: an outbound set writes the local value
/// and raises `ValueChanged` immediately, so a later report from the
/// device either confirms idempotently or reverts.
#[enum_dispatch]
pub trait CommandClass {
    fn class_id(&self) -> CommandClassId;

    /// Creates the values this class owns for the given instance.
    fn create_values(&mut self, ctx: &mut CcContext<'_>, instance: u8);

    /// Queues queries for values that never change at runtime.
    fn request_static(&mut self, ctx: &mut CcContext<'_>) {
        let _ = ctx;
    }

    /// Queues queries for session or dynamic values.
    fn request_state(&mut self, ctx: &mut CcContext<'_>, query: StateQuery) {
        let _ = (ctx, query);
    }

    /// Decodes one inbound frame of this class. `payload[0]` is the
    /// command byte, the class id has already been consumed. Returns
    /// whether the frame was understood.
    fn handle_msg(&mut self, ctx: &mut CcContext<'_>, payload: &[u8], instance: u8) -> bool;

    /// Encodes an outbound change of one of this class's values.
    /// Returns `false` when the value does not belong to this class or
    /// the payload type does not fit.
    fn set_value(&mut self, ctx: &mut CcContext<'_>, value_id: &ValueId, data: &ValueData) -> bool {
        let _ = (ctx, value_id, data);
        false
    }
}

/// All implemented command classes, dispatchable by id.
#[enum_dispatch(CommandClass)]
#[derive(Debug)]
pub enum CcHandler {
    NoOperation,
    Basic,
    BinarySwitch,
    Configuration,
    ManufacturerSpecific,
    MultiInstance,
    WakeUp,
    Association,
    Version,
}

/// Builds the handler for a class id, or `None` for classes this
/// library only recognizes by name.
pub fn create_handler(class: CommandClassId) -> Option<CcHandler> {
    Some(match class {
        CommandClassId::NoOperation => NoOperation::default().into(),
        CommandClassId::Basic => Basic::default().into(),
        CommandClassId::BinarySwitch => BinarySwitch::default().into(),
        CommandClassId::Configuration => Configuration::default().into(),
        CommandClassId::ManufacturerSpecific => ManufacturerSpecific::default().into(),
        CommandClassId::MultiInstance => MultiInstance::default().into(),
        CommandClassId::WakeUp => WakeUp::default().into(),
        CommandClassId::Association => Association::default().into(),
        CommandClassId::Version => Version::default().into(),
        CommandClassId::MultilevelSwitch
        | CommandClassId::MultilevelSensor
        | CommandClassId::Battery => return None,
    })
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_factory_covers_implemented_classes() {
        for class in [
            CommandClassId::Basic,
            CommandClassId::BinarySwitch,
            CommandClassId::Configuration,
            CommandClassId::WakeUp,
            CommandClassId::Association,
            CommandClassId::Version,
        ] {
            let handler = create_handler(class).expect("handler exists");
            assert_eq!(handler.class_id(), class);
        }
        assert!(create_handler(CommandClassId::Battery).is_none());
    }
}
