pub use crate::callback_id::CallbackIdGen;
pub use crate::checksum::frame_checksum;
pub use crate::definitions::*;
pub use crate::notification::{Notification, NotificationCode};
pub use crate::value::{
    ListItem, ListValue, Value, ValueData, ValueGenre, ValueId, ValueMeta, ValueType,
};
pub use crate::value_store::{ValueStore, WriteOutcome};
