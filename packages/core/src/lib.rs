pub mod callback_id;
pub mod checksum;
pub mod definitions;
pub mod notification;
pub mod prelude;
pub mod value;
pub mod value_store;
