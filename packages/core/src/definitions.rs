mod command_class_id;
mod controller;
mod device_class;
mod function_type;
mod home_id;
mod node_id;
mod protocol_info;
mod send_priority;
mod transmit;

pub use command_class_id::*;
pub use controller::*;
pub use device_class::*;
pub use function_type::*;
pub use home_id::*;
pub use node_id::*;
pub use protocol_info::*;
pub use send_priority::*;
pub use transmit::*;
