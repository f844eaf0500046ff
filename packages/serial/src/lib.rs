pub mod codec;
pub mod command;
pub mod error;
pub mod frame;
pub mod message;
pub mod port;
pub mod prelude;
