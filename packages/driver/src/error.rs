use thiserror::Error;

/// The error taxonomy of the driver. Transport errors retry silently up
/// to the retry cap and then surface as a `MessageFailed` notification;
/// protocol errors are logged and the frame dropped; state and value
/// errors surface as `false` from the public API; config errors always
/// degrade instead of failing a driver.
#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Serial(#[from] homewave_serial::error::Error),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("invalid state: {0}")]
    State(String),
    #[error("value error: {0}")]
    Value(String),
    #[error("device database gap: {0}")]
    Config(String),
    #[error("operation timed out")]
    Timeout,
    #[error("driver shut down")]
    ShutDown,
}

pub type Result<T> = std::result::Result<T, Error>;
