use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("serial port error: {0}")]
    Port(#[from] tokio_serial::Error),
    #[error("malformed frame: {0}")]
    Parse(String),
}

pub type Result<T> = std::result::Result<T, Error>;
