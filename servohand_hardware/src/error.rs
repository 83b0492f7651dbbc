use thiserror::Error;

#[derive(Debug, Error)]
pub enum HwError {
    #[error("serial port unavailable: {0}")]
    PortUnavailable(String),
    #[error("transport closed")]
    Closed,
    #[error("bus read timeout")]
    Timeout,
    #[error("serial error: {0}")]
    Serial(String),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, HwError>;
