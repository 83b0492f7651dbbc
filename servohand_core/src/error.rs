use thiserror::Error;

/// Framing and integrity failures on a single request/response exchange.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("timeout waiting for servo response")]
    Timeout,
    #[error("short response: expected {expected} bytes, got {got}")]
    ShortResponse { expected: usize, got: usize },
    #[error("response does not start with 0xFF 0xFF")]
    BadHeader,
    #[error("length byte {declared} does not match packet size {actual}")]
    BadLength { declared: usize, actual: usize },
    #[error("response from servo {got}, expected {expected}")]
    IdMismatch { expected: u8, got: u8 },
    #[error("checksum mismatch: declared {declared:#04x}, computed {computed:#04x}")]
    Checksum { declared: u8, computed: u8 },
    #[error("packet parameters too long: {0} bytes")]
    Oversized(usize),
}

#[derive(Debug, Error, Clone)]
pub enum HandError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),
    #[error("validation error: {0}")]
    Validation(String),
    #[error("invalid state: {0}")]
    State(String),
    #[error("unknown servo id {0}")]
    UnknownServo(u8),
    #[error("io error: {0}")]
    Io(String),
    #[error("format error: {0}")]
    Format(String),
}

impl From<std::io::Error> for HandError {
    fn from(e: std::io::Error) -> Self {
        HandError::Io(e.to_string())
    }
}

impl From<serde_json::Error> for HandError {
    fn from(e: serde_json::Error) -> Self {
        HandError::Format(e.to_string())
    }
}

impl HandError {
    /// Whether retrying the same exchange could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, HandError::Protocol(_) | HandError::Transport(_))
    }
}

#[derive(Debug, Error, Clone)]
pub enum BuildError {
    #[error("missing transport")]
    MissingTransport,
    #[error("invalid config: {0}")]
    InvalidConfig(&'static str),
}

pub type Result<T> = eyre::Result<T>;
pub use eyre::Report;
