use thiserror::Error;

/// Every failure mode the protocol core can surface, per the error-kind
/// enumeration in the specification.
#[derive(Debug, Error)]
pub enum Error {
    #[error("malformed callsign: {0}")]
    MalformedCallsign(String),

    #[error("malformed path: {0}")]
    MalformedPath(String),

    #[error("FCS mismatch: expected {expected:04x}, got {actual:04x}")]
    BadFcs { expected: u16, actual: u16 },

    #[error("truncated frame: needed at least {needed} bytes, got {got}")]
    Truncated { needed: usize, got: usize },

    #[error("unknown AX.25 control variant: {0:#04x}")]
    UnknownVariant(u8),

    #[error("KISS protocol error: {0}")]
    KissProtocolError(String),

    #[error("port {0} is out of range (0..=15)")]
    PortOutOfRange(u8),

    #[error("device is closed")]
    DeviceClosed,

    #[error("transmit queue full")]
    QueueFull,

    #[error("malformed APRS payload: {0}")]
    MalformedAprsPayload(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
