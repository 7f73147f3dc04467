use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Malformed PSBT: {0}")]
    MalformedInput(String),

    #[error("Structural mismatch: {0}")]
    StructuralMismatch(String),

    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("Device transport error: {0}")]
    DeviceTransport(String),

    #[error("Invalid params: {0}")]
    InvalidParams(String),

    #[error("Base64 error: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    pub(crate) fn malformed(msg: impl Into<String>) -> Self {
        Error::MalformedInput(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
