use std::io;

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BridgeError {
    #[error("native write failed with status {0}")]
    TransportWrite(i32),

    #[error("response aborted after an earlier write failure")]
    ResponseAborted,

    #[error("malformed request: {0}")]
    MalformedRequest(String),

    #[error("a bridge is already installed in this process")]
    AlreadyInstalled,
}

pub type BridgeResult<T> = std::result::Result<T, BridgeError>;

impl From<BridgeError> for io::Error {
    fn from(err: BridgeError) -> Self {
        let kind = match err {
            BridgeError::TransportWrite(_) | BridgeError::ResponseAborted => io::ErrorKind::BrokenPipe,
            BridgeError::MalformedRequest(_) => io::ErrorKind::InvalidData,
            BridgeError::AlreadyInstalled => io::ErrorKind::AlreadyExists,
        };
        io::Error::new(kind, err)
    }
}
