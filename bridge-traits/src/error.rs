use thiserror::Error;

#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("Bridge capability not available: {0}")]
    NotAvailable(String),

    #[error("Bridge operation failed: {0}")]
    OperationFailed(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Request rejected by server ({code}): {message}")]
    Rejected { code: u32, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl BridgeError {
    /// Whether the server answered but refused the request.
    pub fn is_rejection(&self) -> bool {
        matches!(self, BridgeError::Rejected { .. })
    }
}

pub type Result<T> = std::result::Result<T, BridgeError>;
