// Error taxonomy for the header-chain store.

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("invalid header: {0}")]
    InvalidHeader(String),
    #[error("missing header at height {0}")]
    MissingHeader(u32),
    #[error("header file not found: {0}")]
    FileNotFound(String),
    #[error("header verification failed: {0}")]
    Verification(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;
