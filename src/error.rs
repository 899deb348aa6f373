#[derive(Debug, thiserror::Error)]
pub enum MemoryError {
    #[error("storage error: {0}")]
    Storage(String),
    #[error("malformed document: {0}")]
    Malformed(String),
    #[error("invalid patient id: {0:?}")]
    InvalidPatientId(String),
}

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("request failed: {0}")]
    Request(String),
    #[error("API returned {status}: {body}")]
    Api { status: u16, body: String },
    #[error("failed to parse response: {0}")]
    Parse(String),
}

#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error("memory error: {0}")]
    Memory(#[from] MemoryError),
    #[error("provider error: {0}")]
    Provider(#[from] ProviderError),
    #[error("provider call timed out")]
    Timeout,
    #[error("turn cancelled")]
    Cancelled,
}
