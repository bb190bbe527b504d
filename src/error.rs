use thiserror::Error;

#[derive(Debug, Error)]
pub enum HalogenError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("receive truncated: buffer holds {capacity} bytes, incoming message has {incoming}")]
    Truncation { capacity: usize, incoming: usize },

    #[error("pattern setup failed: {0}")]
    Setup(String),

    #[error("decode error: {0}")]
    Decode(String),

    #[error("allocation of {0} bytes failed")]
    Allocation(usize),
}

pub type Result<T> = std::result::Result<T, HalogenError>;
