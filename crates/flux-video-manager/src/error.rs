use thiserror::Error;

#[derive(Error, Debug)]
pub enum VideoError {
    #[error("Unsupported endpoint: {0}")]
    UnsupportedEndpoint(String),

    #[error("Unsupported operation: {0}")]
    Unsupported(&'static str),

    #[error("Receiver error: {0}")]
    Receiver(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, VideoError>;
