use thiserror::Error;

#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error(transparent)]
    Source(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, SettingsError>;
