/// Shared error type used across the Fieldlink crates.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("credentials: {0}")]
    Credentials(String),
}

pub type Result<T> = std::result::Result<T, Error>;
