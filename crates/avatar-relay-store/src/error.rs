use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    /// The store answered with a non-success status.
    #[error("document store returned status {status}: {message}")]
    Http { status: u16, message: String },

    #[error("document store request failed: {0}")]
    Transport(String),

    #[error("malformed document store response: {0}")]
    Decode(String),

    #[error("invalid store configuration: {0}")]
    Config(String),
}

impl StoreError {
    /// HTTP status the store itself reported, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            StoreError::Http { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for StoreError {
    fn from(e: reqwest::Error) -> Self {
        StoreError::Transport(e.to_string())
    }
}
