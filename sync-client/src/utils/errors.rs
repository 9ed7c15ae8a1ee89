//! Client error taxonomy.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid path: {0}")]
    InvalidPath(String),

    #[error("network error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("server rejected request: {status} {body}")]
    ServerRejected { status: u16, body: String },

    #[error("upload of {path} failed after {attempts} attempts: {source}")]
    UploadFailed {
        path: String,
        attempts: u32,
        #[source]
        source: Box<ClientError>,
    },

    #[error("sync pass cancelled")]
    Cancelled,
}

pub type Result<T> = std::result::Result<T, ClientError>;
