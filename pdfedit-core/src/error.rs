use thiserror::Error;

/// Which side of the contract a failure came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The request never produced a usable response.
    Transport,
    /// The server answered with `success: false` or an error status.
    Server,
    /// A local precondition did not hold, so nothing was sent.
    Precondition,
}

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("network error: {0}")]
    Transport(String),

    #[error("failed to decode server response: {0}")]
    Decode(String),

    /// Message reported by the server, surfaced verbatim.
    #[error("{0}")]
    Server(String),

    #[error("no document loaded")]
    NoDocument,

    #[error("edit mode is not active")]
    NotEditing,

    #[error("no text block selected")]
    NothingSelected,

    #[error("page {page} has no selectable text block {index}")]
    NoSuchBlock { page: u32, index: usize },

    #[error("{0}")]
    InvalidInput(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

impl ClientError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ClientError::Transport(_) | ClientError::Decode(_) | ClientError::Io(_) => {
                ErrorKind::Transport
            }
            ClientError::Server(_) => ErrorKind::Server,
            ClientError::NoDocument
            | ClientError::NotEditing
            | ClientError::NothingSelected
            | ClientError::NoSuchBlock { .. }
            | ClientError::InvalidInput(_) => ErrorKind::Precondition,
        }
    }
}

pub type ClientResult<T> = std::result::Result<T, ClientError>;
