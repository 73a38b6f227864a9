use std::path::PathBuf;

use crate::transport::BoxError;

/// Error type returned by this crate.
#[derive(Debug, thiserror::Error)]
pub enum HttpError {
    /// The configured or query-augmented URL could not be parsed.
    #[error("invalid url '{url}': {message}")]
    InvalidUrl { url: String, message: String },
    /// Network-level failure reported by the transport, after the retry
    /// budget was spent.
    #[error("transport error: {0}")]
    Transport(BoxError),
    /// Request body could not be serialized.
    #[error("encode error: {0}")]
    Encode(String),
    /// Response body could not be deserialized.
    #[error("decode error: {0}")]
    Decode(String),
    /// Attachment or destination file could not be read or written.
    #[error("file error for '{}': {source}", .path.display())]
    FileIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// The cancellation token fired or the deadline elapsed.
    #[error("request cancelled")]
    Cancelled,
    /// The response body stream was already handed out.
    #[error("response body already consumed")]
    BodyConsumed,
}

/// Coarse classification of [`HttpError`].
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum ErrorKind {
    InvalidUrl,
    TransportError,
    EncodeError,
    DecodeError,
    FileIoError,
    Cancelled,
    BodyConsumed,
}

impl HttpError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidUrl { .. } => ErrorKind::InvalidUrl,
            Self::Transport(_) => ErrorKind::TransportError,
            Self::Encode(_) => ErrorKind::EncodeError,
            Self::Decode(_) => ErrorKind::DecodeError,
            Self::FileIo { .. } => ErrorKind::FileIoError,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::BodyConsumed => ErrorKind::BodyConsumed,
        }
    }

    pub(crate) fn file(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::FileIo {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn invalid_url(url: &str, message: impl ToString) -> Self {
        Self::InvalidUrl {
            url: url.to_owned(),
            message: message.to_string(),
        }
    }
}

impl From<reqwest::Error> for HttpError {
    fn from(err: reqwest::Error) -> Self {
        Self::Transport(Box::new(err))
    }
}
