use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Source unavailable: {0}")]
    SourceUnavailable(String),

    #[error("Detection failed: {0}")]
    DetectionFailed(String),

    #[error("Projection failed: {0}")]
    ProjectionFailed(String),

    #[error("Processing cancelled")]
    Cancelled,

    #[error("IO Error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Json Error: {0}")]
    Json(#[from] serde_json::Error),

    #[cfg(feature = "opencv")]
    #[error("OpenCV Error: {0}")]
    OpenCv(#[from] opencv::Error),
}

/// Coarse failure category a caller maps to a user-facing message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidInput,
    SourceUnavailable,
    DetectionFailed,
    ProjectionFailed,
    Cancelled,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::InvalidInput(_) | Error::Json(_) => ErrorKind::InvalidInput,
            Error::SourceUnavailable(_) | Error::Io(_) => ErrorKind::SourceUnavailable,
            Error::DetectionFailed(_) => ErrorKind::DetectionFailed,
            Error::ProjectionFailed(_) => ErrorKind::ProjectionFailed,
            Error::Cancelled => ErrorKind::Cancelled,
            #[cfg(feature = "opencv")]
            Error::OpenCv(_) => ErrorKind::SourceUnavailable,
        }
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }
}
