use std::time::Duration;

pub type Result<T> = std::result::Result<T, Error>;

/// Coarse class of a failed exchange, for logs and error classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum TransportErrorKind {
    /// The request could not be built (bad URL, scheme or header).
    Request,
    /// No connection, or the connection dropped before a response head.
    Connect,
    Timeout,
    /// The response head arrived but its body could not be read.
    Body,
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid url `{0}`")]
    InvalidUrl(String),

    #[error("unsupported url scheme in `{0}` (expected http or https)")]
    UnsupportedScheme(String),

    #[error("cannot build request: {0}")]
    RequestBuild(#[from] http::Error),

    #[error("bad header name: {0}")]
    HeaderName(#[from] http::header::InvalidHeaderName),

    #[error("bad header value: {0}")]
    HeaderValue(#[from] http::header::InvalidHeaderValue),

    #[error("request failed: {0}")]
    Request(#[from] hyper_util::client::legacy::Error),

    #[error("no response within {0:?}")]
    Timeout(Duration),

    #[error("response body read failed: {0}")]
    BodyRead(#[from] hyper::Error),
}

impl Error {
    #[must_use]
    pub fn kind(&self) -> TransportErrorKind {
        match self {
            Self::InvalidUrl(_)
            | Self::UnsupportedScheme(_)
            | Self::RequestBuild(_)
            | Self::HeaderName(_)
            | Self::HeaderValue(_) => TransportErrorKind::Request,
            Self::Request(_) => TransportErrorKind::Connect,
            Self::Timeout(_) => TransportErrorKind::Timeout,
            Self::BodyRead(_) => TransportErrorKind::Body,
        }
    }

    #[must_use]
    pub fn is_timeout(&self) -> bool {
        self.kind() == TransportErrorKind::Timeout
    }
}
