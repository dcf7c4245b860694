use crate::utils::status::HttpStatusCode;

/// Failure while compiling a route template or pattern.
///
/// ルートパターンのコンパイル失敗。起動時に致命的なエラーとして扱う。
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PatternError {
    #[error("Invalid route pattern: \"{0}\". A parameter cannot be followed by another parameter without any characters in between.")]
    AdjacentParams(String),
    #[error("Invalid route pattern: \"{0}\". An optional parameter needs to be a full segment.")]
    OptionalNotFullSegment(String),
    #[error("Invalid route pattern: \"{0}\". Unbalanced brackets.")]
    UnbalancedBrackets(String),
    #[error("Invalid route pattern: \"{pattern}\". Duplicate parameter name \"{name}\".")]
    DuplicateParam { pattern: String, name: String },
    #[error("Invalid route pattern: \"{pattern}\". {reason}")]
    InvalidSyntax { pattern: String, reason: String },
}

/// An error that carries the HTTP status it should be answered with.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{status} {message}")]
pub struct HttpError {
    pub status: u16,
    pub message: String,
}

impl HttpError {
    /// ステータスの reason phrase をメッセージにする
    pub fn new(status: u16) -> HttpError {
        HttpError {
            status,
            message: HttpStatusCode::reason_phrase(status).to_string(),
        }
    }

    pub fn with_message(status: u16, message: impl Into<String>) -> HttpError {
        HttpError {
            status,
            message: message.into(),
        }
    }

    pub fn not_found() -> HttpError {
        HttpError::new(404)
    }
}

/// Everything a handler chain can fail with.
///
/// ハンドラチェーンが返すエラー。
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Http(#[from] HttpError),
    /// `next()` を同じハンドラ内で二回以上呼んだ
    #[error("next() called multiple times")]
    NextCalledMultipleTimes,
    /// ハンドラが Response を返さなかった (登録されたコードのバグ)
    #[error("invalid handler response: {0}")]
    InvalidResponse(String),
    #[error(transparent)]
    Other(Box<dyn std::error::Error + Send + Sync>),
}

impl Error {
    pub fn other<E>(err: E) -> Error
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Error::Other(err.into())
    }

    /// Status this error should be answered with. Anything that is not an
    /// [`HttpError`] is a 500.
    pub fn status(&self) -> u16 {
        match self {
            Error::Http(e) => e.status,
            _ => 500,
        }
    }

    /// Programming errors in registered code rather than request failures.
    pub fn is_protocol_violation(&self) -> bool {
        matches!(self, Error::NextCalledMultipleTimes | Error::InvalidResponse(_))
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Other(Box::new(err))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Other(Box::new(err))
    }
}

/// Connection level failures of the bundled HTTP/1.1 server.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid http request line: {0}")]
    InvalidRequestLine(String),
    #[error("Invalid http header: {0}")]
    InvalidHttpHeader(String),
    #[error("Request header section too large")]
    HeaderTooLarge,
    #[error("Connection closed")]
    ConnectionClosed,
}

pub type HandlerResult = Result<crate::response::Res, Error>;
