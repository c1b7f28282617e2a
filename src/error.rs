//! Classified errors, and their mapping to HTTP status codes.
//!
//! Every error which aborts a request is an [`Error`] with a [`ErrorKind`].
//! The connection turns it into a fully formed [`Answer`] in the format the client asked for.

use crate::prelude::*;

/// The classification of a [`Error`] or [`result::Message`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Not an error. Used for success messages.
    None,
    /// The request is malformed.
    ClientError,
    /// The `content-type`, `transfer-encoding` or multipart boundary isn't supported.
    UnknownContent,
    /// The method or protocol isn't supported.
    InvalidOperation,
    /// A parameter is missing or couldn't be parsed.
    InvalidParameters,
    /// The route requires a authenticated session.
    AuthenticationRequired,
    /// The route requires a persisted session.
    SessionRequired,
    /// The session lacks the flags the route requires.
    MissingRights,
    /// A unexpected fault on our side.
    InternalServerError,
    /// The abuse guard rejected the request.
    RequestingTooFast,
    /// Nothing is registered at the path.
    NotFound,
}
impl ErrorKind {
    /// Gets a string representation of [`ErrorKind`].
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "None",
            Self::ClientError => "ClientError",
            Self::UnknownContent => "UnknownContent",
            Self::InvalidOperation => "InvalidOperation",
            Self::InvalidParameters => "InvalidParameters",
            Self::AuthenticationRequired => "AuthenticationRequired",
            Self::SessionRequired => "SessionRequired",
            Self::MissingRights => "MissingRights",
            Self::InternalServerError => "InternalServerError",
            Self::RequestingTooFast => "RequestingTooFast",
            Self::NotFound => "NotFound",
        }
    }
    /// The status code errors of this kind get if nothing else is specified.
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::None => StatusCode::OK,
            Self::ClientError | Self::InvalidParameters => StatusCode::BAD_REQUEST,
            Self::UnknownContent => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            Self::InvalidOperation => StatusCode::METHOD_NOT_ALLOWED,
            Self::AuthenticationRequired | Self::SessionRequired => StatusCode::UNAUTHORIZED,
            Self::MissingRights => StatusCode::FORBIDDEN,
            Self::InternalServerError => StatusCode::INTERNAL_SERVER_ERROR,
            Self::RequestingTooFast => StatusCode::TOO_MANY_REQUESTS,
            Self::NotFound => StatusCode::NOT_FOUND,
        }
    }
}
impl Display for ErrorKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A error which aborts the current request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Error {
    kind: ErrorKind,
    status: StatusCode,
    message: CompactString,
    breaks_framing: bool,
    cause: Option<parse::Error>,
}
impl Error {
    /// Creates a new error with the default status of `kind`.
    pub fn new(kind: ErrorKind, message: impl Into<CompactString>) -> Self {
        Self {
            kind,
            status: kind.status(),
            message: message.into(),
            breaks_framing: false,
            cause: None,
        }
    }
    /// Overrides the status code.
    #[must_use]
    pub fn with_status(mut self, status: StatusCode) -> Self {
        self.status = status;
        self
    }
    /// Marks the byte stream as unusable after this error; the connection is closed.
    #[must_use]
    pub fn breaking_framing(mut self) -> Self {
        self.breaks_framing = true;
        self
    }

    /// [`ErrorKind::ClientError`]
    pub fn client(message: impl Into<CompactString>) -> Self {
        Self::new(ErrorKind::ClientError, message)
    }
    /// [`ErrorKind::UnknownContent`]
    pub fn unknown_content(message: impl Into<CompactString>) -> Self {
        Self::new(ErrorKind::UnknownContent, message)
    }
    /// [`ErrorKind::InvalidOperation`]
    pub fn invalid_operation(message: impl Into<CompactString>) -> Self {
        Self::new(ErrorKind::InvalidOperation, message)
    }
    /// A [`ErrorKind::InvalidOperation`] for protocols we don't speak.
    pub fn unsupported_protocol(message: impl Into<CompactString>) -> Self {
        Self::new(ErrorKind::InvalidOperation, message)
            .with_status(StatusCode::HTTP_VERSION_NOT_SUPPORTED)
    }
    /// [`ErrorKind::InvalidParameters`]
    pub fn invalid_parameters(message: impl Into<CompactString>) -> Self {
        Self::new(ErrorKind::InvalidParameters, message)
    }
    /// [`ErrorKind::AuthenticationRequired`]
    pub fn authentication_required(message: impl Into<CompactString>) -> Self {
        Self::new(ErrorKind::AuthenticationRequired, message)
    }
    /// [`ErrorKind::SessionRequired`]
    pub fn session_required(message: impl Into<CompactString>) -> Self {
        Self::new(ErrorKind::SessionRequired, message)
    }
    /// [`ErrorKind::MissingRights`]
    pub fn missing_rights(message: impl Into<CompactString>) -> Self {
        Self::new(ErrorKind::MissingRights, message)
    }
    /// [`ErrorKind::InternalServerError`]
    ///
    /// The message is logged, not sent to the client.
    pub fn internal(message: impl Into<CompactString>) -> Self {
        Self::new(ErrorKind::InternalServerError, message)
    }
    /// [`ErrorKind::RequestingTooFast`]
    pub fn too_fast(message: impl Into<CompactString>) -> Self {
        Self::new(ErrorKind::RequestingTooFast, message)
    }
    /// [`ErrorKind::NotFound`]
    pub fn not_found(message: impl Into<CompactString>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    /// The classification.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }
    /// The HTTP status code of the answer.
    #[must_use]
    pub fn status(&self) -> StatusCode {
        self.status
    }
    /// The human readable message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
    /// If the connection has to be closed after answering this error.
    ///
    /// True when the framing of the byte stream is lost and for all internal errors.
    #[must_use]
    pub fn forces_close(&self) -> bool {
        self.breaks_framing || self.kind == ErrorKind::InternalServerError
    }
    /// The parse error this error was created from, if any.
    #[must_use]
    pub fn parse_error(&self) -> Option<parse::Error> {
        self.cause
    }
    /// If the client went away mid-message. Nothing can be answered.
    #[must_use]
    pub fn is_disconnect(&self) -> bool {
        self.cause == Some(parse::Error::UnexpectedEnd)
    }
}
impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}): {}", self.kind, self.status.as_u16(), self.message)
    }
}
impl std::error::Error for Error {}
impl From<parse::Error> for Error {
    fn from(err: parse::Error) -> Self {
        use parse::Error as E;
        let error = match err {
            E::InvalidBoundary | E::UnsupportedContent | E::UnsupportedEncoding => {
                Self::unknown_content(err.as_str())
            }
            E::InvalidMethod => Self::invalid_operation(err.as_str()),
            E::InvalidVersion => Self::unsupported_protocol(err.as_str()),
            E::BodyTooLarge => Self::client(err.as_str()).with_status(StatusCode::PAYLOAD_TOO_LARGE),
            E::LineTooLong | E::TooManyHeaders => Self::client(err.as_str())
                .with_status(StatusCode::REQUEST_HEADER_FIELDS_TOO_LARGE),
            _ => Self::client(err.as_str()),
        };
        let mut error = if err.breaks_framing() {
            error.breaking_framing()
        } else {
            error
        };
        error.cause = Some(err);
        error
    }
}
