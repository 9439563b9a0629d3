//! Unified error types.
//!
//! [`Error`] is what flows through the protocol: every [`Application`] call
//! resolves to `Result<(), Error>`, and the two boundary layers decide which
//! errors become responses. [`ConfigError`] is reported at registration time,
//! never at request time.
//!
//! [`Application`]: crate::Application

use std::error::Error as StdError;
use std::fmt;

use http::StatusCode;

use crate::message::Headers;

/// A boxed, thread-safe error coming from application code.
pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// The error type produced while handling a connection.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A status raised on purpose (404 from the router, 401 from an auth
    /// layer...). The inner exception boundary turns it into a response.
    #[error(transparent)]
    Http(#[from] HttpError),

    /// Any other failure raised by application code.
    #[error("{0}")]
    Handler(#[source] BoxError),

    /// The wrapped application finished without sending anything.
    #[error("no response returned")]
    NoResponse,

    /// A message arrived that the protocol does not allow at this point.
    #[error("unexpected message `{found}`, expected `{expected}`")]
    UnexpectedMessage {
        expected: &'static str,
        found: &'static str,
    },

    /// An error was handled, but a response had already been started so the
    /// handler's response could not be sent.
    #[error("caught handled error, but response already started")]
    ResponseAlreadyStarted(#[source] Box<Error>),

    /// The other end of a channel has gone away.
    #[error("client disconnected")]
    Disconnected,

    /// The application task panicked.
    #[error("application task panicked: {0}")]
    Panic(String),

    /// The application task was cancelled before it finished.
    #[error("application task was cancelled")]
    Cancelled,

    /// A lifespan startup or shutdown step reported failure.
    #[error("lifespan failed: {0}")]
    Lifespan(String),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Wraps an arbitrary application error.
    pub fn handler(err: impl Into<BoxError>) -> Self {
        Self::Handler(err.into())
    }

    pub(crate) fn unexpected(expected: &'static str, found: &crate::Message) -> Self {
        Self::UnexpectedMessage { expected, found: found.kind() }
    }

    /// `true` for defects in how a unit used the protocol, as opposed to
    /// failures of the work it was doing.
    pub fn is_contract_violation(&self) -> bool {
        matches!(
            self,
            Self::NoResponse | Self::UnexpectedMessage { .. } | Self::ResponseAlreadyStarted(_)
        )
    }

    /// Returns the original typed error if this wraps one of type `E`.
    ///
    /// ```rust
    /// use strata::{Error, HttpError};
    /// use http::StatusCode;
    ///
    /// let err = Error::from(HttpError::new(StatusCode::NOT_FOUND));
    /// assert_eq!(err.downcast_ref::<HttpError>().unwrap().status(), StatusCode::NOT_FOUND);
    /// ```
    pub fn downcast_ref<E: StdError + 'static>(&self) -> Option<&E> {
        match self {
            Self::Http(err) => (err as &(dyn StdError + 'static)).downcast_ref::<E>(),
            Self::Handler(err) => err.downcast_ref::<E>(),
            _ => None,
        }
    }
}

/// A deliberately raised HTTP status, with an optional detail message and
/// extra response headers.
#[derive(Debug, Clone)]
pub struct HttpError {
    status: StatusCode,
    detail: Option<String>,
    headers: Headers,
}

impl HttpError {
    pub fn new(status: StatusCode) -> Self {
        Self { status, detail: None, headers: Vec::new() }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((
            bytes::Bytes::copy_from_slice(name.as_bytes()),
            bytes::Bytes::copy_from_slice(value.as_bytes()),
        ));
        self
    }

    pub fn status(&self) -> StatusCode { self.status }
    pub fn headers(&self) -> &Headers { &self.headers }

    /// The detail message, falling back to the status's reason phrase.
    pub fn detail(&self) -> &str {
        self.detail
            .as_deref()
            .or_else(|| self.status.canonical_reason())
            .unwrap_or("")
    }
}

impl fmt::Display for HttpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.status.as_u16(), self.detail())
    }
}

impl StdError for HttpError {}

/// Rejected configuration, reported when it is registered.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid status code {0} for an exception handler, expected 100..=599")]
    InvalidStatusCode(u16),

    #[error("use either a lifespan context or startup/shutdown hooks, not both")]
    LifespanConflict,
}
