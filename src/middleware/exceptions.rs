//! The inner exception boundary.

use std::any::TypeId;
use std::error::Error as StdError;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use http::StatusCode;
use tracing::debug;

use super::track_start;
use crate::error::{ConfigError, Error, HttpError};
use crate::protocol::{Application, BoxFuture, BoxedApp, Receiver, Sender};
use crate::request::Request;
use crate::response::Response;
use crate::scope::{Scope, ScopeKind};

/// Builds a response for a raised error.
///
/// The error is lent only for the call itself; anything an async handler
/// needs from it must be copied out before the returned future starts.
pub type ExceptionHandler = Arc<dyn Fn(Request, &Error) -> BoxFuture<Response> + Send + Sync>;

/// What an exception handler may return: a response, or a future of one.
pub trait IntoErrorResponse: Send + 'static {
    fn into_error_response(self) -> BoxFuture<Response>;
}

impl IntoErrorResponse for Response {
    fn into_error_response(self) -> BoxFuture<Response> {
        Box::pin(std::future::ready(self))
    }
}

impl<F> IntoErrorResponse for F
where
    F: Future<Output = Response> + Send + 'static,
{
    fn into_error_response(self) -> BoxFuture<Response> {
        Box::pin(self)
    }
}

/// Erases a sync or async handler function into an [`ExceptionHandler`].
///
/// ```rust
/// # use strata::{Error, Request, Response, StatusCode};
/// # use strata::middleware::exception_handler;
/// // Sync: build the response from the request and the error.
/// exception_handler(|req: Request, _: &Error| Response::text(format!("no page at {}", req.path())));
///
/// // Async: copy what is needed from the error, then await freely.
/// exception_handler(|req: Request, err: &Error| {
///     let reason = err.to_string();
///     async move {
///         let body = req.body().await.unwrap_or_default();
///         Response::builder()
///             .status(StatusCode::UNPROCESSABLE_ENTITY)
///             .text(format!("{reason} ({} bytes)", body.len()))
///     }
/// });
/// ```
pub fn exception_handler<H, R>(handler: H) -> ExceptionHandler
where
    H: Fn(Request, &Error) -> R + Send + Sync + 'static,
    R: IntoErrorResponse,
{
    Arc::new(move |req: Request, err: &Error| -> BoxFuture<Response> {
        handler(req, err).into_error_response()
    })
}

/// Identifies an error type, for keying handlers by type.
#[derive(Clone, Copy)]
pub struct ErrorType {
    id: TypeId,
    name: &'static str,
    matches: fn(&Error) -> bool,
}

impl ErrorType {
    pub fn of<E: StdError + 'static>() -> Self {
        Self {
            id: TypeId::of::<E>(),
            name: std::any::type_name::<E>(),
            matches: |err| err.downcast_ref::<E>().is_some(),
        }
    }

    pub fn name(&self) -> &'static str { self.name }

    pub fn matches(&self, err: &Error) -> bool {
        (self.matches)(err)
    }
}

impl PartialEq for ErrorType {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for ErrorType {}

impl fmt::Debug for ErrorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

/// What an exception handler is registered for.
///
/// `Status(500)` and `Any` belong to the outer error boundary; every other
/// key to the inner exception boundary.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum HandlerKey {
    /// An [`HttpError`] with this status.
    Status(u16),
    /// An error of one concrete type.
    Error(ErrorType),
    /// Any error at all.
    Any,
}

impl HandlerKey {
    pub fn error<E: StdError + 'static>() -> Self {
        Self::Error(ErrorType::of::<E>())
    }

    pub(crate) fn is_outer(&self) -> bool {
        matches!(self, Self::Status(500) | Self::Any)
    }

    fn validate(self) -> Result<Self, ConfigError> {
        match self {
            Self::Status(code) if !(100..=599).contains(&code) => Err(ConfigError::InvalidStatusCode(code)),
            key => Ok(key),
        }
    }

    fn matches(&self, err: &Error) -> bool {
        match self {
            Self::Status(code) => {
                matches!(err, Error::Http(http) if http.status().as_u16() == *code)
            }
            Self::Error(ty) => ty.matches(err),
            Self::Any => true,
        }
    }
}

impl From<u16> for HandlerKey {
    fn from(code: u16) -> Self { Self::Status(code) }
}

impl From<StatusCode> for HandlerKey {
    fn from(code: StatusCode) -> Self { Self::Status(code.as_u16()) }
}

/// Registered exception handlers, in registration order.
#[derive(Clone, Default)]
pub struct ExceptionHandlers {
    entries: Vec<(HandlerKey, ExceptionHandler)>,
}

impl ExceptionHandlers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` for `key`, replacing any handler already
    /// registered for the same key.
    ///
    /// # Errors
    ///
    /// [`ConfigError::InvalidStatusCode`] if `key` is a status outside
    /// `100..=599`.
    pub fn insert(&mut self, key: HandlerKey, handler: ExceptionHandler) -> Result<(), ConfigError> {
        let key = key.validate()?;
        self.entries.retain(|(k, _)| *k != key);
        self.entries.push((key, handler));
        Ok(())
    }

    pub fn len(&self) -> usize { self.entries.len() }
    pub fn is_empty(&self) -> bool { self.entries.is_empty() }

    /// Splits into the outer boundary's handler and the inner boundary's
    /// handlers. If both outer keys are registered, the later one wins.
    pub(crate) fn split(&self) -> (Option<ExceptionHandler>, ExceptionHandlers) {
        let mut outer = None;
        let mut inner = ExceptionHandlers::new();
        for (key, handler) in &self.entries {
            if key.is_outer() {
                outer = Some(Arc::clone(handler));
            } else {
                inner.entries.push((*key, Arc::clone(handler)));
            }
        }
        (outer, inner)
    }

    /// Status handlers first, then type handlers in registration order.
    fn lookup(&self, err: &Error) -> Option<&ExceptionHandler> {
        let by_status = self.entries.iter().filter(|(k, _)| matches!(k, HandlerKey::Status(_)));
        let by_type = self.entries.iter().filter(|(k, _)| !matches!(k, HandlerKey::Status(_)));
        by_status.chain(by_type).find(|(k, _)| k.matches(err)).map(|(_, h)| h)
    }
}

/// Maps raised errors to responses, from just outside the router.
///
/// [`HttpError`]s without a handler get a plain-text response with their
/// status and detail. Any other error without a handler propagates to the
/// outer boundary, which reports it.
pub struct ExceptionMiddleware {
    inner: BoxedApp,
    handlers: Arc<ExceptionHandlers>,
    debug: bool,
}

impl ExceptionMiddleware {
    pub fn new(inner: BoxedApp, handlers: ExceptionHandlers, debug: bool) -> Self {
        Self { inner, handlers: Arc::new(handlers), debug }
    }
}

impl Application for ExceptionMiddleware {
    fn call(&self, scope: Scope, receive: Receiver, send: Sender) -> BoxFuture<Result<(), Error>> {
        if scope.kind() != ScopeKind::Http {
            return self.inner.call(scope, receive, send);
        }

        let started = Arc::new(AtomicBool::new(false));
        let call = self.inner.call(scope.clone(), receive.clone(), track_start(&send, &started));
        let handlers = Arc::clone(&self.handlers);
        let debug_enabled = self.debug;

        Box::pin(async move {
            let err = match call.await {
                Ok(()) => return Ok(()),
                Err(err) => err,
            };

            let response = if let Some(handler) = handlers.lookup(&err) {
                handler(Request::new(scope, receive), &err).await
            } else if let Error::Http(http) = &err {
                http_error_response(http)
            } else {
                debug!(error = %err, debug = debug_enabled, "no exception handler matched, propagating");
                return Err(err);
            };

            if started.load(Ordering::Acquire) {
                return Err(Error::ResponseAlreadyStarted(Box::new(err)));
            }
            debug!(error = %err, status = response.status_code(), "handled error");
            response.send_to(&send).await
        })
    }
}

fn http_error_response(err: &HttpError) -> Response {
    let builder = Response::builder().status(err.status()).headers(err.headers());
    match err.status() {
        StatusCode::NO_CONTENT | StatusCode::NOT_MODIFIED => builder.no_body(),
        _ => builder.text(err.detail()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, thiserror::Error)]
    #[error("first")]
    struct First;

    fn text(body: &'static str) -> ExceptionHandler {
        exception_handler(move |_: Request, _: &Error| Response::text(body))
    }

    fn request() -> Request {
        Request::new(Scope::http(http::Method::GET, "/"), Receiver::empty())
    }

    async fn answer(handlers: &ExceptionHandlers, err: &Error) -> Option<u16> {
        match handlers.lookup(err) {
            Some(handler) => Some(handler(request(), err).await.status_code()),
            None => None,
        }
    }

    #[test]
    fn status_keys_must_be_valid_http_statuses() {
        let mut handlers = ExceptionHandlers::new();
        assert!(matches!(
            handlers.insert(HandlerKey::Status(99), text("")),
            Err(ConfigError::InvalidStatusCode(99))
        ));
        assert!(handlers.insert(HandlerKey::Status(100), text("")).is_ok());
        assert!(handlers.insert(HandlerKey::Status(599), text("")).is_ok());
        assert_eq!(handlers.len(), 2);
    }

    #[test]
    fn reregistering_a_key_replaces_it() {
        let mut handlers = ExceptionHandlers::new();
        handlers.insert(HandlerKey::error::<First>(), text("old")).unwrap();
        handlers.insert(HandlerKey::error::<First>(), text("new")).unwrap();
        assert_eq!(handlers.len(), 1);
    }

    #[test]
    fn split_routes_outer_keys_to_the_outer_boundary() {
        let mut handlers = ExceptionHandlers::new();
        handlers.insert(StatusCode::NOT_FOUND.into(), text("404")).unwrap();
        handlers.insert(StatusCode::INTERNAL_SERVER_ERROR.into(), text("500")).unwrap();
        handlers.insert(HandlerKey::error::<First>(), text("first")).unwrap();

        let (outer, inner) = handlers.split();
        assert!(outer.is_some());
        assert_eq!(inner.len(), 2);
        assert!(inner.entries.iter().all(|(k, _)| !k.is_outer()));
    }

    #[tokio::test]
    async fn lookup_matches_status_then_type() {
        let mut handlers = ExceptionHandlers::new();
        handlers.insert(HandlerKey::error::<HttpError>(), text("any http")).unwrap();
        handlers.insert(StatusCode::NOT_FOUND.into(), text("404")).unwrap();

        let not_found = Error::from(HttpError::new(StatusCode::NOT_FOUND));
        let handler = handlers.lookup(&not_found).unwrap();
        let response = handler(request(), &not_found).await;
        assert!(matches!(response.into_body(), crate::response::Body::Full(b) if b == "404"));

        let gone = Error::from(HttpError::new(StatusCode::GONE));
        assert_eq!(answer(&handlers, &gone).await, Some(200));
        assert_eq!(answer(&handlers, &Error::handler(First)).await, None);
    }

    #[tokio::test]
    async fn async_handlers_are_awaited() {
        let mut handlers = ExceptionHandlers::new();
        handlers
            .insert(
                HandlerKey::error::<First>(),
                exception_handler(|req: Request, err: &Error| {
                    let reason = err.to_string();
                    async move {
                        tokio::task::yield_now().await;
                        Response::builder()
                            .status(StatusCode::SERVICE_UNAVAILABLE)
                            .text(format!("{reason} at {}", req.path()))
                    }
                }),
            )
            .unwrap();

        let err = Error::handler(First);
        let response = handlers.lookup(&err).unwrap()(request(), &err).await;
        assert_eq!(response.status_code(), 503);
        assert_eq!(response.into_body().collect().await.unwrap(), "first at /");
    }

    #[tokio::test]
    async fn unmatched_error_propagates_whatever_the_debug_flag() {
        for debug in [false, true] {
            let sent = Arc::new(std::sync::Mutex::new(Vec::new()));
            let sink = Arc::clone(&sent);
            let send = Sender::from_fn(move |message| {
                sink.lock().unwrap().push(message);
                async { Ok(()) }
            });
            let failing = crate::protocol::app_fn(|_, _, _| async { Err(Error::handler(First)) });
            let mut handlers = ExceptionHandlers::new();
            handlers.insert(StatusCode::NOT_FOUND.into(), text("404")).unwrap();

            let err = ExceptionMiddleware::new(Arc::new(failing), handlers, debug)
                .call(Scope::http(http::Method::GET, "/"), Receiver::empty(), send)
                .await
                .unwrap_err();
            assert!(err.downcast_ref::<First>().is_some());
            assert!(sent.lock().unwrap().is_empty());
        }
    }
}
