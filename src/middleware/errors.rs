//! The outer error boundary.

use std::error::Error as StdError;
use std::fmt::Write as _;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use http::StatusCode;
use tracing::error;

use super::track_start;
use super::exceptions::ExceptionHandler;
use crate::error::Error;
use crate::protocol::{Application, BoxFuture, BoxedApp, Receiver, Sender};
use crate::request::Request;
use crate::response::Response;
use crate::scope::{Scope, ScopeKind};

/// Catches everything nothing else handled.
///
/// Always the outermost layer. On an error, if no response has started yet,
/// it sends one:
///
/// - with `debug` on, a plain-text report of the error and its causes;
/// - otherwise the registered handler's response, if any;
/// - otherwise `500 Internal Server Error`.
///
/// The error is then returned anyway, so the server can log it.
pub struct ServerErrorMiddleware {
    inner: BoxedApp,
    handler: Option<ExceptionHandler>,
    debug: bool,
}

impl ServerErrorMiddleware {
    pub fn new(inner: BoxedApp, handler: Option<ExceptionHandler>, debug: bool) -> Self {
        Self { inner, handler, debug }
    }
}

impl Application for ServerErrorMiddleware {
    fn call(&self, scope: Scope, receive: Receiver, send: Sender) -> BoxFuture<Result<(), Error>> {
        if scope.kind() != ScopeKind::Http {
            return self.inner.call(scope, receive, send);
        }

        let started = Arc::new(AtomicBool::new(false));
        let call = self.inner.call(scope.clone(), receive.clone(), track_start(&send, &started));
        let handler = self.handler.clone();
        let debug = self.debug;

        Box::pin(async move {
            let err = match call.await {
                Ok(()) => return Ok(()),
                Err(err) => err,
            };
            error!(error = %err, path = scope.path(), "unhandled error");

            if !started.load(Ordering::Acquire) {
                let response = match handler {
                    _ if debug => debug_response(&err),
                    Some(handler) => handler(Request::new(scope, receive), &err).await,
                    None => Response::builder()
                        .status(StatusCode::INTERNAL_SERVER_ERROR)
                        .text("Internal Server Error"),
                };
                if let Err(send_err) = response.send_to(&send).await {
                    error!(error = %send_err, "failed to send error response");
                }
            }
            Err(err)
        })
    }
}

/// The error and its chain of causes, one per line.
fn debug_response(err: &Error) -> Response {
    let mut report = format!("{err}\n");
    let mut source = err.source();
    while let Some(cause) = source {
        let _ = writeln!(report, "caused by: {cause}");
        source = cause.source();
    }
    Response::builder()
        .status(StatusCode::INTERNAL_SERVER_ERROR)
        .text(report)
}
