//! Endpoint handlers and type erasure.
//!
//! # From an async fn to a protocol unit
//!
//! The router stores endpoints of *different* types side by side, so every
//! endpoint is erased into the one thing every layer understands: a
//! [`BoxedApp`].
//!
//! ```text
//! async fn hello(req: Request) -> Response { … }   ← user writes this
//!        ↓ router.get("/", hello)
//! hello.into_app()                                 ← Handler blanket impl
//!        ↓
//! Arc::new(Endpoint(hello))                        ← stored as BoxedApp
//!        ↓ at request time
//! Endpoint::call(scope, receive, send)
//!        ↓
//! hello(Request::new(scope, receive)).await?.send_to(&send)
//! ```

use std::future::Future;
use std::sync::Arc;

use http::StatusCode;

use crate::error::Error;
use crate::protocol::{Application, BoxFuture, BoxedApp, Receiver, Sender};
use crate::request::Request;
use crate::response::{IntoResponse, Response};
use crate::scope::Scope;

// ── Handler output ────────────────────────────────────────────────────────────

/// What an endpoint may return: a response, or a fallible one.
///
/// Returning `Err` hands the error to the exception boundaries, exactly as
/// if the endpoint had been a raw protocol unit failing.
pub trait HandlerOutput: Send + 'static {
    fn into_result(self) -> Result<Response, Error>;
}

impl HandlerOutput for Response {
    fn into_result(self) -> Result<Response, Error> { Ok(self) }
}

impl HandlerOutput for &'static str {
    fn into_result(self) -> Result<Response, Error> { Ok(self.into_response()) }
}

impl HandlerOutput for String {
    fn into_result(self) -> Result<Response, Error> { Ok(self.into_response()) }
}

impl HandlerOutput for StatusCode {
    fn into_result(self) -> Result<Response, Error> { Ok(self.into_response()) }
}

impl<T, E> HandlerOutput for Result<T, E>
where
    T: IntoResponse + Send + 'static,
    E: Into<Error> + Send + 'static,
{
    fn into_result(self) -> Result<Response, Error> {
        self.map(IntoResponse::into_response).map_err(Into::into)
    }
}

// ── Public Handler trait ──────────────────────────────────────────────────────

/// Implemented for every valid endpoint.
///
/// You never implement this yourself. It is automatically satisfied for any
/// `async fn` with the signature:
///
/// ```text
/// async fn name(req: Request) -> impl HandlerOutput
/// ```
///
/// The trait is **sealed**: only the blanket impl below can satisfy it.
pub trait Handler: private::Sealed + Send + Sync + 'static {
    #[doc(hidden)]
    fn into_app(self) -> BoxedApp;
}

mod private {
    pub trait Sealed {}
}

impl<F, Fut> private::Sealed for F
where
    F: Fn(Request) -> Fut + Send + Sync + 'static,
    Fut: Future + Send + 'static,
    Fut::Output: HandlerOutput,
{
}

impl<F, Fut> Handler for F
where
    F: Fn(Request) -> Fut + Send + Sync + 'static,
    Fut: Future + Send + 'static,
    Fut::Output: HandlerOutput,
{
    fn into_app(self) -> BoxedApp {
        Arc::new(Endpoint(self))
    }
}

// ── Concrete wrapper ──────────────────────────────────────────────────────────

/// Holds a concrete handler `F` and speaks the protocol on its behalf.
struct Endpoint<F>(F);

impl<F, Fut> Application for Endpoint<F>
where
    F: Fn(Request) -> Fut + Send + Sync + 'static,
    Fut: Future + Send + 'static,
    Fut::Output: HandlerOutput,
{
    fn call(&self, scope: Scope, receive: Receiver, send: Sender) -> BoxFuture<Result<(), Error>> {
        let fut = (self.0)(Request::new(scope, receive));
        Box::pin(async move {
            let response = fut.await.into_result()?;
            response.send_to(&send).await
        })
    }
}
