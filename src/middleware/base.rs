//! Request/response style middleware over the message protocol.

use std::future::Future;
use std::sync::Arc;

use crate::bridge;
use crate::error::Error;
use crate::protocol::{Application, BoxFuture, BoxedApp, Receiver, Sender};
use crate::request::Request;
use crate::response::Response;
use crate::scope::{Scope, ScopeKind};

/// A middleware written as `dispatch(request, next) -> response`.
///
/// Implemented for every `async fn(Request, Next) -> Result<Response, Error>`.
pub trait Dispatch: Send + Sync + 'static {
    fn dispatch(&self, request: Request, next: Next) -> BoxFuture<Result<Response, Error>>;
}

impl<F, Fut> Dispatch for F
where
    F: Fn(Request, Next) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Response, Error>> + Send + 'static,
{
    fn dispatch(&self, request: Request, next: Next) -> BoxFuture<Result<Response, Error>> {
        Box::pin(self(request, next))
    }
}

/// Everything inside the current layer, callable as a function.
#[derive(Clone)]
pub struct Next {
    inner: BoxedApp,
}

impl Next {
    /// Runs the rest of the chain and returns its response as soon as it has
    /// started.
    ///
    /// The body may still be in production. If the inner unit fails after
    /// starting its response, the error is raised by the body stream at end
    /// of stream, not here.
    pub async fn run(self, request: Request) -> Result<Response, Error> {
        bridge::forward(&self.inner, request).await
    }
}

/// Adapts a [`Dispatch`] into a protocol unit.
///
/// HTTP scopes go through `dispatch` and its response is replayed onto the
/// real outbound channel. Every other scope kind is passed to the inner unit
/// untouched.
pub struct BaseHttpMiddleware<D> {
    inner: BoxedApp,
    dispatch: Arc<D>,
}

impl<D: Dispatch> BaseHttpMiddleware<D> {
    pub fn new(inner: BoxedApp, dispatch: D) -> Self {
        Self::from_shared(inner, Arc::new(dispatch))
    }

    pub(crate) fn from_shared(inner: BoxedApp, dispatch: Arc<D>) -> Self {
        Self { inner, dispatch }
    }
}

impl<D: Dispatch> Application for BaseHttpMiddleware<D> {
    fn call(&self, scope: Scope, receive: Receiver, send: Sender) -> BoxFuture<Result<(), Error>> {
        if scope.kind() != ScopeKind::Http {
            return self.inner.call(scope, receive, send);
        }

        let next = Next { inner: Arc::clone(&self.inner) };
        let response = self.dispatch.dispatch(Request::new(scope, receive), next);
        Box::pin(async move { response.await?.send_to(&send).await })
    }
}
