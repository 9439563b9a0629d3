//! Middleware layer.
//!
//! Middleware intercepts requests and responses and is the right place for
//! cross-cutting concerns: tracing, request ids, authentication, header
//! rewriting.
//!
//! A middleware is registered as a [`Middleware`]: a constructor that, given
//! the unit it wraps, builds the wrapping unit. Options live in the
//! constructor value itself. The [`App`](crate::App) calls every constructor
//! again each time it rebuilds its stack.
//!
//! Two ways to write one:
//!
//! - implement [`Application`] directly and work at the message level;
//! - write a `dispatch(request, next)` function and register it with
//!   [`Middleware::http`], letting [`BaseHttpMiddleware`] do the bridging.
//!
//! ```rust
//! use strata::{App, Next, Request, Response, Error};
//! use strata::middleware::Middleware;
//!
//! async fn server_header(req: Request, next: Next) -> Result<Response, Error> {
//!     let mut response = next.run(req).await?;
//!     response.append_header("server", "strata");
//!     Ok(response)
//! }
//!
//! let mut app = App::new();
//! app.add_middleware(Middleware::http(server_header));
//! ```

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::message::Message;
use crate::protocol::{BoxedApp, Sender};

mod base;
mod errors;
mod exceptions;

pub use base::{BaseHttpMiddleware, Dispatch, Next};
pub use errors::ServerErrorMiddleware;
pub use exceptions::{
    ErrorType, ExceptionHandler, ExceptionHandlers, ExceptionMiddleware, HandlerKey, IntoErrorResponse,
    exception_handler,
};

/// A middleware constructor: wraps `inner` in a new protocol unit.
pub trait Layer: Send + Sync + 'static {
    fn layer(&self, inner: BoxedApp) -> BoxedApp;
}

impl<F> Layer for F
where
    F: Fn(BoxedApp) -> BoxedApp + Send + Sync + 'static,
{
    fn layer(&self, inner: BoxedApp) -> BoxedApp {
        self(inner)
    }
}

/// A registered middleware.
#[derive(Clone)]
pub struct Middleware {
    name: &'static str,
    layer: Arc<dyn Layer>,
}

impl Middleware {
    pub fn new<L: Layer>(layer: L) -> Self {
        Self { name: std::any::type_name::<L>(), layer: Arc::new(layer) }
    }

    /// The dispatch-function shortcut: `dispatch(request, next)` wrapped in
    /// a [`BaseHttpMiddleware`].
    pub fn http<D: Dispatch>(dispatch: D) -> Self {
        let dispatch = Arc::new(dispatch);
        Self {
            name: std::any::type_name::<D>(),
            layer: Arc::new(move |inner: BoxedApp| -> BoxedApp {
                Arc::new(BaseHttpMiddleware::from_shared(inner, Arc::clone(&dispatch)))
            }),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub(crate) fn wrap(&self, inner: BoxedApp) -> BoxedApp {
        self.layer.layer(inner)
    }
}

/// Wraps `send` so that `started` flips once a response start goes through.
pub(crate) fn track_start(send: &Sender, started: &Arc<AtomicBool>) -> Sender {
    let send = send.clone();
    let started = Arc::clone(started);
    Sender::from_fn(move |message| {
        if matches!(message, Message::ResponseStart { .. }) {
            started.store(true, Ordering::Release);
        }
        let send = send.clone();
        async move { send.send(message).await }
    })
}

impl fmt::Debug for Middleware {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Middleware").field(&self.name).finish()
    }
}
