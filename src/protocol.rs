//! The application calling convention.
//!
//! # One trait for everything
//!
//! The router, every middleware layer, both boundary layers and the
//! [`App`](crate::App) itself all implement [`Application`]. Wrapping is plain
//! composition: a layer owns the next layer as a [`BoxedApp`] and calls it.
//!
//! ```text
//! server ── call(scope, receive, send) ──▶ ServerErrorMiddleware
//!                                             │ owns
//!                                             ▼
//!                                          user middleware …
//!                                             │ owns
//!                                             ▼
//!                                          ExceptionMiddleware ──▶ Router
//! ```
//!
//! A unit never returns a response. It talks through the two channels and
//! resolves to `Ok(())` when it is done with the connection, or to the error
//! that stopped it.

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::{Mutex, mpsc};

use crate::error::Error;
use crate::message::Message;
use crate::scope::Scope;

/// A heap-allocated, type-erased future.
///
/// `Send + 'static` so the runtime may move it across threads, and so that a
/// call does not borrow the unit that produced it: an in-flight connection
/// keeps running even if the [`App`](crate::App) it entered has since been
/// reconfigured.
pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send + 'static>>;

/// A protocol unit: anything honouring the `(scope, receive, send)`
/// convention.
pub trait Application: Send + Sync + 'static {
    fn call(&self, scope: Scope, receive: Receiver, send: Sender) -> BoxFuture<Result<(), Error>>;
}

/// A shared, type-erased protocol unit.
pub type BoxedApp = Arc<dyn Application>;

/// Turns an async closure into an [`Application`].
///
/// ```rust
/// use strata::{app_fn, Message};
///
/// let hello = app_fn(|_scope, _receive, send| async move {
///     send.send(Message::start(200, &[("content-type", "text/plain")])).await?;
///     send.send(Message::body("hello", false)).await
/// });
/// ```
pub fn app_fn<F, Fut>(f: F) -> AppFn<F>
where
    F: Fn(Scope, Receiver, Sender) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), Error>> + Send + 'static,
{
    AppFn(f)
}

/// See [`app_fn`].
#[derive(Clone, Copy)]
pub struct AppFn<F>(F);

impl<F, Fut> Application for AppFn<F>
where
    F: Fn(Scope, Receiver, Sender) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), Error>> + Send + 'static,
{
    fn call(&self, scope: Scope, receive: Receiver, send: Sender) -> BoxFuture<Result<(), Error>> {
        Box::pin((self.0)(scope, receive, send))
    }
}

// ── Channels ──────────────────────────────────────────────────────────────────

type RecvFn = dyn Fn() -> BoxFuture<Result<Message, Error>> + Send + Sync;
type SendFn = dyn Fn(Message) -> BoxFuture<Result<(), Error>> + Send + Sync;

/// The inbound half: `recv()` suspends until the next message is available.
#[derive(Clone)]
pub struct Receiver(Arc<RecvFn>);

impl Receiver {
    pub fn from_fn<F, Fut>(f: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Message, Error>> + Send + 'static,
    {
        Self(Arc::new(move || -> BoxFuture<Result<Message, Error>> { Box::pin(f()) }))
    }

    /// Replays `messages` in order, then reports `http.disconnect` forever.
    pub fn from_messages(messages: impl IntoIterator<Item = Message>) -> Self {
        let queue = Arc::new(Mutex::new(messages.into_iter().collect::<VecDeque<_>>()));
        Self::from_fn(move || {
            let queue = Arc::clone(&queue);
            async move {
                Ok(queue.lock().await.pop_front().unwrap_or(Message::HttpDisconnect))
            }
        })
    }

    /// Reads from a channel; a closed channel reads as `http.disconnect`.
    pub fn from_channel(rx: mpsc::UnboundedReceiver<Message>) -> Self {
        let rx = Arc::new(Mutex::new(rx));
        Self::from_fn(move || {
            let rx = Arc::clone(&rx);
            async move { Ok(rx.lock().await.recv().await.unwrap_or(Message::HttpDisconnect)) }
        })
    }

    /// An empty HTTP request: one final, empty body chunk.
    pub fn empty() -> Self {
        Self::from_messages([Message::HttpRequest { body: bytes::Bytes::new(), more: false }])
    }

    pub async fn recv(&self) -> Result<Message, Error> {
        (self.0)().await
    }
}

/// The outbound half: `send()` suspends until the message is accepted.
#[derive(Clone)]
pub struct Sender(Arc<SendFn>);

impl Sender {
    pub fn from_fn<F, Fut>(f: F) -> Self
    where
        F: Fn(Message) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), Error>> + Send + 'static,
    {
        Self(Arc::new(move |message| -> BoxFuture<Result<(), Error>> { Box::pin(f(message)) }))
    }

    /// Pushes onto a channel; a dropped reader is reported as
    /// [`Error::Disconnected`].
    pub fn from_channel(tx: mpsc::UnboundedSender<Message>) -> Self {
        Self::from_fn(move |message| {
            let sent = tx.send(message).map_err(|_| Error::Disconnected);
            async move { sent }
        })
    }

    pub async fn send(&self, message: Message) -> Result<(), Error> {
        (self.0)(message).await
    }
}
