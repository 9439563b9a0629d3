//! Application lifecycle: startup and shutdown.
//!
//! A server opens one `lifespan` scope before it starts accepting
//! connections and closes it after draining them. The router answers that
//! scope by running either the registered hooks or a single [`Lifespan`]
//! context. Configuring both is rejected when the [`App`](crate::App) is
//! built.

use std::future::Future;
use std::sync::Arc;

use tracing::{error, info};

use crate::error::Error;
use crate::message::Message;
use crate::protocol::{BoxFuture, Receiver, Sender};

/// A startup or shutdown hook.
pub type Hook = Arc<dyn Fn() -> BoxFuture<Result<(), Error>> + Send + Sync>;

/// Wraps an async closure as a [`Hook`].
pub fn hook<F, Fut>(f: F) -> Hook
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), Error>> + Send + 'static,
{
    Arc::new(move || -> BoxFuture<Result<(), Error>> { Box::pin(f()) })
}

/// Which lifecycle event a hook runs on.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Event {
    Startup,
    Shutdown,
}

/// A lifespan context: one value owning both halves of the lifecycle.
pub trait Lifespan: Send + Sync + 'static {
    fn startup(&self) -> BoxFuture<Result<(), Error>>;
    fn shutdown(&self) -> BoxFuture<Result<(), Error>>;
}

#[derive(Clone)]
pub(crate) enum Lifecycle {
    Hooks { startup: Vec<Hook>, shutdown: Vec<Hook> },
    Context(Arc<dyn Lifespan>),
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::Hooks { startup: Vec::new(), shutdown: Vec::new() }
    }
}

impl Lifecycle {
    async fn run(&self, event: Event) -> Result<(), Error> {
        match self {
            Self::Hooks { startup, shutdown } => {
                let hooks = match event {
                    Event::Startup => startup,
                    Event::Shutdown => shutdown,
                };
                for hook in hooks {
                    hook().await?;
                }
                Ok(())
            }
            Self::Context(ctx) => match event {
                Event::Startup => ctx.startup().await,
                Event::Shutdown => ctx.shutdown().await,
            },
        }
    }
}

/// Answers a `lifespan` scope: startup, wait for shutdown, shutdown.
pub(crate) async fn serve(lifecycle: Lifecycle, receive: Receiver, send: Sender) -> Result<(), Error> {
    match receive.recv().await? {
        Message::LifespanStartup => {}
        other => return Err(Error::unexpected("lifespan.startup", &other)),
    }
    if let Err(err) = lifecycle.run(Event::Startup).await {
        error!(error = %err, "startup failed");
        send.send(Message::LifespanStartupFailed { message: err.to_string() }).await?;
        return Err(err);
    }
    send.send(Message::LifespanStartupComplete).await?;
    info!("startup complete");

    match receive.recv().await? {
        Message::LifespanShutdown => {}
        other => return Err(Error::unexpected("lifespan.shutdown", &other)),
    }
    if let Err(err) = lifecycle.run(Event::Shutdown).await {
        error!(error = %err, "shutdown failed");
        send.send(Message::LifespanShutdownFailed { message: err.to_string() }).await?;
        return Err(err);
    }
    send.send(Message::LifespanShutdownComplete).await
}
