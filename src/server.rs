//! HTTP server and graceful shutdown.
//!
//! The server is the one place that speaks both HTTP and the message
//! protocol. Per request it builds a [`Scope`] from the hyper request, feeds
//! the body frames through a [`Receiver`], and turns the application's
//! outbound messages back into a hyper response with the same bridge that
//! [`Next`](crate::Next) uses.
//!
//! # Lifecycle
//!
//! 1. A `lifespan` scope is opened and startup is awaited before the first
//!    `accept()`. A failed startup aborts [`Server::serve`].
//! 2. On SIGTERM or Ctrl-C, `accept()` stops and in-flight connections are
//!    drained.
//! 3. Shutdown is sent on the lifespan scope and awaited.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use futures_util::future;
use futures_util::stream::StreamExt;
use http_body_util::BodyExt;
use http_body_util::combinators::UnsyncBoxBody;
use hyper::body::{Body as _, Incoming};
use hyper::service::service_fn;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as ConnBuilder;
use tokio::net::TcpListener;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::bridge;
use crate::error::Error;
use crate::message::Message;
use crate::protocol::{Application, BoxedApp, Receiver, Sender};
use crate::request::Request;
use crate::response::{Body, Response};
use crate::scope::Scope;

/// The HTTP server.
pub struct Server {
    addr: SocketAddr,
}

impl Server {
    /// Configures the server to bind to `addr` when [`serve`](Server::serve)
    /// is called.
    ///
    /// # Panics
    ///
    /// Panics if `addr` is not a valid `host:port` string.
    ///
    /// # Example
    ///
    /// ```rust,no_run
    /// use strata::Server;
    /// let server = Server::bind("0.0.0.0:3000");
    /// ```
    pub fn bind(addr: &str) -> Self {
        let addr: SocketAddr = addr.parse().expect("invalid socket address");
        Self { addr }
    }

    /// Serves `app` until SIGTERM or Ctrl-C, then drains in-flight requests.
    pub async fn serve(self, app: impl Application) -> Result<(), Error> {
        self.serve_with_shutdown(app, shutdown_signal()).await
    }

    /// Serves `app` until `signal` resolves, then drains in-flight requests.
    pub async fn serve_with_shutdown(
        self,
        app: impl Application,
        signal: impl Future<Output = ()>,
    ) -> Result<(), Error> {
        let listener = TcpListener::bind(self.addr).await?;
        serve_on(listener, app, signal).await
    }
}

/// Serves `app` on an already bound listener until `signal` resolves.
pub async fn serve_on(
    listener: TcpListener,
    app: impl Application,
    signal: impl Future<Output = ()>,
) -> Result<(), Error> {
    let app: BoxedApp = Arc::new(app);

    let mut lifespan = LifespanDriver::start(&app);
    lifespan.startup().await?;

    info!(addr = ?listener.local_addr().ok(), "strata listening");

    // JoinSet tracks every spawned connection task so we can wait for
    // them all to finish during graceful shutdown.
    let mut tasks = tokio::task::JoinSet::new();

    tokio::pin!(signal);

    loop {
        tokio::select! {
            // Shutdown first, so a SIGTERM stops accepting even if more
            // connections are queued.
            biased;

            () = &mut signal => {
                info!(in_flight = tasks.len(), "shutdown signal received, draining connections");
                break;
            }

            res = listener.accept() => {
                let (stream, remote_addr) = match res {
                    Ok(v) => v,
                    Err(e) => {
                        error!("accept error: {e}");
                        continue;
                    }
                };

                let app = Arc::clone(&app);
                let io = TokioIo::new(stream);

                tasks.spawn(async move {
                    // Called once per request on the connection.
                    let svc = service_fn(move |req| {
                        let app = Arc::clone(&app);
                        async move { dispatch(app, req).await }
                    });

                    if let Err(e) = ConnBuilder::new(TokioExecutor::new())
                        .serve_connection(io, svc)
                        .await
                    {
                        error!(peer = %remote_addr, "connection error: {e}");
                    }
                });
            }

            // Reap finished connection tasks so the JoinSet does not grow
            // without bound on long-running servers.
            Some(_) = tasks.join_next(), if !tasks.is_empty() => {}
        }
    }

    while tasks.join_next().await.is_some() {}

    lifespan.shutdown().await?;
    info!("strata stopped");
    Ok(())
}

// ── Request dispatch ──────────────────────────────────────────────────────────

/// Runs one request through the application.
///
/// The error type is [`Infallible`](std::convert::Infallible): an application
/// that fails before starting its response gets a bare 500; one that fails
/// mid-body ends the body stream with the error, and hyper drops the
/// connection.
async fn dispatch(
    app: BoxedApp,
    req: hyper::Request<Incoming>,
) -> Result<http::Response<UnsyncBoxBody<Bytes, Error>>, std::convert::Infallible> {
    let (parts, body) = req.into_parts();

    let target = parts.uri.path_and_query().map_or("/", |pq| pq.as_str());
    let headers = parts.headers.iter()
        .map(|(k, v)| (Bytes::copy_from_slice(k.as_str().as_bytes()), Bytes::copy_from_slice(v.as_bytes())))
        .collect();
    let scope = Scope::http(parts.method, target).with_headers(headers);

    let response = match bridge::forward(&app, Request::new(scope, body_receiver(body))).await {
        Ok(response) => end_body_on_error(response),
        Err(e) => {
            error!(error = %e, "application failed before responding");
            Response::builder()
                .status(http::StatusCode::INTERNAL_SERVER_ERROR)
                .text("Internal Server Error")
        }
    };

    Ok(response.into_hyper())
}

/// Logs an error raised after the response started and ends the body there.
///
/// By then the outer boundary has already answered whatever it could; passing
/// the error on would only make hyper reset the connection.
///
/// A `content-length` the application declared is kept. A body that ends
/// short of it makes hyper close the connection, so the client sees a
/// truncated response; chunked framing would mark the cut body complete.
fn end_body_on_error(response: Response) -> Response {
    let (status, headers, body) = response.into_parts();
    let body = match body {
        Body::Stream(stream) => Body::Stream(
            stream
                .scan((), |_, chunk| {
                    future::ready(match chunk {
                        Ok(chunk) => Some(Ok(chunk)),
                        Err(e) => {
                            error!(error = %e, "application failed after responding");
                            None
                        }
                    })
                })
                .boxed(),
        ),
        full => full,
    };
    Response::from_parts(status, headers, body)
}

/// Feeds the hyper body through the protocol as `http.request` messages,
/// then `http.disconnect` once it is exhausted.
fn body_receiver(body: Incoming) -> Receiver {
    let body = Arc::new(Mutex::new(Some(body)));
    Receiver::from_fn(move || {
        let body = Arc::clone(&body);
        async move {
            let mut slot = body.lock().await;
            let Some(incoming) = slot.as_mut() else {
                return Ok(Message::HttpDisconnect);
            };
            loop {
                match incoming.frame().await {
                    Some(Ok(frame)) => {
                        // Trailers are not part of the protocol.
                        let Ok(data) = frame.into_data() else { continue };
                        let more = !incoming.is_end_stream();
                        if !more {
                            *slot = None;
                        }
                        return Ok(Message::HttpRequest { body: data, more });
                    }
                    Some(Err(e)) => {
                        *slot = None;
                        warn!(error = %e, "request body error");
                        return Ok(Message::HttpDisconnect);
                    }
                    None => {
                        *slot = None;
                        return Ok(Message::HttpRequest { body: Bytes::new(), more: false });
                    }
                }
            }
        }
    })
}

// ── Lifespan ──────────────────────────────────────────────────────────────────

/// Drives the `lifespan` scope from the server side.
struct LifespanDriver {
    to_app: mpsc::UnboundedSender<Message>,
    from_app: mpsc::UnboundedReceiver<Message>,
    task: JoinHandle<Result<(), Error>>,
}

impl LifespanDriver {
    fn start(app: &BoxedApp) -> Self {
        let (to_app, inbound) = mpsc::unbounded_channel();
        let (outbound, from_app) = mpsc::unbounded_channel();

        let app = Arc::clone(app);
        let task = tokio::spawn(async move {
            app.call(Scope::lifespan(), Receiver::from_channel(inbound), Sender::from_channel(outbound))
                .await
        });

        Self { to_app, from_app, task }
    }

    async fn startup(&mut self) -> Result<(), Error> {
        match self.exchange(Message::LifespanStartup).await {
            Some(Message::LifespanStartupComplete) => Ok(()),
            Some(Message::LifespanStartupFailed { message }) => Err(Error::Lifespan(message)),
            Some(other) => Err(Error::unexpected("lifespan.startup.complete", &other)),
            // The application does not speak lifespan; serve anyway.
            None => {
                warn!("application has no lifespan support");
                Ok(())
            }
        }
    }

    async fn shutdown(mut self) -> Result<(), Error> {
        let result = match self.exchange(Message::LifespanShutdown).await {
            Some(Message::LifespanShutdownComplete) | None => Ok(()),
            Some(Message::LifespanShutdownFailed { message }) => Err(Error::Lifespan(message)),
            Some(other) => Err(Error::unexpected("lifespan.shutdown.complete", &other)),
        };
        if !self.task.is_finished() {
            self.task.abort();
        }
        result
    }

    /// Sends `message` and waits for the reply; `None` if the application
    /// has stopped listening.
    async fn exchange(&mut self, message: Message) -> Option<Message> {
        self.to_app.send(message).ok()?;
        self.from_app.recv().await
    }
}

// ── Shutdown signal ───────────────────────────────────────────────────────────

/// Resolves on the first shutdown signal the process receives.
///
/// On Unix this listens for both **SIGTERM** and **SIGINT** (Ctrl-C).
/// On Windows only Ctrl-C is available.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("failed to install Ctrl-C handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let sigterm = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let sigterm = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c   => {}
        () = sigterm  => {}
    }
}
