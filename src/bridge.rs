//! Request/response bridging.
//!
//! # Turning pushed messages into a response value
//!
//! An [`Application`](crate::Application) pushes its response out as
//! messages; a middleware written as `dispatch(request, next)` wants a
//! [`Response`] value back from `next`. [`forward`] reconciles the two:
//!
//! ```text
//!   forward(app, request)                      spawned task
//!   ─────────────────────                      ────────────
//!   queue.recv() ◀──── Some(start) ─────────── app.call(scope, receive, push)
//!   return Response {                          │
//!       status, headers,                       │
//!       body: stream ◀─── Some(body) ───────── │
//!                    ◀─── Some(body) ───────── │
//!                    ◀─── None ─────────────── sentinel (drop guard)
//!   }                       │
//!                           └─ join the task, surface its error
//! ```
//!
//! The response comes back as soon as the start message does; the body is
//! still being produced. An error the application raises *after* its start
//! message therefore cannot fail `forward`; the body stream yields it at end
//! of stream. Callers must drain the body to see it.
//!
//! Dropping the body before the end aborts the inner task.

use std::any::Any;

use futures_util::stream::{self, StreamExt};
use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinHandle};
use tracing::debug;

use crate::error::Error;
use crate::message::Message;
use crate::protocol::{BoxedApp, Sender};
use crate::request::Request;
use crate::response::Response;

/// `Some(message)` from the inner unit, or `None` once it has finished.
type Queue = mpsc::UnboundedReceiver<Option<Message>>;

/// Runs `app` for `request` on its own task and returns its response as soon
/// as the response has started.
///
/// # Errors
///
/// - whatever `app` failed with, if it failed before sending anything;
/// - [`Error::NoResponse`] if it finished without sending anything;
/// - [`Error::UnexpectedMessage`] if its first message was not
///   `http.response.start`.
pub async fn forward(app: &BoxedApp, request: Request) -> Result<Response, Error> {
    let (tx, mut queue) = mpsc::unbounded_channel();
    let (scope, receive) = request.into_parts();

    let push = {
        let tx = tx.clone();
        Sender::from_fn(move |message| {
            let pushed = tx.send(Some(message)).map_err(|_| Error::Disconnected);
            async move { pushed }
        })
    };

    let app = BoxedApp::clone(app);
    let mut task = Task(Some(tokio::spawn(async move {
        let _sentinel = Sentinel(tx);
        app.call(scope, receive, push).await
    })));

    let message = match queue.recv().await {
        Some(Some(message)) => message,
        Some(None) | None => {
            task.outcome().await?;
            return Err(Error::NoResponse);
        }
    };

    match message {
        Message::ResponseStart { status, headers } => {
            Ok(Response::streaming(status, headers, body_stream(queue, task)))
        }
        other => Err(Error::unexpected("http.response.start", &other)),
    }
}

/// Pops body chunks until the sentinel, then reports the task's outcome.
fn body_stream(queue: Queue, task: Task) -> crate::response::BodyStream {
    stream::unfold(Some((queue, task)), |state| async move {
        let (mut queue, mut task) = state?;
        match queue.recv().await {
            Some(Some(Message::ResponseBody { chunk, .. })) => Some((Ok(chunk), Some((queue, task)))),
            Some(Some(other)) => Some((Err(Error::unexpected("http.response.body", &other)), None)),
            Some(None) | None => match task.outcome().await {
                Ok(()) => None,
                Err(err) => Some((Err(err), None)),
            },
        }
    })
    .boxed()
}

/// Pushes the end-of-stream sentinel when the inner unit's future is
/// dropped: after it returns, fails, panics or is aborted.
struct Sentinel(mpsc::UnboundedSender<Option<Message>>);

impl Drop for Sentinel {
    fn drop(&mut self) {
        let _ = self.0.send(None);
    }
}

/// The inner unit's task. Aborted if dropped before its outcome was taken.
struct Task(Option<JoinHandle<Result<(), Error>>>);

impl Task {
    async fn outcome(&mut self) -> Result<(), Error> {
        match self.0.take() {
            Some(handle) => handle.await.unwrap_or_else(|err| Err(join_error(err))),
            None => Ok(()),
        }
    }
}

impl Drop for Task {
    fn drop(&mut self) {
        if let Some(handle) = self.0.take() {
            if !handle.is_finished() {
                debug!("response abandoned before end of stream, aborting inner application");
                handle.abort();
            }
        }
    }
}

fn join_error(err: JoinError) -> Error {
    if err.is_cancelled() {
        return Error::Cancelled;
    }
    Error::Panic(panic_message(err.into_panic()))
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    match payload.downcast::<String>() {
        Ok(msg) => *msg,
        Err(payload) => payload
            .downcast_ref::<&'static str>()
            .map(|s| (*s).to_owned())
            .unwrap_or_else(|| "unknown panic payload".to_owned()),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use bytes::Bytes;
    use http::Method;
    use tokio::sync::oneshot;

    use super::*;
    use crate::protocol::{Receiver, app_fn};
    use crate::response::Body;
    use crate::scope::Scope;

    #[derive(Debug, thiserror::Error)]
    #[error("boom")]
    struct Boom;

    fn request() -> Request {
        Request::new(Scope::http(Method::GET, "/"), Receiver::empty())
    }

    fn boxed(app: impl crate::Application) -> BoxedApp {
        Arc::new(app)
    }

    async fn chunks(response: Response) -> Vec<Result<Bytes, Error>> {
        match response.into_body() {
            Body::Stream(stream) => stream.collect().await,
            Body::Full(bytes) => vec![Ok(bytes)],
        }
    }

    #[tokio::test]
    async fn replays_status_headers_and_chunks_in_order() {
        let app = boxed(app_fn(|_, _, send| async move {
            send.send(Message::start(201, &[("x-a", "1"), ("x-b", "2")])).await?;
            send.send(Message::body("one", true)).await?;
            send.send(Message::body("", true)).await?;
            send.send(Message::body("two", false)).await
        }));

        let response = forward(&app, request()).await.unwrap();
        assert_eq!(response.status_code(), 201);
        assert_eq!(response.header("x-a"), Some(&b"1"[..]));
        assert_eq!(response.headers().len(), 2);

        let chunks: Vec<Bytes> = chunks(response).await.into_iter().map(Result::unwrap).collect();
        assert_eq!(chunks, vec![Bytes::from("one"), Bytes::new(), Bytes::from("two")]);
    }

    #[tokio::test]
    async fn error_before_start_fails_forward() {
        let app = boxed(app_fn(|_, _, _| async { Err(Error::handler(Boom)) }));
        let err = forward(&app, request()).await.unwrap_err();
        assert!(err.downcast_ref::<Boom>().is_some());
    }

    #[tokio::test]
    async fn error_after_start_surfaces_at_end_of_body() {
        let app = boxed(app_fn(|_, _, send| async move {
            send.send(Message::start(200, &[])).await?;
            Err(Error::handler(Boom))
        }));

        let response = forward(&app, request()).await.unwrap();
        assert_eq!(response.status_code(), 200);

        let chunks = chunks(response).await;
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].as_ref().unwrap_err().downcast_ref::<Boom>().is_some());
    }

    #[tokio::test]
    async fn silent_app_is_a_contract_violation() {
        let app = boxed(app_fn(|_, _, _| async { Ok(()) }));
        let err = forward(&app, request()).await.unwrap_err();
        assert!(matches!(err, Error::NoResponse));
        assert!(err.is_contract_violation());
    }

    #[tokio::test]
    async fn body_before_start_is_rejected() {
        let app = boxed(app_fn(|_, _, send| async move {
            send.send(Message::body("early", false)).await
        }));
        let err = forward(&app, request()).await.unwrap_err();
        assert!(matches!(
            err,
            Error::UnexpectedMessage { expected: "http.response.start", found: "http.response.body" }
        ));
    }

    #[tokio::test]
    async fn panic_before_start_is_reported() {
        let app = boxed(app_fn(|_, _, _| async { panic!("kaboom") }));
        let err = forward(&app, request()).await.unwrap_err();
        assert!(matches!(err, Error::Panic(ref msg) if msg == "kaboom"));
    }

    #[tokio::test]
    async fn response_returns_before_body_is_produced() {
        let (release_tx, release_rx) = oneshot::channel::<()>();
        let release = Arc::new(tokio::sync::Mutex::new(Some(release_rx)));

        let app = boxed(app_fn(move |_, _, send| {
            let release = Arc::clone(&release);
            async move {
                send.send(Message::start(200, &[])).await?;
                if let Some(rx) = release.lock().await.take() {
                    let _ = rx.await;
                }
                send.send(Message::body("late", false)).await
            }
        }));

        let response = tokio::time::timeout(Duration::from_secs(1), forward(&app, request()))
            .await
            .expect("forward waited for the body")
            .unwrap();

        release_tx.send(()).unwrap();
        assert_eq!(response.into_body().collect().await.unwrap(), Bytes::from("late"));
    }

    #[tokio::test]
    async fn dropping_the_body_aborts_the_inner_task() {
        let (done_tx, done_rx) = oneshot::channel::<()>();
        let done = Arc::new(std::sync::Mutex::new(Some(done_tx)));

        let app = boxed(app_fn(move |_, _, send| {
            let done = Arc::clone(&done);
            async move {
                // Held across the wait; dropped with the future when aborted.
                let _guard = done.lock().map(|mut slot| slot.take()).ok().flatten();
                send.send(Message::start(200, &[])).await?;
                std::future::pending::<()>().await;
                Ok(())
            }
        }));

        let response = forward(&app, request()).await.unwrap();
        drop(response);

        // The sender half is dropped when the aborted future is torn down.
        let closed = tokio::time::timeout(Duration::from_secs(1), done_rx).await;
        assert!(matches!(closed, Ok(Err(_))));
    }
}
