//! # strata
//!
//! A layered HTTP application core: an [`App`] composes user middleware
//! between two error boundaries around a [`Router`], and rebuilds that
//! composition whenever its configuration changes.
//!
//! ## The layers
//!
//! Every layer speaks the same calling convention, [`Application`]: it gets a
//! [`Scope`] describing the connection plus a [`Receiver`] and a [`Sender`]
//! for [`Message`]s, and resolves once it is done with the connection.
//!
//! ```text
//! ServerErrorMiddleware     500 / catch-all handler, debug report
//!   user middleware         last added runs first
//!     ExceptionMiddleware   status and error-type handlers
//!       Router              routes, mounts, lifespan
//! ```
//!
//! A middleware that would rather see a [`Response`] than a message stream
//! is written as `dispatch(request, next)`; [`Next::run`] bridges the
//! message stream of everything below it back into a value. See
//! [`middleware`].
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use strata::middleware::Middleware;
//! use strata::{App, Error, Next, Request, Response, Router, Server, StatusCode};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Error> {
//!     let router = Router::new()
//!         .get("/users/{id}", get_user);
//!
//!     let mut app = App::with_router(router);
//!     app.add_middleware(Middleware::http(timing));
//!     app.add_exception_handler(StatusCode::NOT_FOUND, |_req: Request, _err: &Error| {
//!         Response::text("nothing here")
//!     })
//!     .expect("404 is a valid status");
//!
//!     Server::bind("0.0.0.0:3000").serve(app).await
//! }
//!
//! async fn get_user(req: Request) -> Response {
//!     let id = req.param("id").unwrap_or("unknown");
//!     Response::json(format!(r#"{{"id":"{id}"}}"#).into_bytes())
//! }
//!
//! async fn timing(req: Request, next: Next) -> Result<Response, Error> {
//!     let start = std::time::Instant::now();
//!     let mut response = next.run(req).await?;
//!     response.append_header("x-elapsed-us", &start.elapsed().as_micros().to_string());
//!     Ok(response)
//! }
//! ```

mod app;
mod error;
mod handler;
mod message;
mod protocol;
mod request;
mod response;
mod router;
mod scope;
mod server;

pub mod bridge;
pub mod lifespan;
pub mod middleware;

pub use app::{App, AppBuilder};
pub use error::{BoxError, ConfigError, Error, HttpError};
pub use handler::{Handler, HandlerOutput};
pub use lifespan::{Event, Hook, Lifespan, hook};
pub use message::{Headers, Message};
pub use middleware::{HandlerKey, Middleware, Next};
pub use protocol::{AppFn, Application, BoxFuture, BoxedApp, Receiver, Sender, app_fn};
pub use request::Request;
pub use response::{Body, BodyStream, ContentType, IntoResponse, Response, ResponseBuilder};
pub use router::Router;
pub use scope::{AppContext, Scope, ScopeKind};
pub use server::{Server, serve_on};

pub use http::{Method, StatusCode};
