//! Minimal strata example: JSON endpoints, a dispatch middleware, custom
//! error pages and lifecycle hooks.
//!
//! Run with:
//!   RUST_LOG=info cargo run --example basic
//!
//! Try:
//!   curl -i http://localhost:3000/users/42
//!   curl -i -X POST http://localhost:3000/users -d '{"name":"alice"}'
//!   curl -i http://localhost:3000/nope
//!   curl -i http://localhost:3000/boom

use std::time::Instant;

use strata::lifespan::hook;
use strata::middleware::Middleware;
use strata::{
    App, Error, HandlerKey, HttpError, Next, Request, Response, Router, Server, StatusCode,
};
use tracing::info;

#[derive(Debug, thiserror::Error)]
#[error("database connection refused")]
struct Database;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let router = Router::new()
        .get("/users/{id}", get_user)
        .post("/users", create_user)
        .get("/boom", boom);

    let app = App::builder()
        .router(router)
        .debug(std::env::var_os("STRATA_DEBUG").is_some())
        .middleware(Middleware::http(timing))
        .exception_handler(StatusCode::NOT_FOUND, |req: Request, _: &Error| {
            Response::builder()
                .status(StatusCode::NOT_FOUND)
                .json(format!(r#"{{"error":"no route for {}"}}"#, req.path()).into_bytes())
        })
        .exception_handler(HandlerKey::Any, |_: Request, err: &Error| {
            let reason = err.to_string();
            async move {
                report(&reason).await;
                Response::builder()
                    .status(StatusCode::INTERNAL_SERVER_ERROR)
                    .json(br#"{"error":"internal"}"#.to_vec())
            }
        })
        .on_startup(hook(|| async {
            info!("connecting to the database");
            Ok(())
        }))
        .on_shutdown(hook(|| async {
            info!("closing the database");
            Ok(())
        }))
        .build()
        .expect("invalid app configuration");

    Server::bind("0.0.0.0:3000")
        .serve(app)
        .await
        .expect("server error");
}

// Runs around everything inside it; the body may still be streaming when
// `next.run` returns.
async fn timing(req: Request, next: Next) -> Result<Response, Error> {
    let start = Instant::now();
    let path = req.path().to_owned();
    let mut response = next.run(req).await?;
    let elapsed = start.elapsed();
    response.append_header("x-response-time-us", &elapsed.as_micros().to_string());
    info!(path = %path, status = response.status_code(), ?elapsed, "request");
    Ok(response)
}

// Stands in for shipping the error to an incident tracker.
async fn report(reason: &str) {
    tokio::task::yield_now().await;
    info!(reason, "error reported");
}

// GET /users/{id}
async fn get_user(req: Request) -> Response {
    let id = req.param("id").unwrap_or("unknown");
    Response::json(format!(r#"{{"id":"{id}","name":"alice"}}"#).into_bytes())
}

// POST /users: 400 on an empty body, raised for the exception boundary.
async fn create_user(req: Request) -> Result<Response, Error> {
    let body = req.body().await?;
    if body.is_empty() {
        return Err(HttpError::new(StatusCode::BAD_REQUEST).with_detail("empty body").into());
    }

    Ok(Response::builder()
        .status(StatusCode::CREATED)
        .header("location", "/users/99")
        .json(r#"{"id":"99","name":"new_user"}"#.to_owned().into_bytes()))
}

// GET /boom: unhandled, caught by the outer boundary.
async fn boom(_req: Request) -> Result<Response, Error> {
    Err(Error::handler(Database))
}
