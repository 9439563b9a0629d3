//! Radix-tree request router.
//!
//! The innermost protocol unit. One tree per HTTP method plus one tree of
//! mounted protocol units that accept any method. The router never looks at
//! the layers around it; it only matches, and raises 404/405 for the
//! exception boundary to render.

use std::collections::HashMap;
use std::sync::Arc;

use http::{Method, StatusCode};
use matchit::Router as MatchitRouter;

use crate::error::{Error, HttpError};
use crate::handler::Handler;
use crate::lifespan::{self, Lifecycle};
use crate::message::Message;
use crate::protocol::{Application, BoxFuture, BoxedApp, Receiver, Sender};
use crate::response::Response;
use crate::scope::{Scope, ScopeKind};

/// The application router.
///
/// Each registration returns `self` so registrations chain naturally.
/// Cloning is cheap: routes are shared, not copied.
#[derive(Clone, Default)]
pub struct Router {
    routes: HashMap<Method, MatchitRouter<BoxedApp>>,
    mounts: MatchitRouter<BoxedApp>,
    lifecycle: Lifecycle,
}

/// Catch-all parameter a mount registers to accept everything below it.
const MOUNT_REST: &str = "mount_rest";

enum Lookup {
    Found(BoxedApp, HashMap<String, String>),
    /// A mount matched: the consumed prefix and the path left for the unit.
    Mounted(BoxedApp, HashMap<String, String>, String, String),
    MethodNotAllowed(Vec<Method>),
    NotFound,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for a method + path pair. Returns `self` for chaining.
    ///
    /// Path parameters use `{name}` syntax — `req.param("name")` retrieves them:
    ///
    /// ```rust
    /// # use strata::{Request, Response, Router};
    /// # use http::Method;
    /// # async fn get_user(_: Request) -> Response { Response::text("") }
    /// # async fn create_user(_: Request) -> Response { Response::text("") }
    /// Router::new()
    ///     .on(Method::GET,  "/users/{id}", get_user)
    ///     .on(Method::POST, "/users",      create_user);
    /// ```
    ///
    /// # Panics
    ///
    /// Panics if `path` is not a valid route or conflicts with one already
    /// registered for `method`.
    pub fn on(mut self, method: Method, path: &str, handler: impl Handler) -> Self {
        self.routes
            .entry(method)
            .or_default()
            .insert(path, handler.into_app())
            .unwrap_or_else(|e| panic!("invalid route `{path}`: {e}"));
        self
    }

    pub fn get(self, path: &str, handler: impl Handler) -> Self {
        self.on(Method::GET, path, handler)
    }

    pub fn post(self, path: &str, handler: impl Handler) -> Self {
        self.on(Method::POST, path, handler)
    }

    pub fn put(self, path: &str, handler: impl Handler) -> Self {
        self.on(Method::PUT, path, handler)
    }

    pub fn delete(self, path: &str, handler: impl Handler) -> Self {
        self.on(Method::DELETE, path, handler)
    }

    /// Mount a raw protocol unit on `path` and everything below it, for any
    /// method and for websocket scopes. Method-specific routes win over
    /// mounts.
    ///
    /// The unit sees the remaining path (`/` for the mount point itself) and
    /// finds the consumed prefix in [`Scope::root_path`]:
    ///
    /// ```rust
    /// # use strata::{Request, Router};
    /// # async fn list(_: Request) -> &'static str { "" }
    /// let api = Router::new().get("/users", list);
    /// // GET /api/users reaches `list`.
    /// Router::new().mount("/api", api);
    /// ```
    ///
    /// # Panics
    ///
    /// Panics if `path` is not a valid route or is already mounted.
    pub fn mount(mut self, path: &str, app: impl Application) -> Self {
        let app: BoxedApp = Arc::new(app);
        let prefix = path.trim_end_matches('/');
        let exact = if prefix.is_empty() { "/" } else { prefix };
        for route in [exact.to_owned(), format!("{prefix}/{{*{MOUNT_REST}}}")] {
            self.mounts
                .insert(route, Arc::clone(&app))
                .unwrap_or_else(|e| panic!("invalid mount `{path}`: {e}"));
        }
        self
    }

    pub(crate) fn lifecycle(&self) -> &Lifecycle {
        &self.lifecycle
    }

    pub(crate) fn set_lifecycle(&mut self, lifecycle: Lifecycle) {
        self.lifecycle = lifecycle;
    }

    fn lookup(&self, kind: ScopeKind, method: &Method, path: &str) -> Lookup {
        if kind == ScopeKind::Http {
            if let Some(found) = self.routes.get(method).and_then(|tree| matched(tree, path)) {
                return found;
            }
        }
        if let Some(found) = mounted(&self.mounts, path) {
            return found;
        }
        if kind != ScopeKind::Http {
            return Lookup::NotFound;
        }

        let mut allowed: Vec<Method> = self
            .routes
            .iter()
            .filter(|(_, tree)| tree.at(path).is_ok())
            .map(|(method, _)| method.clone())
            .collect();
        if allowed.is_empty() {
            return Lookup::NotFound;
        }
        allowed.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        Lookup::MethodNotAllowed(allowed)
    }
}

fn matched(tree: &MatchitRouter<BoxedApp>, path: &str) -> Option<Lookup> {
    let matched = tree.at(path).ok()?;
    let params = matched.params.iter()
        .map(|(k, v)| (k.to_owned(), v.to_owned()))
        .collect();
    Some(Lookup::Found(Arc::clone(matched.value), params))
}

fn mounted(tree: &MatchitRouter<BoxedApp>, path: &str) -> Option<Lookup> {
    let matched = tree.at(path).ok()?;
    let rest = matched.params.get(MOUNT_REST).unwrap_or("");
    let prefix = path.strip_suffix(rest).unwrap_or(path).trim_end_matches('/');
    let params = matched.params.iter()
        .filter(|(k, _)| *k != MOUNT_REST)
        .map(|(k, v)| (k.to_owned(), v.to_owned()))
        .collect();
    Some(Lookup::Mounted(Arc::clone(matched.value), params, prefix.to_owned(), format!("/{rest}")))
}

impl Application for Router {
    fn call(&self, scope: Scope, receive: Receiver, send: Sender) -> BoxFuture<Result<(), Error>> {
        if scope.kind() == ScopeKind::Lifespan {
            return Box::pin(lifespan::serve(self.lifecycle.clone(), receive, send));
        }

        match self.lookup(scope.kind(), scope.method(), scope.path()) {
            Lookup::Found(app, params) => app.call(scope.with_params(params), receive, send),
            Lookup::Mounted(app, params, prefix, rest) => {
                app.call(scope.with_params(params).mounted(&prefix, rest), receive, send)
            }
            Lookup::MethodNotAllowed(allowed) => {
                let allow = allowed.iter().map(Method::as_str).collect::<Vec<_>>().join(", ");
                let err = HttpError::new(StatusCode::METHOD_NOT_ALLOWED).with_header("allow", &allow);
                Box::pin(reject(scope, send, err))
            }
            Lookup::NotFound => Box::pin(reject(scope, send, HttpError::new(StatusCode::NOT_FOUND))),
        }
    }
}

/// Inside an app, raise so the exception boundary renders the response;
/// standalone, answer directly.
async fn reject(scope: Scope, send: Sender, err: HttpError) -> Result<(), Error> {
    if scope.kind() == ScopeKind::WebSocket {
        return send.send(Message::WebSocketClose { code: 1000 }).await;
    }
    if scope.app().is_some() {
        return Err(err.into());
    }
    Response::builder()
        .status(err.status())
        .headers(err.headers())
        .text(err.detail())
        .send_to(&send)
        .await
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::protocol::app_fn;

    fn recorder() -> (Sender, Arc<Mutex<Vec<Message>>>) {
        let sent = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&sent);
        let send = Sender::from_fn(move |message| {
            sink.lock().unwrap().push(message);
            async { Ok(()) }
        });
        (send, sent)
    }

    async fn ok(_req: crate::request::Request) -> &'static str {
        "ok"
    }

    #[test]
    fn lookup_prefers_method_routes_over_mounts() {
        let router = Router::new()
            .get("/items/{id}", ok)
            .mount("/items/{id}", app_fn(|_, _, _| async { Ok(()) }));

        assert!(matches!(
            router.lookup(ScopeKind::Http, &Method::GET, "/items/7"),
            Lookup::Found(_, params) if params["id"] == "7"
        ));
        // Any other method falls through to the mount.
        assert!(matches!(
            router.lookup(ScopeKind::Http, &Method::PATCH, "/items/7"),
            Lookup::Mounted(..)
        ));
    }

    #[test]
    fn lookup_lists_allowed_methods_sorted() {
        let router = Router::new()
            .put("/items/{id}", ok)
            .get("/items/{id}", ok)
            .delete("/items/{id}", ok);

        match router.lookup(ScopeKind::Http, &Method::POST, "/items/1") {
            Lookup::MethodNotAllowed(allowed) => {
                assert_eq!(allowed, [Method::DELETE, Method::GET, Method::PUT]);
            }
            _ => panic!("expected 405"),
        }
        assert!(matches!(router.lookup(ScopeKind::Http, &Method::GET, "/other"), Lookup::NotFound));
    }

    #[test]
    fn websocket_scopes_only_see_mounts() {
        let router = Router::new().get("/chat", ok);
        assert!(matches!(router.lookup(ScopeKind::WebSocket, &Method::GET, "/chat"), Lookup::NotFound));
    }

    #[test]
    #[should_panic(expected = "invalid route")]
    fn conflicting_route_panics() {
        let _ = Router::new().get("/a/{x}", ok).get("/a/{y}", ok);
    }

    #[tokio::test]
    async fn standalone_router_answers_misses_directly() {
        let (send, sent) = recorder();
        Router::new()
            .call(Scope::http(Method::GET, "/missing"), Receiver::empty(), send)
            .await
            .unwrap();

        let sent = sent.lock().unwrap();
        assert!(matches!(sent[0], Message::ResponseStart { status: 404, .. }));
        assert_eq!(sent[1], Message::body("Not Found", false));
    }

    #[tokio::test]
    async fn path_params_reach_the_endpoint() {
        let (send, sent) = recorder();
        Router::new()
            .get("/users/{id}", |req: crate::request::Request| async move {
                format!("user {}", req.param("id").unwrap_or("?"))
            })
            .call(Scope::http(Method::GET, "/users/42?full=1"), Receiver::empty(), send)
            .await
            .unwrap();

        assert_eq!(sent.lock().unwrap()[1], Message::body("user 42", false));
    }

    #[test]
    fn mounts_match_everything_below_their_prefix() {
        let router = Router::new()
            .mount("/api/", app_fn(|_, _, _| async { Ok(()) }))
            .mount("/teams/{team}", app_fn(|_, _, _| async { Ok(()) }));

        match router.lookup(ScopeKind::Http, &Method::GET, "/api/users/7") {
            Lookup::Mounted(_, params, prefix, rest) => {
                assert!(params.is_empty());
                assert_eq!((prefix.as_str(), rest.as_str()), ("/api", "/users/7"));
            }
            _ => panic!("expected a mount"),
        }
        match router.lookup(ScopeKind::Http, &Method::POST, "/api") {
            Lookup::Mounted(_, _, prefix, rest) => assert_eq!((prefix.as_str(), rest.as_str()), ("/api", "/")),
            _ => panic!("expected a mount"),
        }
        match router.lookup(ScopeKind::WebSocket, &Method::GET, "/teams/red/chat") {
            Lookup::Mounted(_, params, prefix, rest) => {
                assert_eq!(params["team"], "red");
                assert_eq!((prefix.as_str(), rest.as_str()), ("/teams/red", "/chat"));
            }
            _ => panic!("expected a mount"),
        }
        assert!(matches!(router.lookup(ScopeKind::Http, &Method::GET, "/apis"), Lookup::NotFound));
    }

    #[tokio::test]
    async fn mounted_router_sees_the_remaining_path() {
        let (send, sent) = recorder();
        let users = Router::new().get("/users/{id}", |req: crate::request::Request| async move {
            format!("{} {} {}", req.root_path(), req.path(), req.param("id").unwrap_or("?"))
        });
        Router::new()
            .mount("/v1", Router::new().mount("/accounts", users))
            .call(Scope::http(Method::GET, "/v1/accounts/users/9"), Receiver::empty(), send)
            .await
            .unwrap();

        assert_eq!(sent.lock().unwrap()[1], Message::body("/v1/accounts /users/9 9", false));
    }
}
