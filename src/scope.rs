//! Per-connection scope.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use http::{Extensions, Method};

use crate::message::Headers;

/// What kind of connection a [`Scope`] describes.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum ScopeKind {
    Http,
    WebSocket,
    Lifespan,
}

/// The application-wide context a scope points back to.
///
/// Attached once, by the [`App`](crate::App) entry point, so that inner
/// layers can read the debug flag and shared state without globals.
pub struct AppContext {
    debug: bool,
    state: Arc<Extensions>,
}

impl AppContext {
    pub(crate) fn new(debug: bool, state: Arc<Extensions>) -> Self {
        Self { debug, state }
    }

    pub fn debug(&self) -> bool { self.debug }

    /// Shared state registered with [`App::insert_state`](crate::App::insert_state).
    pub fn state<T: Send + Sync + 'static>(&self) -> Option<&T> {
        self.state.get::<T>()
    }
}

impl fmt::Debug for AppContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppContext")
            .field("debug", &self.debug)
            .finish_non_exhaustive()
    }
}

/// An immutable description of one connection.
///
/// Cloning is cheap enough to do per layer: layers that need to add
/// information (the router adding path parameters, the app attaching itself)
/// derive a new scope rather than mutating a shared one.
#[derive(Clone, Debug)]
pub struct Scope {
    kind: ScopeKind,
    method: Method,
    path: String,
    root_path: String,
    query: String,
    headers: Headers,
    params: Arc<HashMap<String, String>>,
    app: Option<Arc<AppContext>>,
}

impl Scope {
    fn new(kind: ScopeKind, method: Method, target: &str) -> Self {
        let (path, query) = target.split_once('?').unwrap_or((target, ""));
        Self {
            kind,
            method,
            path: path.to_owned(),
            root_path: String::new(),
            query: query.to_owned(),
            headers: Vec::new(),
            params: Arc::default(),
            app: None,
        }
    }

    /// An HTTP scope. `target` may carry a query string: `/items?page=2`.
    pub fn http(method: Method, target: &str) -> Self {
        Self::new(ScopeKind::Http, method, target)
    }

    pub fn websocket(target: &str) -> Self {
        Self::new(ScopeKind::WebSocket, Method::GET, target)
    }

    pub fn lifespan() -> Self {
        Self::new(ScopeKind::Lifespan, Method::GET, "")
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((
            Bytes::copy_from_slice(name.as_bytes()),
            Bytes::copy_from_slice(value.as_bytes()),
        ));
        self
    }

    pub fn with_headers(mut self, headers: Headers) -> Self {
        self.headers = headers;
        self
    }

    pub(crate) fn with_params(mut self, params: HashMap<String, String>) -> Self {
        if !params.is_empty() {
            let mut merged = (*self.params).clone();
            merged.extend(params);
            self.params = Arc::new(merged);
        }
        self
    }

    /// Moves the prefix a mount consumed onto `root_path`, leaving `path`
    /// relative to the mount point.
    pub(crate) fn mounted(mut self, prefix: &str, path: String) -> Self {
        self.root_path.push_str(prefix);
        self.path = path;
        self
    }

    pub(crate) fn with_app(mut self, app: Arc<AppContext>) -> Self {
        self.app = Some(app);
        self
    }

    pub fn kind(&self) -> ScopeKind { self.kind }
    pub fn method(&self) -> &Method { &self.method }
    pub fn path(&self) -> &str { &self.path }
    /// The path prefix consumed by enclosing mounts; empty outside a mount.
    pub fn root_path(&self) -> &str { &self.root_path }
    pub fn query(&self) -> &str { &self.query }
    pub fn headers(&self) -> &Headers { &self.headers }
    pub fn params(&self) -> &HashMap<String, String> { &self.params }

    /// The owning application, if the scope entered through one.
    pub fn app(&self) -> Option<&AppContext> { self.app.as_deref() }
}
