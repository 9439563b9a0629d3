//! The application: configuration plus the composed middleware stack.
//!
//! # Rebuild, never patch
//!
//! The stack is a pure function of the current configuration. Every
//! configuration change recomputes it from scratch and swaps the single
//! [`BoxedApp`] the app calls into:
//!
//! ```text
//! ServerErrorMiddleware(outer handler, debug)
//!   └─ user middleware, most recently added first
//!        └─ ExceptionMiddleware(other handlers, debug)
//!             └─ Router
//! ```
//!
//! A connection clones the current stack when it enters, so it finishes on
//! the composition it started with even if the app is reconfigured
//! meanwhile. Reconfiguring takes `&mut App`: it happens before serving, not
//! during.

use std::sync::Arc;

use http::{Extensions, Method};
use tracing::debug;

use crate::error::{ConfigError, Error};
use crate::handler::Handler;
use crate::lifespan::{Event, Hook, Lifecycle, Lifespan};
use crate::middleware::{
    ExceptionHandlers, ExceptionMiddleware, HandlerKey, IntoErrorResponse, Middleware, ServerErrorMiddleware,
    exception_handler,
};
use crate::protocol::{Application, BoxFuture, BoxedApp, Receiver, Sender};
use crate::request::Request;
use crate::router::Router;
use crate::scope::{AppContext, Scope};

pub struct App {
    debug: bool,
    state: Arc<Extensions>,
    router: Router,
    exception_handlers: ExceptionHandlers,
    user_middleware: Vec<Middleware>,
    context: Arc<AppContext>,
    stack: BoxedApp,
}

impl App {
    /// An app with no routes: every HTTP request answers 404.
    pub fn new() -> Self {
        Self::from_parts(false, Extensions::new(), Router::new(), ExceptionHandlers::new(), Vec::new())
    }

    /// An app serving `router`.
    pub fn with_router(router: Router) -> Self {
        Self::from_parts(false, Extensions::new(), router, ExceptionHandlers::new(), Vec::new())
    }

    pub fn builder() -> AppBuilder {
        AppBuilder::default()
    }

    fn from_parts(
        debug: bool,
        state: Extensions,
        router: Router,
        exception_handlers: ExceptionHandlers,
        user_middleware: Vec<Middleware>,
    ) -> Self {
        let state = Arc::new(state);
        let context = Arc::new(AppContext::new(debug, Arc::clone(&state)));
        let stack = build_middleware_stack(debug, &router, &exception_handlers, &user_middleware);
        Self { debug, state, router, exception_handlers, user_middleware, context, stack }
    }

    pub fn debug(&self) -> bool {
        self.debug
    }

    pub fn set_debug(&mut self, debug: bool) {
        self.debug = debug;
        self.rebuild();
    }

    /// Adds `middleware` as the new outermost user layer.
    pub fn add_middleware(&mut self, middleware: Middleware) {
        self.user_middleware.insert(0, middleware);
        self.rebuild();
    }

    /// Registers an exception handler.
    ///
    /// Handlers for status 500 and for [`HandlerKey::Any`] go to the outer
    /// error boundary; all others to the inner exception boundary. A handler
    /// returns either a [`Response`](crate::Response) or a future of one; see
    /// [`exception_handler`](crate::middleware::exception_handler).
    ///
    /// # Errors
    ///
    /// [`ConfigError::InvalidStatusCode`] for a status key outside
    /// `100..=599`. Nothing is registered in that case.
    pub fn add_exception_handler<H, R>(&mut self, key: impl Into<HandlerKey>, handler: H) -> Result<(), ConfigError>
    where
        H: Fn(Request, &Error) -> R + Send + Sync + 'static,
        R: IntoErrorResponse,
    {
        self.exception_handlers.insert(key.into(), exception_handler(handler))?;
        self.rebuild();
        Ok(())
    }

    pub fn add_route(&mut self, method: Method, path: &str, handler: impl Handler) {
        self.router = std::mem::take(&mut self.router).on(method, path, handler);
        self.rebuild();
    }

    pub fn mount(&mut self, path: &str, app: impl Application) {
        self.router = std::mem::take(&mut self.router).mount(path, app);
        self.rebuild();
    }

    /// Registers a startup or shutdown hook.
    ///
    /// # Errors
    ///
    /// [`ConfigError::LifespanConflict`] if a lifespan context is configured.
    pub fn add_event_handler(&mut self, event: Event, hook: Hook) -> Result<(), ConfigError> {
        let mut lifecycle = self.router.lifecycle().clone();
        add_hook(&mut lifecycle, event, hook)?;
        self.router.set_lifecycle(lifecycle);
        self.rebuild();
        Ok(())
    }

    /// Stores shared state, readable through [`Request::state`].
    pub fn insert_state<T: Clone + Send + Sync + 'static>(&mut self, value: T) {
        Arc::make_mut(&mut self.state).insert(value);
        self.rebuild();
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    /// The active composition, as used by the next connection.
    pub fn middleware_stack(&self) -> BoxedApp {
        Arc::clone(&self.stack)
    }

    fn rebuild(&mut self) {
        self.context = Arc::new(AppContext::new(self.debug, Arc::clone(&self.state)));
        self.stack = build_middleware_stack(
            self.debug,
            &self.router,
            &self.exception_handlers,
            &self.user_middleware,
        );
        debug!(
            debug = self.debug,
            middleware = self.user_middleware.len(),
            handlers = self.exception_handlers.len(),
            "middleware stack rebuilt"
        );
    }
}

impl Default for App {
    fn default() -> Self { Self::new() }
}

impl Application for App {
    fn call(&self, scope: Scope, receive: Receiver, send: Sender) -> BoxFuture<Result<(), Error>> {
        self.stack.call(scope.with_app(Arc::clone(&self.context)), receive, send)
    }
}

/// Router → inner boundary → user layers (last in the list innermost) →
/// outer boundary.
fn build_middleware_stack(
    debug: bool,
    router: &Router,
    handlers: &ExceptionHandlers,
    user_middleware: &[Middleware],
) -> BoxedApp {
    let (error_handler, exception_handlers) = handlers.split();

    let mut app: BoxedApp = Arc::new(router.clone());
    app = Arc::new(ExceptionMiddleware::new(app, exception_handlers, debug));
    for middleware in user_middleware.iter().rev() {
        app = middleware.wrap(app);
    }
    Arc::new(ServerErrorMiddleware::new(app, error_handler, debug))
}

fn add_hook(lifecycle: &mut Lifecycle, event: Event, hook: Hook) -> Result<(), ConfigError> {
    match lifecycle {
        Lifecycle::Hooks { startup, shutdown } => {
            match event {
                Event::Startup => startup.push(hook),
                Event::Shutdown => shutdown.push(hook),
            }
            Ok(())
        }
        Lifecycle::Context(_) => Err(ConfigError::LifespanConflict),
    }
}

// ── AppBuilder ────────────────────────────────────────────────────────────────

/// Construction-time configuration for an [`App`].
///
/// Middleware passed here keeps its order: the first one is the outermost
/// user layer.
#[derive(Default)]
pub struct AppBuilder {
    debug: bool,
    state: Extensions,
    router: Router,
    exception_handlers: ExceptionHandlers,
    middleware: Vec<Middleware>,
    startup: Vec<Hook>,
    shutdown: Vec<Hook>,
    lifespan: Option<Arc<dyn Lifespan>>,
    invalid: Option<ConfigError>,
}

impl AppBuilder {
    pub fn debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub fn router(mut self, router: Router) -> Self {
        self.router = router;
        self
    }

    pub fn middleware(mut self, middleware: Middleware) -> Self {
        self.middleware.push(middleware);
        self
    }

    pub fn exception_handler<H, R>(mut self, key: impl Into<HandlerKey>, handler: H) -> Self
    where
        H: Fn(Request, &Error) -> R + Send + Sync + 'static,
        R: IntoErrorResponse,
    {
        if let Err(err) = self.exception_handlers.insert(key.into(), exception_handler(handler)) {
            self.invalid.get_or_insert(err);
        }
        self
    }

    pub fn state<T: Clone + Send + Sync + 'static>(mut self, value: T) -> Self {
        self.state.insert(value);
        self
    }

    pub fn on_startup(mut self, hook: Hook) -> Self {
        self.startup.push(hook);
        self
    }

    pub fn on_shutdown(mut self, hook: Hook) -> Self {
        self.shutdown.push(hook);
        self
    }

    pub fn lifespan(mut self, lifespan: impl Lifespan) -> Self {
        self.lifespan = Some(Arc::new(lifespan));
        self
    }

    /// # Errors
    ///
    /// - [`ConfigError::LifespanConflict`] if both a lifespan context and
    ///   startup/shutdown hooks were given;
    /// - the first error from an invalid exception handler key.
    pub fn build(self) -> Result<App, ConfigError> {
        if let Some(err) = self.invalid {
            return Err(err);
        }

        let lifecycle = match self.lifespan {
            Some(_) if !self.startup.is_empty() || !self.shutdown.is_empty() => {
                return Err(ConfigError::LifespanConflict);
            }
            Some(ctx) => Lifecycle::Context(ctx),
            None => Lifecycle::Hooks { startup: self.startup, shutdown: self.shutdown },
        };

        let mut router = self.router;
        router.set_lifecycle(lifecycle);

        Ok(App::from_parts(self.debug, self.state, router, self.exception_handlers, self.middleware))
    }
}
