//! Protocol messages.
//!
//! Every exchange between a server and an application, and between two
//! layers of middleware, is one of these tagged records. [`Message::kind`]
//! returns the tag as it appears on the wire.

use bytes::Bytes;

/// Ordered `(name, value)` header pairs, kept as raw bytes.
///
/// No validation or normalisation happens at this level; names keep the
/// casing they were produced with and duplicates are allowed.
pub type Headers = Vec<(Bytes, Bytes)>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    // ── HTTP, inbound ─────────────────────────────────────────────────────────
    /// `http.request`: one chunk of the request body.
    HttpRequest { body: Bytes, more: bool },
    /// `http.disconnect`: the client went away, or the body is exhausted.
    HttpDisconnect,

    // ── HTTP, outbound ────────────────────────────────────────────────────────
    /// `http.response.start`: always the first outbound message.
    ResponseStart { status: u16, headers: Headers },
    /// `http.response.body`: the last one has `more == false`.
    ResponseBody { chunk: Bytes, more: bool },

    // ── Lifespan ──────────────────────────────────────────────────────────────
    LifespanStartup,
    LifespanStartupComplete,
    LifespanStartupFailed { message: String },
    LifespanShutdown,
    LifespanShutdownComplete,
    LifespanShutdownFailed { message: String },

    // ── WebSocket ─────────────────────────────────────────────────────────────
    WebSocketConnect,
    WebSocketAccept,
    WebSocketClose { code: u16 },
}

impl Message {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::HttpRequest { .. }            => "http.request",
            Self::HttpDisconnect                => "http.disconnect",
            Self::ResponseStart { .. }          => "http.response.start",
            Self::ResponseBody { .. }           => "http.response.body",
            Self::LifespanStartup               => "lifespan.startup",
            Self::LifespanStartupComplete       => "lifespan.startup.complete",
            Self::LifespanStartupFailed { .. }  => "lifespan.startup.failed",
            Self::LifespanShutdown              => "lifespan.shutdown",
            Self::LifespanShutdownComplete      => "lifespan.shutdown.complete",
            Self::LifespanShutdownFailed { .. } => "lifespan.shutdown.failed",
            Self::WebSocketConnect              => "websocket.connect",
            Self::WebSocketAccept               => "websocket.accept",
            Self::WebSocketClose { .. }         => "websocket.close",
        }
    }

    /// Shorthand for a response start with string headers.
    pub fn start(status: u16, headers: &[(&str, &str)]) -> Self {
        Self::ResponseStart {
            status,
            headers: headers
                .iter()
                .map(|(k, v)| (Bytes::copy_from_slice(k.as_bytes()), Bytes::copy_from_slice(v.as_bytes())))
                .collect(),
        }
    }

    /// Shorthand for a response body chunk.
    pub fn body(chunk: impl Into<Bytes>, more: bool) -> Self {
        Self::ResponseBody { chunk: chunk.into(), more }
    }
}
