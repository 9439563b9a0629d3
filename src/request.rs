//! Incoming HTTP request type.

use bytes::{Bytes, BytesMut};
use http::Method;

use crate::error::Error;
use crate::message::{Headers, Message};
use crate::protocol::Receiver;
use crate::scope::Scope;

/// A request view over a scope and its inbound channel.
///
/// The receiver is the connection's own channel, not a copy: reading the body
/// here consumes it for every layer further in.
pub struct Request {
    scope: Scope,
    receive: Receiver,
}

impl Request {
    pub fn new(scope: Scope, receive: Receiver) -> Self {
        Self { scope, receive }
    }

    pub fn scope(&self) -> &Scope { &self.scope }
    pub fn receiver(&self) -> &Receiver { &self.receive }
    pub fn method(&self) -> &Method { self.scope.method() }
    pub fn path(&self) -> &str { self.scope.path() }
    pub fn root_path(&self) -> &str { self.scope.root_path() }
    pub fn query(&self) -> &str { self.scope.query() }
    pub fn headers(&self) -> &Headers { self.scope.headers() }

    /// Case-insensitive header lookup. Non-UTF-8 values read as `None`.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers()
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name.as_bytes()))
            .and_then(|(_, v)| std::str::from_utf8(v).ok())
    }

    /// Returns a named path parameter.
    ///
    /// For a route `/users/{id}`, `req.param("id")` on `/users/42` returns `Some("42")`.
    pub fn param(&self, key: &str) -> Option<&str> {
        self.scope.params().get(key).map(String::as_str)
    }

    /// Shared application state of type `T`, if the request entered through
    /// an [`App`](crate::App) holding one.
    pub fn state<T: Send + Sync + 'static>(&self) -> Option<&T> {
        self.scope.app()?.state::<T>()
    }

    /// Reads the whole request body.
    pub async fn body(&self) -> Result<Bytes, Error> {
        let mut body = BytesMut::new();
        loop {
            match self.receive.recv().await? {
                Message::HttpRequest { body: chunk, more } => {
                    body.extend_from_slice(&chunk);
                    if !more {
                        return Ok(body.freeze());
                    }
                }
                Message::HttpDisconnect => return Err(Error::Disconnected),
                other => return Err(Error::unexpected("http.request", &other)),
            }
        }
    }

    pub fn into_parts(self) -> (Scope, Receiver) {
        (self.scope, self.receive)
    }
}
