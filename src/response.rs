//! Outgoing HTTP response type and the [`IntoResponse`] conversion trait.
//!
//! A [`Response`] is a value; it only becomes protocol messages when
//! [`Response::send_to`] replays it onto a [`Sender`]. That is what lets a
//! middleware hold, inspect and rewrite a response produced further in.

use std::fmt;

use bytes::{Bytes, BytesMut};
use futures_util::stream::{BoxStream, StreamExt, TryStreamExt};
use http::StatusCode;
use http_body_util::{BodyExt, Full, StreamBody, combinators::UnsyncBoxBody};
use hyper::body::Frame;
use tracing::warn;

use crate::error::Error;
use crate::message::{Headers, Message};
use crate::protocol::Sender;

// ── ContentType ───────────────────────────────────────────────────────────────

/// Common content-type values for use with [`ResponseBuilder::bytes`].
pub enum ContentType {
    EventStream,  // text/event-stream  (SSE)
    Html,         // text/html; charset=utf-8
    Json,         // application/json
    OctetStream,  // application/octet-stream
    Text,         // text/plain; charset=utf-8
}

impl ContentType {
    fn as_str(&self) -> &'static str {
        match self {
            Self::EventStream => "text/event-stream",
            Self::Html        => "text/html; charset=utf-8",
            Self::Json        => "application/json",
            Self::OctetStream => "application/octet-stream",
            Self::Text        => "text/plain; charset=utf-8",
        }
    }
}

// ── Body ──────────────────────────────────────────────────────────────────────

/// A lazily produced sequence of body chunks.
pub type BodyStream = BoxStream<'static, Result<Bytes, Error>>;

/// A response body: either already in memory, or pulled chunk by chunk.
pub enum Body {
    Full(Bytes),
    Stream(BodyStream),
}

impl Body {
    /// Drains the body into one buffer.
    ///
    /// For a streamed body this is where errors raised after the response
    /// started come out.
    pub async fn collect(self) -> Result<Bytes, Error> {
        match self {
            Self::Full(bytes) => Ok(bytes),
            Self::Stream(mut stream) => {
                let mut buf = BytesMut::new();
                while let Some(chunk) = stream.next().await {
                    buf.extend_from_slice(&chunk?);
                }
                Ok(buf.freeze())
            }
        }
    }
}

impl fmt::Debug for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Full(bytes) => f.debug_tuple("Full").field(bytes).finish(),
            Self::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

// ── Response ─────────────────────────────────────────────────────────────────

/// An outgoing HTTP response.
///
/// ```rust
/// use strata::{ContentType, Response};
/// use http::StatusCode;
///
/// Response::text("hello");
/// Response::status(StatusCode::NO_CONTENT);
///
/// Response::builder()
///     .status(StatusCode::CREATED)
///     .header("location", "/users/42")
///     .json(br#"{"id":42}"#.to_vec());
///
/// Response::builder().bytes(ContentType::Html, b"<p>ok</p>".to_vec());
/// ```
pub struct Response {
    status: u16,
    headers: Headers,
    body: Body,
}

impl fmt::Debug for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Response")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .field("body", &self.body)
            .finish()
    }
}

impl Response {
    /// `200 OK` — `application/json`.
    pub fn json(body: Vec<u8>) -> Self {
        Self::builder().json(body)
    }

    /// `200 OK` — `text/plain; charset=utf-8`.
    pub fn text(body: impl Into<String>) -> Self {
        Self::builder().text(body)
    }

    /// Response with no body.
    pub fn status(code: StatusCode) -> Self {
        Self::builder().status(code).no_body()
    }

    /// Builder for responses that need a custom status or extra headers.
    pub fn builder() -> ResponseBuilder {
        ResponseBuilder { headers: Vec::new(), status: StatusCode::OK }
    }

    /// A response whose headers are taken verbatim and whose body is pulled
    /// from `body` as it is sent.
    pub fn streaming(status: u16, headers: Headers, body: BodyStream) -> Self {
        Self { status, headers, body: Body::Stream(body) }
    }

    pub fn status_code(&self) -> u16 { self.status }
    pub fn headers(&self) -> &Headers { &self.headers }
    pub fn headers_mut(&mut self) -> &mut Headers { &mut self.headers }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&[u8]> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name.as_bytes()))
            .map(|(_, v)| v.as_ref())
    }

    /// Appends a header, keeping any existing ones with the same name.
    pub fn append_header(&mut self, name: &str, value: &str) {
        self.headers.push((
            Bytes::copy_from_slice(name.as_bytes()),
            Bytes::copy_from_slice(value.as_bytes()),
        ));
    }

    pub fn into_body(self) -> Body { self.body }

    pub fn into_parts(self) -> (u16, Headers, Body) {
        (self.status, self.headers, self.body)
    }

    pub(crate) fn from_parts(status: u16, headers: Headers, body: Body) -> Self {
        Self { status, headers, body }
    }

    /// Replays the response as protocol messages.
    ///
    /// One `http.response.start`, then for a full body a single final chunk;
    /// for a stream, one chunk per item with `more` set, closed by an empty
    /// final chunk. An error pulled from the stream stops sending and is
    /// returned.
    pub async fn send_to(self, send: &Sender) -> Result<(), Error> {
        send.send(Message::ResponseStart { status: self.status, headers: self.headers }).await?;
        match self.body {
            Body::Full(chunk) => send.send(Message::ResponseBody { chunk, more: false }).await,
            Body::Stream(mut stream) => {
                while let Some(chunk) = stream.next().await {
                    send.send(Message::ResponseBody { chunk: chunk?, more: true }).await?;
                }
                send.send(Message::ResponseBody { chunk: Bytes::new(), more: false }).await
            }
        }
    }

    /// Converts into a hyper response for the server.
    ///
    /// Headers that are not valid HTTP are dropped with a warning; an
    /// out-of-range status becomes 500.
    pub(crate) fn into_hyper(self) -> http::Response<UnsyncBoxBody<Bytes, Error>> {
        let body = match self.body {
            Body::Full(bytes) => Full::new(bytes)
                .map_err(|never: std::convert::Infallible| -> Error { match never {} })
                .boxed_unsync(),
            Body::Stream(stream) => StreamBody::new(stream.map_ok(Frame::data)).boxed_unsync(),
        };

        let mut response = http::Response::new(body);
        *response.status_mut() =
            StatusCode::from_u16(self.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        let headers = response.headers_mut();
        for (name, value) in self.headers {
            match (
                http::HeaderName::from_bytes(&name),
                http::HeaderValue::from_maybe_shared(value),
            ) {
                (Ok(name), Ok(value)) => {
                    headers.append(name, value);
                }
                _ => warn!(name = ?name, "dropping invalid response header"),
            }
        }
        response
    }
}

// ── ResponseBuilder ───────────────────────────────────────────────────────────

/// Fluent builder for [`Response`].
///
/// Obtain via [`Response::builder()`]. Defaults to `200 OK`.
/// Terminated by a typed body method — you always know what you're sending.
pub struct ResponseBuilder {
    headers: Headers,
    status: StatusCode,
}

impl ResponseBuilder {
    pub fn status(mut self, code: StatusCode) -> Self {
        self.status = code;
        self
    }

    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((
            Bytes::copy_from_slice(name.as_bytes()),
            Bytes::copy_from_slice(value.as_bytes()),
        ));
        self
    }

    pub(crate) fn headers(mut self, headers: &Headers) -> Self {
        self.headers.extend(headers.iter().cloned());
        self
    }

    /// Terminate with a JSON body (`application/json`).
    pub fn json(self, body: Vec<u8>) -> Response {
        self.finish(ContentType::Json.as_str(), Bytes::from(body))
    }

    /// Terminate with a plain-text body (`text/plain; charset=utf-8`).
    pub fn text(self, body: impl Into<String>) -> Response {
        self.finish(ContentType::Text.as_str(), Bytes::from(body.into()))
    }

    /// Terminate with a typed body.
    pub fn bytes(self, content_type: ContentType, body: Vec<u8>) -> Response {
        self.finish(content_type.as_str(), Bytes::from(body))
    }

    /// Terminate with a streamed body. No `content-length` is set.
    pub fn stream(self, content_type: ContentType, body: BodyStream) -> Response {
        let mut headers = vec![content_type_header(content_type.as_str())];
        headers.extend(self.headers);
        Response::streaming(self.status.as_u16(), headers, body)
    }

    /// Terminate with no body (e.g. `204 No Content`, `301 Moved Permanently`).
    pub fn no_body(self) -> Response {
        let mut headers = self.headers;
        headers.push((Bytes::from_static(b"content-length"), Bytes::from_static(b"0")));
        Response { status: self.status.as_u16(), headers, body: Body::Full(Bytes::new()) }
    }

    fn finish(self, content_type: &str, body: Bytes) -> Response {
        let mut headers = vec![
            content_type_header(content_type),
            (Bytes::from_static(b"content-length"), Bytes::from(body.len().to_string())),
        ];
        headers.extend(self.headers);
        Response { status: self.status.as_u16(), headers, body: Body::Full(body) }
    }
}

fn content_type_header(value: &str) -> (Bytes, Bytes) {
    (Bytes::from_static(b"content-type"), Bytes::copy_from_slice(value.as_bytes()))
}

// ── IntoResponse ──────────────────────────────────────────────────────────────

/// Conversion into an HTTP [`Response`].
///
/// Implement on your own types to return them directly from handlers.
pub trait IntoResponse {
    fn into_response(self) -> Response;
}

impl IntoResponse for Response {
    fn into_response(self) -> Response { self }
}

impl IntoResponse for &'static str {
    fn into_response(self) -> Response { Response::text(self) }
}

impl IntoResponse for String {
    fn into_response(self) -> Response { Response::text(self) }
}

/// Return a [`StatusCode`] directly from a handler: `return StatusCode::NOT_FOUND`
impl IntoResponse for StatusCode {
    fn into_response(self) -> Response { Response::status(self) }
}

#[cfg(test)]
mod tests {
    use futures_util::stream;

    use super::*;

    #[test]
    fn debug_shows_status_headers_and_body_kind() {
        let full = format!("{:?}", Response::text("hi"));
        assert!(full.starts_with("Response { status: 200"), "{full}");
        assert!(full.contains("content-type"), "{full}");
        assert!(full.contains("Full(b\"hi\")"), "{full}");

        let streamed = Response::streaming(404, Vec::new(), stream::empty().boxed());
        assert_eq!(
            format!("{streamed:?}"),
            "Response { status: 404, headers: [], body: Stream(..) }"
        );
    }
}
