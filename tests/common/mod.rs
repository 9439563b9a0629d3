//! Shared helpers: an outbound message recorder and request drivers.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use bytes::{Bytes, BytesMut};
use strata::{Application, Error, Message, Method, Receiver, Scope, Sender};

/// Records every message sent through [`Recorder::sender`].
#[derive(Clone, Default)]
pub struct Recorder {
    messages: Arc<Mutex<Vec<Message>>>,
}

impl Recorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sender(&self) -> Sender {
        let messages = Arc::clone(&self.messages);
        Sender::from_fn(move |message| {
            messages.lock().unwrap().push(message);
            async { Ok(()) }
        })
    }

    pub fn messages(&self) -> Vec<Message> {
        self.messages.lock().unwrap().clone()
    }

    pub fn kinds(&self) -> Vec<&'static str> {
        self.messages.lock().unwrap().iter().map(Message::kind).collect()
    }

    pub fn status(&self) -> Option<u16> {
        self.messages.lock().unwrap().iter().find_map(|m| match m {
            Message::ResponseStart { status, .. } => Some(*status),
            _ => None,
        })
    }

    pub fn header(&self, name: &str) -> Option<String> {
        self.messages.lock().unwrap().iter().find_map(|m| match m {
            Message::ResponseStart { headers, .. } => headers
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(name.as_bytes()))
                .map(|(_, v)| String::from_utf8_lossy(v).into_owned()),
            _ => None,
        })
    }

    pub fn body(&self) -> Bytes {
        let mut body = BytesMut::new();
        for message in self.messages.lock().unwrap().iter() {
            if let Message::ResponseBody { chunk, .. } = message {
                body.extend_from_slice(chunk);
            }
        }
        body.freeze()
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body()).into_owned()
    }
}

/// One complete exchange: what the app returned and what it sent.
pub struct Exchange {
    pub result: Result<(), Error>,
    pub sent: Recorder,
}

/// Calls `app` with an empty `method` request for `target`.
pub async fn request(app: &(impl Application + ?Sized), method: Method, target: &str) -> Exchange {
    call(app, Scope::http(method, target), Receiver::empty()).await
}

pub async fn get(app: &(impl Application + ?Sized), target: &str) -> Exchange {
    request(app, Method::GET, target).await
}

pub async fn call(app: &(impl Application + ?Sized), scope: Scope, receive: Receiver) -> Exchange {
    let sent = Recorder::new();
    let result = app.call(scope, receive, sent.sender()).await;
    Exchange { result, sent }
}
