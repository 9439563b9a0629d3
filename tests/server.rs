use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use strata::middleware::Middleware;
use strata::{App, Error, Message, Next, Request, Response, Router, app_fn, hook, serve_on};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;

type Log = Arc<Mutex<Vec<&'static str>>>;

fn app(log: &Log) -> App {
    let router = Router::new()
        .get("/hello/{name}", |req: Request| async move {
            format!("hello {}", req.param("name").unwrap_or("?"))
        })
        .post("/echo", |req: Request| async move {
            let body = req.body().await?;
            Ok::<_, Error>(String::from_utf8_lossy(&body).into_owned())
        })
        .get("/boom", |_req: Request| async {
            Err::<Response, _>(Error::handler(std::io::Error::other("disk on fire")))
        })
        .mount("/stream", app_fn(|_, _, send| async move {
            send.send(Message::start(200, &[("content-type", "text/plain")])).await?;
            send.send(Message::body("first-", true)).await?;
            send.send(Message::body("second", false)).await
        }))
        .mount("/cut", app_fn(|_, _, send| async move {
            send.send(Message::start(200, &[("content-length", "20")])).await?;
            send.send(Message::body("partial", true)).await?;
            Err(Error::handler(std::io::Error::other("upstream went away")))
        }));

    let started = Arc::clone(log);
    let stopped = Arc::clone(log);
    App::builder()
        .router(router)
        .middleware(Middleware::http(|req: Request, next: Next| async move {
            let mut response: Response = next.run(req).await?;
            response.append_header("x-served-by", "strata");
            Ok(response)
        }))
        .on_startup(hook(move || {
            let log = Arc::clone(&started);
            async move {
                log.lock().unwrap().push("startup");
                Ok(())
            }
        }))
        .on_shutdown(hook(move || {
            let log = Arc::clone(&stopped);
            async move {
                log.lock().unwrap().push("shutdown");
                Ok(())
            }
        }))
        .build()
        .unwrap()
}

async fn exchange(addr: SocketAddr, raw: &str) -> String {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(raw.as_bytes()).await.unwrap();
    let mut buf = Vec::new();
    stream.read_to_end(&mut buf).await.unwrap();
    String::from_utf8_lossy(&buf).into_owned()
}

#[tokio::test]
async fn serves_real_connections_through_the_stack() {
    let log = Log::default();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let server = tokio::spawn(serve_on(listener, app(&log), async {
        let _ = stop_rx.await;
    }));

    let reply = exchange(addr, "GET /hello/ana HTTP/1.1\r\nhost: test\r\nconnection: close\r\n\r\n").await;
    assert!(reply.starts_with("HTTP/1.1 200 OK"), "{reply}");
    assert!(reply.contains("x-served-by: strata"), "{reply}");
    assert!(reply.ends_with("hello ana"), "{reply}");
    assert_eq!(*log.lock().unwrap(), ["startup"]);

    let reply = exchange(
        addr,
        "POST /echo HTTP/1.1\r\nhost: test\r\ncontent-length: 11\r\nconnection: close\r\n\r\nhello world",
    )
    .await;
    assert!(reply.starts_with("HTTP/1.1 200 OK"), "{reply}");
    assert!(reply.ends_with("hello world"), "{reply}");

    let reply = exchange(addr, "GET /stream HTTP/1.1\r\nhost: test\r\nconnection: close\r\n\r\n").await;
    assert!(reply.starts_with("HTTP/1.1 200 OK"), "{reply}");
    assert!(reply.contains("first-"), "{reply}");
    assert!(reply.contains("second"), "{reply}");

    let reply = exchange(addr, "GET /missing HTTP/1.1\r\nhost: test\r\nconnection: close\r\n\r\n").await;
    assert!(reply.starts_with("HTTP/1.1 404 Not Found"), "{reply}");
    assert!(reply.contains("x-served-by: strata"), "{reply}");

    // The outer boundary's 500 arrives whole; the error itself is only logged.
    let reply = exchange(addr, "GET /boom HTTP/1.1\r\nhost: test\r\nconnection: close\r\n\r\n").await;
    assert!(reply.starts_with("HTTP/1.1 500 Internal Server Error"), "{reply}");
    assert!(reply.ends_with("Internal Server Error"), "{reply}");
    assert!(!reply.contains("disk on fire"), "{reply}");

    // A body that fails midway stops short of its declared length and the
    // connection closes, instead of being framed as a complete reply.
    let reply = tokio::time::timeout(
        Duration::from_secs(5),
        exchange(addr, "GET /cut HTTP/1.1\r\nhost: test\r\nconnection: close\r\n\r\n"),
    )
    .await
    .expect("connection should close after a failed body");
    assert!(!reply.contains("Internal Server Error"), "{reply}");
    assert!(!reply.contains("transfer-encoding"), "{reply}");
    if let Some((head, body)) = reply.split_once("\r\n\r\n") {
        assert!(head.starts_with("HTTP/1.1 200 OK"), "{reply}");
        assert!(head.contains("content-length: 20"), "{reply}");
        assert!(body.len() < 20, "{reply}");
    }

    stop_tx.send(()).unwrap();
    server.await.unwrap().unwrap();
    assert_eq!(*log.lock().unwrap(), ["startup", "shutdown"]);
}
