use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use indoc::indoc;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::task::JoinHandle;

use super::HttpConnection;
use crate::channel::{ByteCounter, FunctionChannel, StreamSinkChannel, StreamSourceChannel, Utf8Checker};
use crate::exchange::HttpServerExchange;
use crate::handler::{FalsePredicate, HttpContinueHandler, HttpHandler, handler_fn};
use crate::options::{ALWAYS_SET_DATE, BUFFER_PIPELINED_DATA, IDLE_TIMEOUT, MAX_ENTITY_SIZE, MAX_HEADER_SIZE, OptionMap};
use crate::protocol::{HttpError, ParseError};

const HELLO_RESPONSE: &str = "HTTP/1.1 200 OK\r\ncontent-length: 12\r\n\r\nHello World!";

fn serve<H: HttpHandler + 'static>(handler: H, options: OptionMap) -> (DuplexStream, JoinHandle<Result<(), HttpError>>) {
    let (client, server) = tokio::io::duplex(64 * 1024);
    let (reader, writer) = tokio::io::split(server);
    let options = OptionMap::builder().set(&ALWAYS_SET_DATE, false).set_all(&options).build();
    let connection = HttpConnection::with_options(reader, writer, options);
    (client, tokio::spawn(connection.process(Arc::new(handler))))
}

async fn read_until_closed(client: &mut DuplexStream) -> String {
    let mut buf = Vec::new();
    tokio::time::timeout(Duration::from_secs(5), client.read_to_end(&mut buf)).await.unwrap().unwrap();
    String::from_utf8(buf).unwrap()
}

async fn read_exactly(client: &mut DuplexStream, len: usize) -> String {
    let mut buf = vec![0; len];
    tokio::time::timeout(Duration::from_secs(5), client.read_exact(&mut buf)).await.unwrap().unwrap();
    String::from_utf8(buf).unwrap()
}

fn hello() -> impl HttpHandler {
    handler_fn(|exchange| Box::pin(async move { exchange.send("Hello World!").await }))
}

fn echo() -> impl HttpHandler {
    handler_fn(|exchange| {
        Box::pin(async move {
            let mut body = Vec::new();
            exchange.request_channel()?.read_to_end(&mut body).await?;
            exchange.send(body).await
        })
    })
}

/// Answers with the request path after sleeping the number of milliseconds it names.
fn delayed_path() -> impl HttpHandler {
    handler_fn(|exchange| {
        Box::pin(async move {
            let millis: u64 = exchange.path().trim_start_matches('/').parse().unwrap_or(0);
            tokio::time::sleep(Duration::from_millis(millis)).await;
            let path = exchange.path().to_owned();
            exchange.send(path).await
        })
    })
}

#[tokio::test]
async fn ten_gets_on_one_keep_alive_connection() {
    let (mut client, task) = serve(hello(), OptionMap::empty());

    client.write_all("GET / HTTP/1.1\r\nHost: localhost\r\n\r\n".repeat(10).as_bytes()).await.unwrap();
    let responses = read_exactly(&mut client, HELLO_RESPONSE.len() * 10).await;
    assert_eq!(responses, HELLO_RESPONSE.repeat(10));

    // still open: one more request is answered
    client.write_all(b"GET / HTTP/1.1\r\n\r\n").await.unwrap();
    assert_eq!(read_exactly(&mut client, HELLO_RESPONSE.len()).await, HELLO_RESPONSE);

    client.shutdown().await.unwrap();
    assert_eq!(read_until_closed(&mut client).await, "");
    task.await.unwrap().unwrap();
}

#[tokio::test]
async fn pipelined_responses_keep_request_order() {
    let options = OptionMap::builder().set(&BUFFER_PIPELINED_DATA, true).build();
    let (mut client, task) = serve(delayed_path(), options);

    client.write_all(b"GET /60 HTTP/1.1\r\n\r\nGET /0 HTTP/1.1\r\n\r\nGET /20 HTTP/1.1\r\n\r\n").await.unwrap();
    client.shutdown().await.unwrap();

    let responses = read_until_closed(&mut client).await;
    let bodies: Vec<&str> = responses.split("\r\n\r\n").skip(1).map(|rest| &rest[..rest.find("HTTP/1.1").unwrap_or(rest.len())]).collect();
    assert_eq!(bodies, ["/60", "/0", "/20"]);
    task.await.unwrap().unwrap();
}

#[tokio::test]
async fn accepted_continue_precedes_final_response() {
    let (mut client, task) = serve(HttpContinueHandler::new(echo()), OptionMap::empty());

    client.write_all(b"POST /upload HTTP/1.1\r\nExpect: 100-continue\r\nContent-Length: 5\r\n\r\n").await.unwrap();
    assert_eq!(read_exactly(&mut client, 25).await, "HTTP/1.1 100 Continue\r\n\r\n");

    client.write_all(b"hello").await.unwrap();
    client.shutdown().await.unwrap();
    assert_eq!(read_until_closed(&mut client).await, "HTTP/1.1 200 OK\r\ncontent-length: 5\r\n\r\nhello");
    task.await.unwrap().unwrap();
}

#[tokio::test]
async fn continue_is_sent_on_first_body_read() {
    let (mut client, task) = serve(echo(), OptionMap::empty());

    client.write_all(b"PUT /data HTTP/1.1\r\nExpect: 100-continue\r\nContent-Length: 2\r\n\r\n").await.unwrap();
    assert_eq!(read_exactly(&mut client, 25).await, "HTTP/1.1 100 Continue\r\n\r\n");

    client.write_all(b"ok").await.unwrap();
    client.shutdown().await.unwrap();
    assert!(read_until_closed(&mut client).await.ends_with("\r\n\r\nok"));
    task.await.unwrap().unwrap();
}

#[tokio::test]
async fn rejected_continue_never_delivers_the_body() {
    let reached = Arc::new(AtomicBool::new(false));
    let next = {
        let reached = Arc::clone(&reached);
        handler_fn(move |exchange| {
            let reached = Arc::clone(&reached);
            Box::pin(async move {
                reached.store(true, Ordering::SeqCst);
                exchange.send("unexpected").await
            })
        })
    };
    let root = crate::handler::PredicateHandler::new(
        crate::handler::fn_predicate(|exchange| exchange.path() == "/upload"),
        HttpContinueHandler::with_predicate(FalsePredicate, next),
        hello(),
    );
    let (mut client, task) = serve(root, OptionMap::empty());

    // the client sends the body anyway, followed by the next request
    client
        .write_all(b"POST /upload HTTP/1.1\r\nExpect: 100-continue\r\nContent-Length: 5\r\n\r\nhelloGET /next HTTP/1.1\r\n\r\n")
        .await
        .unwrap();
    client.shutdown().await.unwrap();

    let responses = read_until_closed(&mut client).await;
    assert_eq!(responses, format!("HTTP/1.1 417 Expectation Failed\r\ncontent-length: 0\r\n\r\n{HELLO_RESPONSE}"));
    assert!(!reached.load(Ordering::SeqCst));
    task.await.unwrap().unwrap();
}

#[tokio::test]
async fn body_exactly_at_the_limit() {
    let options = OptionMap::builder().set(&MAX_ENTITY_SIZE, 10).build();
    let (mut client, task) = serve(echo(), options);

    client.write_all(b"POST / HTTP/1.1\r\nContent-Length: 10\r\n\r\n0123456789").await.unwrap();
    client.shutdown().await.unwrap();

    assert_eq!(read_until_closed(&mut client).await, "HTTP/1.1 200 OK\r\ncontent-length: 10\r\n\r\n0123456789");
    task.await.unwrap().unwrap();
}

#[tokio::test]
async fn declared_body_over_the_limit() {
    let reached = Arc::new(AtomicBool::new(false));
    let handler = {
        let reached = Arc::clone(&reached);
        handler_fn(move |_exchange| {
            reached.store(true, Ordering::SeqCst);
            Box::pin(async { Ok::<(), HttpError>(()) })
        })
    };
    let options = OptionMap::builder().set(&MAX_ENTITY_SIZE, 10).build();
    let (mut client, task) = serve(handler, options);

    client.write_all(b"POST / HTTP/1.1\r\nContent-Length: 11\r\n\r\n01234567890").await.unwrap();

    let response = read_until_closed(&mut client).await;
    assert!(response.starts_with("HTTP/1.1 413 Payload Too Large\r\n"));
    assert!(response.contains("connection: close\r\n"));
    assert!(!reached.load(Ordering::SeqCst));
    assert!(matches!(task.await.unwrap(), Err(HttpError::RequestError { source: ParseError::TooLargeEntity { max_size: 10 } })));
}

#[tokio::test]
async fn chunked_body_crossing_the_limit() {
    let options = OptionMap::builder().set(&MAX_ENTITY_SIZE, 10).build();
    let (mut client, task) = serve(echo(), options);

    client.write_all(b"POST / HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n5\r\nhello\r\n6\r\n world\r\n0\r\n\r\n").await.unwrap();

    let response = read_until_closed(&mut client).await;
    assert!(response.starts_with("HTTP/1.1 413 Payload Too Large\r\n"));
    assert!(response.contains("connection: close\r\n"));
    assert!(task.await.unwrap().is_err());
}

#[tokio::test]
async fn oversized_head() {
    let options = OptionMap::builder().set(&MAX_HEADER_SIZE, 64).build();
    let (mut client, task) = serve(hello(), options);

    let request = format!("GET / HTTP/1.1\r\nX-Padding: {}\r\n\r\n", "a".repeat(128));
    client.write_all(request.as_bytes()).await.unwrap();

    let response = read_until_closed(&mut client).await;
    assert!(response.starts_with("HTTP/1.1 431 Request Header Fields Too Large\r\n"));
    assert!(task.await.unwrap().is_err());
}

#[tokio::test]
async fn malformed_head() {
    let (mut client, task) = serve(hello(), OptionMap::empty());

    client.write_all(b"GET / HTTP/1.1\r\nBad Header\r\n\r\n").await.unwrap();

    let response = read_until_closed(&mut client).await;
    assert!(response.starts_with("HTTP/1.1 400 Bad Request\r\n"));
    assert!(response.contains("connection: close\r\n"));
    assert!(task.await.unwrap().is_err());
}

#[tokio::test]
async fn http_10_closes_unless_asked_to_keep_alive() {
    let (mut client, task) = serve(hello(), OptionMap::empty());
    client.write_all(b"GET / HTTP/1.0\r\n\r\nGET / HTTP/1.0\r\n\r\n").await.unwrap();

    let response = read_until_closed(&mut client).await;
    assert_eq!(response, "HTTP/1.1 200 OK\r\ncontent-length: 12\r\nconnection: close\r\n\r\nHello World!");
    task.await.unwrap().unwrap();

    let (mut client, task) = serve(hello(), OptionMap::empty());
    client.write_all(b"GET / HTTP/1.0\r\nConnection: keep-alive\r\n\r\n").await.unwrap();

    let response = read_exactly(&mut client, HELLO_RESPONSE.len() + "connection: keep-alive\r\n".len()).await;
    assert!(response.contains("connection: keep-alive\r\n"));
    client.shutdown().await.unwrap();
    assert_eq!(read_until_closed(&mut client).await, "");
    task.await.unwrap().unwrap();
}

#[tokio::test]
async fn connection_close_from_either_side() {
    let (mut client, task) = serve(hello(), OptionMap::empty());
    client.write_all(b"GET / HTTP/1.1\r\nConnection: close\r\n\r\nGET / HTTP/1.1\r\n\r\n").await.unwrap();
    assert_eq!(read_until_closed(&mut client).await.matches("Hello World!").count(), 1);
    task.await.unwrap().unwrap();

    let closing = handler_fn(|exchange| {
        Box::pin(async move {
            exchange.set_persistent(false);
            exchange.send("bye").await
        })
    });
    let (mut client, task) = serve(closing, OptionMap::empty());
    client.write_all(b"GET / HTTP/1.1\r\n\r\nGET / HTTP/1.1\r\n\r\n").await.unwrap();
    assert_eq!(read_until_closed(&mut client).await, "HTTP/1.1 200 OK\r\ncontent-length: 3\r\nconnection: close\r\n\r\nbye");
    task.await.unwrap().unwrap();
}

#[tokio::test]
async fn head_response_carries_no_body() {
    let (mut client, task) = serve(hello(), OptionMap::empty());
    client.write_all(indoc! {b"
        HEAD / HTTP/1.1

        GET / HTTP/1.1

    "}).await.unwrap();
    client.shutdown().await.unwrap();

    let responses = read_until_closed(&mut client).await;
    assert_eq!(responses, format!("HTTP/1.1 200 OK\r\ncontent-length: 12\r\n\r\n{HELLO_RESPONSE}"));
    task.await.unwrap().unwrap();
}

#[tokio::test]
async fn handler_failure_keeps_the_connection() {
    let failing = handler_fn(|exchange| {
        Box::pin(async move {
            if exchange.path() == "/fail" {
                return Err(HttpError::handler("no such thing"));
            }
            exchange.send("Hello World!").await
        })
    });
    let (mut client, task) = serve(failing, OptionMap::empty());

    client.write_all(b"GET /fail HTTP/1.1\r\n\r\nGET / HTTP/1.1\r\n\r\n").await.unwrap();
    client.shutdown().await.unwrap();

    let responses = read_until_closed(&mut client).await;
    assert_eq!(responses, format!("HTTP/1.1 500 Internal Server Error\r\ncontent-length: 0\r\n\r\n{HELLO_RESPONSE}"));
    task.await.unwrap().unwrap();
}

#[tokio::test]
async fn untouched_response_is_sent_empty() {
    let (mut client, task) = serve(crate::handler::ResponseCodeHandler::NOT_FOUND, OptionMap::empty());
    client.write_all(b"GET /missing HTTP/1.1\r\n\r\n").await.unwrap();
    client.shutdown().await.unwrap();

    assert_eq!(read_until_closed(&mut client).await, "HTTP/1.1 404 Not Found\r\ncontent-length: 0\r\n\r\n");
    task.await.unwrap().unwrap();
}

#[tokio::test]
async fn streamed_response_is_chunked() {
    let streaming = handler_fn(|exchange| {
        Box::pin(async move {
            let mut channel = exchange.response_channel()?;
            channel.write_all(b"hello ").await?;
            channel.flush().await?;
            channel.write_all(b"world").await?;
            channel.shutdown().await?;
            Ok::<(), HttpError>(())
        })
    });
    let (mut client, task) = serve(streaming, OptionMap::empty());
    client.write_all(b"GET / HTTP/1.1\r\n\r\n").await.unwrap();
    client.shutdown().await.unwrap();

    assert_eq!(
        read_until_closed(&mut client).await,
        "HTTP/1.1 200 OK\r\ntransfer-encoding: chunked\r\n\r\n6\r\nhello \r\n5\r\nworld\r\n0\r\n\r\n"
    );
    task.await.unwrap().unwrap();
}

#[tokio::test]
async fn date_header_by_default() {
    let (client, server) = tokio::io::duplex(4096);
    let (reader, writer) = tokio::io::split(server);
    let task = tokio::spawn(HttpConnection::new(reader, writer).process(Arc::new(hello())));
    let mut client = client;

    client.write_all(b"GET / HTTP/1.1\r\n\r\n").await.unwrap();
    client.shutdown().await.unwrap();

    let response = read_until_closed(&mut client).await;
    assert!(response.contains("\r\ndate: "));
    task.await.unwrap().unwrap();
}

#[tokio::test(start_paused = true)]
async fn idle_connection_is_closed() {
    let options = OptionMap::builder().set(&IDLE_TIMEOUT, 100).build();
    let (mut client, task) = serve(hello(), options);

    client.write_all(b"GET / HTTP/1.1\r\n\r\n").await.unwrap();
    assert_eq!(read_exactly(&mut client, HELLO_RESPONSE.len()).await, HELLO_RESPONSE);

    // nothing more is sent: the server gives up on its own
    assert_eq!(read_until_closed(&mut client).await, "");
    task.await.unwrap().unwrap();
}

#[tokio::test(start_paused = true)]
async fn idle_timeout_fails_a_pending_body() {
    let options = OptionMap::builder().set(&IDLE_TIMEOUT, 100).build();
    let (mut client, task) = serve(echo(), options);

    client.write_all(b"POST / HTTP/1.1\r\nContent-Length: 10\r\n\r\nabc").await.unwrap();

    let response = read_until_closed(&mut client).await;
    assert!(response.starts_with("HTTP/1.1 408 Request Timeout\r\n"));
    assert!(matches!(task.await.unwrap(), Err(HttpError::RequestError { source: ParseError::Timeout(_) })));
}

#[tokio::test]
async fn two_bodyless_requests_share_the_connection() {
    let (mut client, task) = serve(delayed_path(), OptionMap::empty());

    client.write_all(b"GET /a HTTP/1.1\r\nHost: localhost\r\n\r\nGET /b HTTP/1.1\r\nHost: localhost\r\n\r\n").await.unwrap();
    client.shutdown().await.unwrap();

    let responses = read_until_closed(&mut client).await;
    assert_eq!(responses, "HTTP/1.1 200 OK\r\ncontent-length: 2\r\n\r\n/aHTTP/1.1 200 OK\r\ncontent-length: 2\r\n\r\n/b");
    task.await.unwrap().unwrap();
}

#[tokio::test]
async fn body_channels_run_channel_functions() {
    let read = ByteCounter::new();
    let written = ByteCounter::new();
    let (read_count, written_count) = (read.count(), written.count());
    let handler = handler_fn(move |exchange| {
        let (read, written) = (read.clone(), written.clone());
        exchange.add_request_wrapper(move |channel: StreamSourceChannel, _: &mut HttpServerExchange| -> StreamSourceChannel {
            Box::new(FunctionChannel::new(channel).with_function(Utf8Checker::new()).with_function(read.clone()))
        });
        exchange.add_response_wrapper(move |channel: StreamSinkChannel, _: &mut HttpServerExchange| -> StreamSinkChannel {
            Box::new(FunctionChannel::new(channel).with_function(written.clone()))
        });
        Box::pin(async move {
            let mut body = String::new();
            exchange.request_channel()?.read_to_string(&mut body).await?;
            exchange.send(body.to_uppercase()).await
        })
    });
    let (mut client, task) = serve(handler, OptionMap::empty());

    client.write_all(b"POST /shout HTTP/1.1\r\nContent-Length: 11\r\n\r\nhello world").await.unwrap();
    client.shutdown().await.unwrap();

    let response = read_until_closed(&mut client).await;
    assert!(response.starts_with("HTTP/1.1 200 OK\r\n"), "{response}");
    assert!(response.contains("HELLO WORLD"), "{response}");
    task.await.unwrap().unwrap();

    assert_eq!(read_count.get(), 11);
    assert_eq!(written_count.get(), 11);
}

#[tokio::test]
async fn invalid_utf8_fails_the_request_read() {
    let handler = handler_fn(|exchange| {
        exchange.add_request_wrapper(|channel: StreamSourceChannel, _: &mut HttpServerExchange| -> StreamSourceChannel {
            Box::new(FunctionChannel::new(channel).with_function(Utf8Checker::new()))
        });
        Box::pin(async move {
            let mut body = Vec::new();
            match exchange.request_channel()?.read_to_end(&mut body).await {
                Ok(_) => exchange.send("valid").await,
                Err(_) => exchange.send("invalid").await,
            }
        })
    });
    let (mut client, task) = serve(handler, OptionMap::empty());

    client.write_all(b"POST / HTTP/1.1\r\nContent-Length: 2\r\n\r\n\xff\xfe").await.unwrap();
    client.shutdown().await.unwrap();

    assert!(read_until_closed(&mut client).await.ends_with("\r\n\r\ninvalid"));
    task.await.unwrap().unwrap();
}
