use conduit_http::handler::{HttpContinueHandler, PredicateHandler, ResponseCodeHandler, handler_fn};
use conduit_http::options::{IDLE_TIMEOUT, MAX_ENTITY_SIZE, OptionMap};
use conduit_web::predicate::{all_predicate, get_method, path, post_method};
use conduit_web::{EncodingHandler, RequestLimitHandler, Server};
use tokio::io::AsyncReadExt;
use tracing::info;

#[tokio::main]
async fn main() {
    let hello = handler_fn(|exchange| Box::pin(async move { exchange.send_text("hello world").await }));

    let echo = handler_fn(|exchange| {
        Box::pin(async move {
            let mut body = Vec::new();
            exchange.request_channel()?.read_to_end(&mut body).await?;
            info!(size = body.len(), "receiving request body");
            exchange.send(body).await
        })
    });

    let mut is_echo = all_predicate();
    is_echo.and(post_method()).and(path("/echo"));
    let mut is_hello = all_predicate();
    is_hello.and(get_method()).and(path("/"));

    let routes = PredicateHandler::new(
        is_echo,
        HttpContinueHandler::new(echo),
        PredicateHandler::new(is_hello, hello, ResponseCodeHandler::NOT_FOUND),
    );
    let root = match RequestLimitHandler::new(256, EncodingHandler::new(routes)) {
        Ok(root) => root,
        Err(e) => {
            eprintln!("{e}");
            return;
        }
    };

    let options = OptionMap::builder().set(&IDLE_TIMEOUT, 30_000).set(&MAX_ENTITY_SIZE, 1024 * 1024).build();

    let server = match Server::builder().address("127.0.0.1:3000").handler(root).options(options).build() {
        Ok(server) => server,
        Err(e) => {
            eprintln!("{e}");
            return;
        }
    };
    server.start().await;
}
