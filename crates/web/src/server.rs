use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::Arc;

use conduit_http::connection::HttpConnection;
use conduit_http::handler::HttpHandler;
use conduit_http::options::OptionMap;
use thiserror::Error;
use tokio::net::TcpListener;
use tracing::{Level, error, info, trace, warn};
use tracing_subscriber::FmtSubscriber;

pub struct ServerBuilder {
    handler: Option<Arc<dyn HttpHandler>>,
    address: Option<Result<Vec<SocketAddr>, ServerBuildError>>,
    options: OptionMap,
}

impl ServerBuilder {
    fn new() -> Self {
        Self { handler: None, address: None, options: OptionMap::empty() }
    }

    pub fn address<A: ToSocketAddrs>(mut self, address: A) -> Self {
        let resolved = address.to_socket_addrs().map(Iterator::collect).map_err(|source| ServerBuildError::InvalidAddress { source });
        self.address = Some(resolved);
        self
    }

    /// The root of the handler chain every request is dispatched to.
    pub fn handler(mut self, handler: impl HttpHandler + 'static) -> Self {
        self.handler = Some(Arc::new(handler));
        self
    }

    /// Options handed to every connection.
    pub fn options(mut self, options: OptionMap) -> Self {
        self.options = options;
        self
    }

    pub fn build(self) -> Result<Server, ServerBuildError> {
        let handler = self.handler.ok_or(ServerBuildError::MissingHandler)?;
        let address = self.address.ok_or(ServerBuildError::MissingAddress)??;
        if address.is_empty() {
            return Err(ServerBuildError::MissingAddress);
        }
        Ok(Server { handler, address, options: self.options })
    }
}

impl std::fmt::Debug for ServerBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerBuilder").field("address", &self.address).field("options", &self.options).finish_non_exhaustive()
    }
}

pub struct Server {
    handler: Arc<dyn HttpHandler>,
    address: Vec<SocketAddr>,
    options: OptionMap,
}

#[derive(Error, Debug)]
pub enum ServerBuildError {
    #[error("handler must be set")]
    MissingHandler,
    #[error("address must be set")]
    MissingAddress,
    #[error("address can't be resolved: {source}")]
    InvalidAddress { source: std::io::Error },
}

impl Server {
    pub fn builder() -> ServerBuilder {
        ServerBuilder::new()
    }

    /// Installs a `fmt` subscriber at `INFO`, then serves until the process ends.
    pub async fn start(self) {
        let subscriber = FmtSubscriber::builder().with_max_level(Level::INFO).finish();
        if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
            warn!(cause = %e, "a global subscriber is already set, keeping it");
        }

        info!("start listening at {:?}", self.address);
        let tcp_listener = match TcpListener::bind(self.address.as_slice()).await {
            Ok(tcp_listener) => tcp_listener,
            Err(e) => {
                error!(cause = %e, "bind server error");
                return;
            }
        };
        self.serve(tcp_listener).await;
    }

    /// Accepts connections from `tcp_listener` and serves each on its own task.
    pub async fn serve(self, tcp_listener: TcpListener) {
        loop {
            let (tcp_stream, remote_addr) = match tcp_listener.accept().await {
                Ok(stream_and_addr) => stream_and_addr,
                Err(e) => {
                    warn!(cause = %e, "failed to accept");
                    continue;
                }
            };
            if let Err(e) = tcp_stream.set_nodelay(true) {
                trace!(cause = %e, "can't set TCP_NODELAY");
            }

            let handler = Arc::clone(&self.handler);
            let options = self.options.clone();

            tokio::spawn(async move {
                let (reader, writer) = tcp_stream.into_split();
                let connection = HttpConnection::with_options(reader, writer, options);
                match connection.process(handler).await {
                    Ok(()) => {
                        trace!(%remote_addr, "finished process, connection shutdown");
                    }
                    Err(e) => {
                        error!(%remote_addr, cause = %e, "service has error, connection shutdown");
                    }
                }
            });
        }
    }
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server").field("address", &self.address).field("options", &self.options).finish_non_exhaustive()
    }
}
