//! # HTTP Server
//!
//! Serves a [`Dispatcher`] over HTTP/1 with Hyper and Tokio.
//! Implements graceful shutdown with signal handling.
//!
//! ## Key Features
//!
//! - Async connection handling on the Tokio runtime
//! - Graceful shutdown on SIGINT, draining open connections
//! - Request body size limit (413)
//! - Unsupported verbs answered with 501

use crate::dispatcher::Dispatcher;
use crate::error::{Error, Result};
use crate::request::Request;
use crate::response::Response;
use http_body_util::Full;
use hyper::body::Bytes;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::StatusCode;
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Filter used when `RUST_LOG` is unset
pub const DEFAULT_LOG_FILTER: &str = "galette=info";

/// Install a JSON tracing subscriber filtered by `RUST_LOG`
///
/// Does nothing when a global subscriber is already set.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let _ = tracing_subscriber::fmt()
        .json()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}

/// HTTP Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind the server to
    pub address: SocketAddr,
    /// Enable keep-alive connections
    pub keep_alive: bool,
    /// Shutdown timeout for graceful shutdown (default: 30 seconds)
    pub shutdown_timeout: Duration,
    /// Max request body size in bytes
    pub max_body_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: ([127, 0, 0, 1], 8000).into(),
            keep_alive: true,
            shutdown_timeout: Duration::from_secs(30),
            max_body_size: 1024 * 1024,
        }
    }
}

/// HTTP front end for a compiled API
#[derive(Debug)]
pub struct Server {
    config: ServerConfig,
    dispatcher: Arc<Dispatcher>,
}

impl Server {
    /// Server for a dispatcher with the default configuration
    #[must_use]
    pub fn new(dispatcher: Dispatcher) -> Self {
        Self {
            config: ServerConfig::default(),
            dispatcher: Arc::new(dispatcher),
        }
    }

    /// Replace the configuration
    #[must_use]
    pub fn with_config(mut self, config: ServerConfig) -> Self {
        self.config = config;
        self
    }

    /// Bind the server to an address
    #[must_use]
    pub const fn bind(mut self, addr: SocketAddr) -> Self {
        self.config.address = addr;
        self
    }

    /// Set max request body size
    pub fn set_max_body_size(&mut self, bytes: usize) {
        self.config.max_body_size = bytes;
    }

    /// Current configuration
    #[must_use]
    pub const fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// The dispatcher behind the server
    #[must_use]
    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Start the server with graceful shutdown
    ///
    /// # Errors
    ///
    /// Returns `Error::BindError` when the address cannot be bound and
    /// `Error::Io` when accepting a connection fails.
    pub async fn serve(&self) -> Result<()> {
        let addr = self.config.address;
        let listener = bind(addr).map_err(|source| Error::BindError {
            address: addr.to_string(),
            source,
        })?;

        info!(address = %addr, routes = self.dispatcher.routes().len(), "Server listening");

        let active = Arc::new(AtomicUsize::new(0));
        let max_body_size = self.config.max_body_size;
        let keep_alive = self.config.keep_alive;
        let shutdown = shutdown_signal();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                accept_result = listener.accept() => {
                    let (stream, remote_addr) = accept_result?;
                    let io = TokioIo::new(stream);
                    let dispatcher = self.dispatcher.clone();
                    let active = active.clone();

                    tokio::task::spawn(async move {
                        active.fetch_add(1, Ordering::Relaxed);
                        let service = service_fn(move |req| {
                            let dispatcher = dispatcher.clone();
                            async move {
                                Ok::<_, Infallible>(
                                    handle_request(req, &dispatcher, remote_addr, max_body_size).await,
                                )
                            }
                        });
                        if let Err(err) = http1::Builder::new()
                            .keep_alive(keep_alive)
                            .serve_connection(io, service)
                            .await
                        {
                            error!(remote = %remote_addr, error = %err, "Error serving connection");
                        }
                        active.fetch_sub(1, Ordering::Relaxed);
                    });
                }
                () = &mut shutdown => {
                    info!("Shutdown signal received, stopping server...");
                    break;
                }
            }
        }

        let timeout = self.config.shutdown_timeout;
        let drain = async {
            while active.load(Ordering::Relaxed) > 0 {
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        };
        if tokio::time::timeout(timeout, drain).await.is_err() {
            warn!(
                open = active.load(Ordering::Relaxed),
                "Shutdown timeout reached with open connections"
            );
        }
        Ok(())
    }
}

fn bind(addr: SocketAddr) -> std::io::Result<tokio::net::TcpListener> {
    let socket = if addr.is_ipv4() {
        tokio::net::TcpSocket::new_v4()?
    } else {
        tokio::net::TcpSocket::new_v6()?
    };
    socket.set_reuseaddr(true)?;
    #[cfg(not(windows))]
    {
        socket.set_reuseport(true)?;
    }
    socket.bind(addr)?;
    socket.listen(1024)
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(error = %err, "Failed to install CTRL+C signal handler");
        std::future::pending::<()>().await;
    }
}

fn plain(status: StatusCode) -> Response {
    Response::text(status.canonical_reason().unwrap_or_default()).with_status(status)
}

/// Turn a hyper request into a dispatcher response
async fn handle_request(
    req: hyper::Request<hyper::body::Incoming>,
    dispatcher: &Dispatcher,
    remote_addr: SocketAddr,
    max_body_size: usize,
) -> hyper::Response<Full<Bytes>> {
    let response = match Request::from_hyper_with_limit(req, max_body_size).await {
        Ok(Some(request)) => {
            let request = request.with_header("x-client-ip", &remote_addr.ip().to_string());
            dispatcher.serve(request)
        }
        Ok(None) => plain(StatusCode::NOT_IMPLEMENTED),
        Err(Error::PayloadTooLarge { limit, actual }) => {
            warn!(remote = %remote_addr, limit, actual, "Request body too large");
            plain(StatusCode::PAYLOAD_TOO_LARGE)
        }
        Err(Error::Http(err)) => {
            warn!(remote = %remote_addr, error = %err, "Request body could not be read");
            plain(StatusCode::BAD_REQUEST)
        }
        Err(err) => {
            error!(remote = %remote_addr, error = %err, "Failed to read request");
            plain(StatusCode::BAD_REQUEST)
        }
    };
    response.into_hyper()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::Api;

    #[test]
    fn test_server_config_default() {
        let config = ServerConfig::default();
        assert_eq!(config.address.port(), 8000);
        assert!(config.keep_alive);
        assert_eq!(config.max_body_size, 1024 * 1024);
    }

    #[test]
    fn test_server_builders() {
        let mut server = Server::new(Api::new().build().unwrap()).bind(([0, 0, 0, 0], 9090).into());
        server.set_max_body_size(16);
        assert_eq!(server.config().address.port(), 9090);
        assert_eq!(server.config().max_body_size, 16);
        assert!(server.dispatcher().routes().is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn test_serve_reports_bind_error() {
        let taken = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let server = Server::new(Api::new().build().unwrap()).bind(taken.local_addr().unwrap());
        let result = tokio_test::block_on(server.serve());
        assert!(matches!(result, Err(Error::BindError { .. })));
    }

    #[test]
    fn test_plain_response() {
        let response = plain(StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(response.status, StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(response.body_text(), "Payload Too Large");
    }
}
