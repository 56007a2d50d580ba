//! HTTP server implementation.
//!
//! Accepts HTTP/1.1 connections with Hyper and feeds every request through a
//! [`Pipeline`]. Each request gets a fresh [`MiddlewareContext`] carrying
//! the peer address; the body is buffered before the pipeline runs.
//!
//! # Example
//!
//! ```rust,no_run
//! use http::StatusCode;
//! use sluice_middleware::{Pipeline, Response, ResponseExt};
//! use sluice_server::{Server, ServerConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), sluice_server::ServerError> {
//!     let pipeline = Pipeline::builder()
//!         .run(|_ctx, _req| async { Ok(Response::text(StatusCode::OK, "hello")) })
//!         .build();
//!
//!     Server::builder()
//!         .config(ServerConfig::builder().http_addr("127.0.0.1:8080").build())
//!         .pipeline(pipeline)
//!         .build()
//!         .run()
//!         .await
//! }
//! ```

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http::StatusCode;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use tokio::net::{TcpListener, TcpStream};

use sluice_core::ErrorEnvelope;
use sluice_middleware::{MiddlewareContext, Pipeline, Response, ResponseExt};

use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};
use crate::shutdown::{ConnectionTracker, ShutdownSignal};

/// Message of the 500 envelope for failures no unit contained.
const UNCONTAINED_FAILURE: &str = "Internal Server Error";

/// The Sluice HTTP server.
pub struct Server {
    config: ServerConfig,
    pipeline: Arc<Pipeline>,
}

impl Server {
    /// Creates a server for a pipeline.
    #[must_use]
    pub fn new(config: ServerConfig, pipeline: Pipeline) -> Self {
        Self {
            config,
            pipeline: Arc::new(pipeline),
        }
    }

    /// Creates a new server builder.
    #[must_use]
    pub fn builder() -> ServerBuilder {
        ServerBuilder::default()
    }

    /// Returns the server configuration.
    #[must_use]
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Returns the pipeline requests are fed through.
    #[must_use]
    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    /// Binds the listener without accepting connections yet.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::InvalidAddress`] or [`ServerError::Bind`].
    pub async fn bind(self) -> ServerResult<BoundServer> {
        let addr = self
            .config
            .socket_addr()
            .map_err(|e| ServerError::InvalidAddress {
                addr: self.config.http_addr().to_string(),
                reason: e.to_string(),
            })?;

        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| ServerError::Bind { addr, source })?;
        let local_addr = listener.local_addr()?;

        Ok(BoundServer {
            listener,
            local_addr,
            config: self.config,
            pipeline: self.pipeline,
        })
    }

    /// Runs the server until SIGTERM or SIGINT.
    ///
    /// # Errors
    ///
    /// Returns an error if the server cannot bind.
    pub async fn run(self) -> ServerResult<()> {
        self.run_with_shutdown(ShutdownSignal::with_os_signals()).await
    }

    /// Runs the server until `shutdown` is triggered.
    ///
    /// # Errors
    ///
    /// Returns an error if the server cannot bind.
    pub async fn run_with_shutdown(self, shutdown: ShutdownSignal) -> ServerResult<()> {
        self.bind().await?.serve(shutdown).await
    }
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("config", &self.config)
            .field("pipeline", &self.pipeline)
            .finish()
    }
}

/// A server whose listener is bound.
#[derive(Debug)]
pub struct BoundServer {
    listener: TcpListener,
    local_addr: SocketAddr,
    config: ServerConfig,
    pipeline: Arc<Pipeline>,
}

impl BoundServer {
    /// Returns the address the listener is bound to.
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Accepts connections until `shutdown` is triggered, then waits up to
    /// the shutdown timeout for open connections to finish.
    ///
    /// # Errors
    ///
    /// Accept failures are logged, not returned; the result is reserved for
    /// fatal listener errors.
    pub async fn serve(self, shutdown: ShutdownSignal) -> ServerResult<()> {
        tracing::info!(addr = %self.local_addr, "Server listening");

        let tracker = ConnectionTracker::new();
        let max_connections = self.config.max_connections();

        loop {
            tokio::select! {
                result = self.listener.accept() => {
                    let (stream, peer) = match result {
                        Ok(accepted) => accepted,
                        Err(e) => {
                            tracing::error!(error = %e, "Failed to accept connection");
                            continue;
                        }
                    };

                    let token = match max_connections {
                        Some(max) => match tracker.try_acquire(max) {
                            Some(token) => token,
                            None => {
                                tracing::warn!(peer = %peer, max, "Connection limit reached, refusing connection");
                                continue;
                            }
                        },
                        None => tracker.acquire(),
                    };

                    let connection = Connection {
                        pipeline: Arc::clone(&self.pipeline),
                        peer,
                        request_timeout: self.config.request_timeout(),
                        keep_alive: self.config.keep_alive_timeout().is_some(),
                    };
                    let shutdown = shutdown.clone();

                    tokio::spawn(async move {
                        if let Err(e) = connection.serve(stream, shutdown).await {
                            tracing::debug!(peer = %peer, error = %e, "Connection error");
                        }
                        drop(token);
                    });
                }

                () = shutdown.recv() => {
                    tracing::info!("Shutdown signal received, stopping server");
                    break;
                }
            }
        }

        let shutdown_timeout = self.config.shutdown_timeout();
        tracing::info!(
            timeout = ?shutdown_timeout,
            active = tracker.active_connections(),
            "Waiting for connections to close"
        );

        tokio::select! {
            () = tracker.wait_for_drain() => {
                tracing::info!("All connections closed");
            }
            () = tokio::time::sleep(shutdown_timeout) => {
                tracing::warn!(
                    active = tracker.active_connections(),
                    "Shutdown timeout reached with connections still open"
                );
            }
        }

        tracing::info!("Server stopped");
        Ok(())
    }
}

/// Builder for [`Server`].
#[derive(Debug, Default)]
pub struct ServerBuilder {
    config: Option<ServerConfig>,
    pipeline: Option<Pipeline>,
}

impl ServerBuilder {
    /// Creates a builder with the default configuration and an empty
    /// pipeline.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the server configuration.
    #[must_use]
    pub fn config(mut self, config: ServerConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Sets the pipeline requests are fed through.
    #[must_use]
    pub fn pipeline(mut self, pipeline: Pipeline) -> Self {
        self.pipeline = Some(pipeline);
        self
    }

    /// Builds the server. Without a pipeline every request is answered
    /// `404 Not Found`.
    #[must_use]
    pub fn build(self) -> Server {
        Server::new(
            self.config.unwrap_or_default(),
            self.pipeline.unwrap_or_else(|| Pipeline::builder().build()),
        )
    }
}

/// Per-connection state.
struct Connection {
    pipeline: Arc<Pipeline>,
    peer: SocketAddr,
    request_timeout: Duration,
    keep_alive: bool,
}

impl Connection {
    async fn serve(self, stream: TcpStream, shutdown: ShutdownSignal) -> Result<(), hyper::Error> {
        let io = TokioIo::new(stream);
        let peer = self.peer;
        let keep_alive = self.keep_alive;
        let connection = Arc::new(self);

        let service = service_fn(move |request: http::Request<Incoming>| {
            let connection = Arc::clone(&connection);
            async move { Ok::<_, Infallible>(connection.handle(request).await) }
        });

        let conn = http1::Builder::new()
            .keep_alive(keep_alive)
            .serve_connection(io, service);
        tokio::pin!(conn);

        tokio::select! {
            result = conn.as_mut() => result,
            () = shutdown.recv() => {
                tracing::debug!(peer = %peer, "Closing connection for shutdown");
                conn.as_mut().graceful_shutdown();
                conn.await
            }
        }
    }

    async fn handle(&self, request: http::Request<Incoming>) -> Response {
        let (parts, body) = request.into_parts();

        let bytes = match tokio::time::timeout(self.request_timeout, body.collect()).await {
            Ok(Ok(collected)) => collected.to_bytes(),
            Ok(Err(e)) => {
                tracing::warn!(peer = %self.peer, error = %e, "Failed to read request body");
                return Response::error(StatusCode::BAD_REQUEST, "Failed to read request body");
            }
            Err(_) => {
                tracing::warn!(peer = %self.peer, "Timed out reading request body");
                return Response::error(StatusCode::REQUEST_TIMEOUT, "Request body timed out");
            }
        };

        let request = http::Request::from_parts(parts, Full::<Bytes>::new(bytes));
        let mut ctx = MiddlewareContext::new().with_peer_addr(self.peer);

        let outcome =
            tokio::time::timeout(self.request_timeout, self.pipeline.handle(&mut ctx, request)).await;
        match outcome {
            Ok(Ok(response)) => response,
            Ok(Err(error)) => {
                tracing::error!(
                    request_id = %ctx.request_id(),
                    client = %ctx.identity(),
                    error = ?error,
                    "Pipeline failure escaped every unit"
                );
                Response::envelope(&ErrorEnvelope::internal(UNCONTAINED_FAILURE))
            }
            Err(_) => {
                tracing::warn!(request_id = %ctx.request_id(), "Pipeline timed out");
                Response::error(StatusCode::GATEWAY_TIMEOUT, "Request processing timed out")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_defaults() {
        let server = Server::builder().build();
        assert_eq!(server.config().http_addr(), "0.0.0.0:8080");
        assert!(!server.pipeline().has_terminal());
    }

    #[tokio::test]
    async fn test_invalid_address_is_rejected() {
        let server = Server::builder()
            .config(ServerConfig::builder().http_addr("not-a-valid-address").build())
            .build();

        let err = server.bind().await.unwrap_err();
        assert!(matches!(err, ServerError::InvalidAddress { .. }));
        assert!(err.to_string().contains("not-a-valid-address"));
    }

    #[tokio::test]
    async fn test_bind_ephemeral_port() {
        let server = Server::builder()
            .config(ServerConfig::builder().http_addr("127.0.0.1:0").build())
            .build();

        let bound = server.bind().await.unwrap();
        assert_ne!(bound.local_addr().port(), 0);
    }
}
