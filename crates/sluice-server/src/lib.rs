//! # Sluice Server
//!
//! HTTP/1.1 server that feeds every request through a
//! [`Pipeline`](sluice_middleware::Pipeline).
//!
//! - Hyper connections on Tokio, one task per connection
//! - A fresh [`MiddlewareContext`](sluice_middleware::MiddlewareContext) per
//!   request, carrying the peer address
//! - Graceful shutdown with connection draining
//!
//! ## Example
//!
//! ```rust,no_run
//! use sluice_middleware::Pipeline;
//! use sluice_server::{Server, ServerConfig, ShutdownSignal};
//!
//! # async fn example() -> Result<(), sluice_server::ServerError> {
//! let shutdown = ShutdownSignal::new();
//! let bound = Server::builder()
//!     .config(ServerConfig::builder().http_addr("127.0.0.1:0").build())
//!     .pipeline(Pipeline::builder().build())
//!     .build()
//!     .bind()
//!     .await?;
//!
//! println!("listening on {}", bound.local_addr());
//! bound.serve(shutdown).await
//! # }
//! ```

#![doc(html_root_url = "https://docs.rs/sluice-server/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod config;
pub mod error;
pub mod server;
pub mod shutdown;

pub use config::{ServerConfig, ServerConfigBuilder};
pub use error::{ServerError, ServerResult};
pub use server::{BoundServer, Server, ServerBuilder};
pub use shutdown::{ConnectionToken, ConnectionTracker, ShutdownSignal};
