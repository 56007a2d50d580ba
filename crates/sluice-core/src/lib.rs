//! # Sluice Core
//!
//! Foundational types shared by every Sluice crate:
//!
//! - [`RequestId`] - UUID v7 request identifier used for log correlation
//! - [`ClientIdentity`] - who is calling, as derived from the network origin
//! - [`ErrorEnvelope`] - the `{statusCode, message}` body written on every
//!   rejected or failed request

#![doc(html_root_url = "https://docs.rs/sluice-core/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

mod error;
mod identity;
mod request_id;

pub use error::ErrorEnvelope;
pub use identity::ClientIdentity;
pub use request_id::RequestId;
