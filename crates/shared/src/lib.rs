//! Shared types for the academia notification client.
//!
//! Everything in here is a wire format: notification records as the REST
//! backend returns them, the envelopes pushed over the socket, and the error
//! bodies the API answers with.

pub mod error;
pub mod models;
pub mod protocol;

pub use error::*;
pub use models::*;
pub use protocol::*;
