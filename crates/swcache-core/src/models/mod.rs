//! Domain models for intercepted requests and cached responses.
//!
//! These types are independent of any host runtime: a `Request` is the
//! page fetch being intercepted, a `Response` is what the manager hands back
//! (from cache or network) and what the storage layer persists.

pub mod manifest;
pub mod message;
pub mod request;
pub mod response;

pub use manifest::Manifest;
pub use message::ClientMessage;
pub use request::Request;
pub use response::{Response, ResponseOrigin};
