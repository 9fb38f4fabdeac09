//! The cache manager lifecycle and its host-side registration.
//!
//! - `CacheManager`: one versioned bucket; install, activate, fetch, message
//! - `Registration`: active/waiting slots, client counting, update checks

pub mod events;
pub mod manager;
pub mod registration;
pub mod state;

pub use events::{ActivationReport, Event, EventOutcome, FetchOutcome, ResponseSource};
pub use manager::CacheManager;
pub use registration::Registration;
pub use state::WorkerState;
