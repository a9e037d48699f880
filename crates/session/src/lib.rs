//! # Genie Session
//!
//! HTTP client for one running engine. Replies are returned as the engine's
//! JSON, untouched; success is signalled in-band by `"response": 200`.
//!
//! Configuration (result count, neglected filters and projections, direct
//! sentence state) is cached per session and only pushed when a query asks
//! for a value different from what the engine last acknowledged.

mod error;
mod session;

pub use error::{Result, SessionError};
pub use session::{QueryOptions, Session, SessionState};
