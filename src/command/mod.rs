//! Command dispatch for the HTTP control surface
//!
//! This module handles:
//! - Token checks ahead of every other step
//! - Resolving one backend or all of them
//! - Delays, fire-and-forget dispatch and waiting for replies
//! - The tagged outcome every endpoint serializes

mod dispatcher;
mod outcome;
mod request;

pub use dispatcher::Dispatcher;
pub use outcome::{DispatchError, Envelope, Outcome, Payload};
pub use request::{normalize_delay, parse_port, CommandRequest, Target};
