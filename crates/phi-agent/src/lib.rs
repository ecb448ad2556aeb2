//! Agent core for the phi runtime.
//!
//! A [`session::Agent`] owns one conversation: the ordered message log,
//! the active model and tool set, an observer fan-out list, and the
//! steer/follow-up queues. The turn runner drives one user→assistant
//! turn against a provider client, dispatching tool calls until the
//! model stops requesting them. The inbound [`queue::Queue`] multiplexes
//! many sessions over a bounded worker pool.

pub mod errors;
pub mod queue;
pub mod runner;
pub mod session;
pub mod types;

pub use errors::*;
pub use queue::*;
pub use runner::*;
pub use session::*;
pub use types::*;
