//! Embedding SDK for the phi runtime.
//!
//! [`AgentSession`] wraps an agent with a session-log manager and a
//! provider client into the prompt cycle a host program drives.
//! [`Runtime`] multiplexes many sessions behind the inbound queue,
//! creating sessions on demand through a host-supplied factory. The
//! `tools` module supplies the standard coding tool set, and `skills`
//! loads SKILL.md files for hosts that inject them into prompts.

pub mod entries;
pub mod errors;
pub mod manager;
pub mod runtime;
pub mod session;
pub mod skills;
pub mod tools;

pub use entries::*;
pub use errors::*;
pub use manager::*;
pub use runtime::*;
pub use session::*;
