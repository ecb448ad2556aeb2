//! Wire layer for the phi agent runtime.
//!
//! This crate owns the provider-facing half of the runtime: the message
//! data model, the normalized stream-event contract, and the two
//! OpenAI-family adapters (`/chat/completions` SSE and the ChatGPT-backend
//! `/responses` SSE), plus the ChatGPT credential store and OAuth device
//! flow the responses adapter authenticates with.

pub mod auth;
pub mod errors;
pub mod openai;
pub mod provider;
pub mod stream;
pub mod testing;
pub mod types;
pub mod utils;

pub use errors::*;
pub use openai::{OpenAIClient, parse_tool_arguments};
pub use provider::*;
pub use stream::*;
pub use types::*;
