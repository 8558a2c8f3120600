//! The multi-step orchestration engine: the step loop, per-step
//! configuration, tool dispatch and stop conditions.

#![deny(missing_docs)]
#![deny(clippy::missing_safety_doc)]

#[macro_use]
extern crate tracing;

mod agent;
pub mod conversation;
mod error;
mod model_client;
pub mod prepare;
pub mod step;
pub mod stop;
pub mod tool;

pub use agent::{
    Agent, AgentBuilder, RunInput, RunOptions, RunOutput, TerminalReason,
};
pub use error::{BoxError, RunError};
pub use model_client::{ChunkCallback, ModelClient, RetryPolicy};
