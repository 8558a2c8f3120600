//! An abstraction layer for different LLMs.
//!
//! This crate establishes an unified protocol for the orchestration engine
//! to interact with various supported LLMs, so that a run can seamlessly
//! switch between them (even from one step to the next) without modifying
//! the core codebase.
//!
//! Types in this crate don't define any behavior, instead they are the
//! constraints that the implementors should adhere to.

#![deny(missing_docs)]

mod content;
mod error;
mod opaque;
mod provider;
mod request;
mod response;
mod usage;

pub use content::*;
pub use error::*;
pub use opaque::*;
pub use provider::*;
pub use request::*;
pub use response::*;
pub use usage::*;
