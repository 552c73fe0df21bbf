//! Agent construction and the execution loop.

mod builder;
mod config;
mod execution;
mod executor;
mod runtime;

pub use builder::{AgentBuilder, create_agent};
pub use config::{AgentConfig, DEFAULT_RECURSION_LIMIT};
pub use executor::{Agent, InvokeOptions};
pub use runtime::Runtime;
