//! Tool collaborator interface, the tool registry, and the tool call chain.

mod chain;
mod function;
mod output;
mod registry;
mod traits;

pub use chain::{
    ToolCallNext, ToolCallRequest, ToolCallResult, ToolHandler, WrapToolCall, wrap_tool_fn,
};
pub(crate) use chain::{ToolChain, ToolExecutor, build_tool_chain};
pub use function::FnTool;
pub use output::{ToolError, ToolOutput};
pub use registry::ToolRegistry;
pub use traits::{SchemaTool, Tool, ToolContext};
