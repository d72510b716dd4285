//! Tool-using agent engine: a ReAct loop that streams thoughts, tool calls
//! and the final answer as events on the request bus.

mod engine;
mod prompts;

pub use engine::{AgentEngine, AgentOutcome};
pub use prompts::build_react_system_prompt;
