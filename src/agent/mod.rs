//! Plan → Execute → Tool-Execute → Replan → Respond → End 控制循环

pub mod builder;
pub mod controller;
pub mod events;
pub mod model;
pub mod nodes;
pub mod parse;
pub mod prompts;
pub mod state;

pub use builder::AgentBuilder;
pub use controller::{
    agent_flow_definition, agent_node_registry, AgentInput, AgentOutput, InvokeOptions,
    PlanningAgent,
};
pub use events::{AgentEvent, EventBus, EventRecord, EventSubscriber};
pub use model::ModelCaller;
pub use nodes::AgentServices;
pub use parse::{parse_plan, parse_replan, parse_tool_calls, Decision, ParseOutcome};
pub use state::{AgentContext, ToolCall, ToolResult};
