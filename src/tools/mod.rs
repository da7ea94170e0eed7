pub mod calculator;
pub mod echo;
pub mod executor;
pub mod registry;
pub mod schema;

pub use calculator::CalculatorTool;
pub use echo::EchoTool;
pub use executor::ToolExecutor;
pub use registry::{Tool, ToolDescriptor, ToolRegistry};
pub use schema::tool_call_schema_json;
