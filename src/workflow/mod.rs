//! 节点/流程执行引擎：工作单元、后继图、编排器、批处理变体与节点注册表

pub mod batch;
pub mod builder;
pub mod engine;
pub mod graph;
pub mod node;
pub mod retry;
pub mod types;

pub use batch::{chunk_items, BatchFlow, BatchNode, ParallelBatchFlow, ParallelBatchNode};
pub use builder::{EdgeDefinition, FlowDefinition, NodeConstructor, NodeDefinition, NodeRegistry};
pub use engine::Flow;
pub use graph::Graph;
pub use node::{exec_with_retry, run_node, Node};
pub use retry::RetryPolicy;
pub use types::*;
