//! Bee Flow - 节点/流程执行引擎与规划智能体
//!
//! 模块划分：
//! - **workflow**: 工作单元（prep / exec / post）、后继图、编排器、批处理变体、节点注册表
//! - **agent**: Plan → Execute → Tool-Execute → Replan → Respond → End 控制循环与事件总线
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误类型
//! - **llm**: LLM 客户端抽象与实现（OpenAI 兼容 / DeepSeek / Mock）
//! - **memory**: 对话消息
//! - **tools**: 工具注册表、执行器与内置工具（echo、calculator）
//! - **observability**: 日志初始化

pub mod agent;
pub mod config;
pub mod core;
pub mod llm;
pub mod memory;
pub mod observability;
pub mod tools;
pub mod workflow;

pub use agent::{AgentBuilder, AgentInput, AgentOutput, InvokeOptions, PlanningAgent};
pub use core::FlowError;
