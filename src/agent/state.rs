//! 智能体单次运行的共享上下文
//!
//! 由 invoke 创建，沿 Plan → Execute → Tool-Execute → Replan → Respond → End 传递；
//! 只有各节点的 post 阶段写入。

use serde::{Deserialize, Serialize};

use crate::memory::Message;

/// 一次工具调用请求（Execute 阶段产出）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub name: String,
    #[serde(default)]
    pub arguments: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

/// 一次工具调用结果（Tool-Execute 阶段产出）；失败时 result 为错误文本、success 为 false
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
    pub result: String,
    pub success: bool,
}

/// 共享上下文
#[derive(Debug, Clone, Default)]
pub struct AgentContext {
    /// 对话历史（含用户输入与 tool 角色的工具结果）
    pub history: Vec<Message>,
    /// 当前用户请求（历史中最后一条 user 消息）
    pub query: String,
    /// 当前计划文本
    pub plan: String,
    /// 待执行的工具调用
    pub tool_calls: Vec<ToolCall>,
    /// 最近一轮的工具结果
    pub tool_results: Vec<ToolResult>,
    /// 已消耗的规划轮数（Plan / Replan 各 +1）
    pub iteration: usize,
    pub max_iterations: usize,
    pub finished: bool,
    pub final_response: String,
    /// 按调用顺序记录的工具名（可重复）
    pub tools_used: Vec<String>,
}

impl AgentContext {
    pub fn new(history: Vec<Message>, max_iterations: usize) -> Self {
        let query = history
            .iter()
            .rev()
            .find(|m| m.role == crate::memory::Role::User)
            .map(|m| m.content.clone())
            .unwrap_or_default();
        Self {
            history,
            query,
            max_iterations: max_iterations.max(1),
            ..Self::default()
        }
    }

    /// 迭代计数是否已达上限
    pub fn at_cap(&self) -> bool {
        self.iteration >= self.max_iterations
    }
}
