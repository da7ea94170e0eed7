//! 规划智能体控制器
//!
//! 六个节点经 NodeRegistry 按 FlowDefinition 装配成一张带环的图；invoke 为每次调用新建 AgentContext，
//! 跑完流程后返回最终回复与运行元数据。

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tokio_util::sync::CancellationToken;

use crate::agent::events::{EventBus, EventSubscriber};
use crate::agent::nodes::{
    AgentServices, EndNode, ExecuteNode, PlanNode, ReplanNode, RespondNode, ToolExecuteNode, END,
    EXECUTE, PLAN, REPLAN, RESPOND, TOOL_EXECUTE,
};
use crate::agent::state::AgentContext;
use crate::core::FlowError;
use crate::memory::Message;
use crate::workflow::{Flow, FlowDefinition, Node, NodeRegistry, ParallelBatchNode};

/// invoke 的输入：单条文本、消息列表或 `{"messages": [...]}`
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum AgentInput {
    Text(String),
    Messages(Vec<Message>),
    Wrapped { messages: Vec<Message> },
}

impl AgentInput {
    pub fn into_messages(self) -> Vec<Message> {
        match self {
            AgentInput::Text(text) => vec![Message::user(text)],
            AgentInput::Messages(messages) | AgentInput::Wrapped { messages } => messages,
        }
    }
}

impl From<&str> for AgentInput {
    fn from(text: &str) -> Self {
        AgentInput::Text(text.to_string())
    }
}

impl From<String> for AgentInput {
    fn from(text: String) -> Self {
        AgentInput::Text(text)
    }
}

impl From<Vec<Message>> for AgentInput {
    fn from(messages: Vec<Message>) -> Self {
        AgentInput::Messages(messages)
    }
}

/// 单次调用选项
#[derive(Debug, Clone, Default)]
pub struct InvokeOptions {
    /// 覆盖默认迭代上限
    pub max_iterations: Option<usize>,
    /// 原样并入返回的 metadata
    pub metadata: Map<String, Value>,
    pub cancel_token: Option<CancellationToken>,
}

impl InvokeOptions {
    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = Some(max_iterations);
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    pub fn with_cancel_token(mut self, token: CancellationToken) -> Self {
        self.cancel_token = Some(token);
        self
    }
}

/// invoke 的返回
#[derive(Debug, Clone, Serialize)]
pub struct AgentOutput {
    pub output: String,
    pub metadata: Map<String, Value>,
}

/// 控制循环的流程定义：节点种类即节点 id
pub fn agent_flow_definition(tool_concurrency: Option<usize>) -> FlowDefinition {
    FlowDefinition::new("planning-agent", PLAN)
        .node(PLAN, PLAN, Value::Null)
        .node(EXECUTE, EXECUTE, Value::Null)
        .node(TOOL_EXECUTE, TOOL_EXECUTE, json!({ "concurrency": tool_concurrency }))
        .node(REPLAN, REPLAN, Value::Null)
        .node(RESPOND, RESPOND, Value::Null)
        .node(END, END, Value::Null)
        .edge(PLAN, EXECUTE, EXECUTE)
        .edge(PLAN, RESPOND, RESPOND)
        .edge(EXECUTE, TOOL_EXECUTE, TOOL_EXECUTE)
        .edge(EXECUTE, RESPOND, RESPOND)
        .edge(TOOL_EXECUTE, REPLAN, REPLAN)
        .edge(TOOL_EXECUTE, RESPOND, RESPOND)
        .edge(REPLAN, EXECUTE, EXECUTE)
        .edge(REPLAN, RESPOND, RESPOND)
        .edge(RESPOND, END, END)
}

/// 注册六种节点
pub fn agent_node_registry(services: Arc<AgentServices>) -> NodeRegistry<AgentContext> {
    let mut registry = NodeRegistry::new();

    let s = services.clone();
    registry.register(PLAN, move |_| {
        Ok(Arc::new(PlanNode::new(s.clone())) as Arc<dyn Node<AgentContext>>)
    });
    let s = services.clone();
    registry.register(EXECUTE, move |_| {
        Ok(Arc::new(ExecuteNode::new(s.clone())) as Arc<dyn Node<AgentContext>>)
    });
    let s = services.clone();
    registry.register(TOOL_EXECUTE, move |config| {
        let limit = config
            .get("concurrency")
            .and_then(|v| v.as_u64())
            .map(|n| n as usize);
        let node = ParallelBatchNode::new(ToolExecuteNode::new(s.clone())).with_optional_limit(limit);
        Ok(Arc::new(node) as Arc<dyn Node<AgentContext>>)
    });
    let s = services.clone();
    registry.register(REPLAN, move |_| {
        Ok(Arc::new(ReplanNode::new(s.clone())) as Arc<dyn Node<AgentContext>>)
    });
    let s = services;
    registry.register(RESPOND, move |_| {
        Ok(Arc::new(RespondNode::new(s.clone())) as Arc<dyn Node<AgentContext>>)
    });
    registry.register(END, |_| Ok(Arc::new(EndNode) as Arc<dyn Node<AgentContext>>));

    registry
}

/// 节点执行步数上限：每轮 Execute → Tool-Execute → Replan 至少消耗一次迭代
fn step_budget(max_iterations: usize) -> usize {
    max_iterations.saturating_mul(4).saturating_add(8)
}

/// 规划智能体
pub struct PlanningAgent {
    flow: Flow<AgentContext>,
    services: Arc<AgentServices>,
    max_iterations: usize,
}

impl PlanningAgent {
    pub(crate) fn new(
        flow: Flow<AgentContext>,
        services: Arc<AgentServices>,
        max_iterations: usize,
    ) -> Self {
        Self {
            flow,
            services,
            max_iterations: max_iterations.max(1),
        }
    }

    pub fn max_iterations(&self) -> usize {
        self.max_iterations
    }

    pub fn events(&self) -> &EventBus {
        &self.services.events
    }

    pub fn subscribe(&self) -> EventSubscriber {
        self.services.events.subscribe()
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.services.tools.tool_names()
    }

    /// 运行一次控制循环
    ///
    /// 只有致命错误（模型调用重试耗尽、取消、步数保护）与配置错误会返回 Err；
    /// 工具失败与解析失败已在循环内部被吸收。
    pub async fn invoke(
        &self,
        input: impl Into<AgentInput>,
        options: InvokeOptions,
    ) -> Result<AgentOutput, FlowError> {
        let messages = input.into().into_messages();
        if messages.is_empty() {
            return Err(FlowError::node("invoke input contains no messages"));
        }

        let run_id = uuid::Uuid::new_v4().to_string();
        let started_at = Utc::now();
        let start = Instant::now();
        let max_iterations = options.max_iterations.unwrap_or(self.max_iterations).max(1);

        let mut ctx = AgentContext::new(messages, max_iterations);
        let mut flow = self
            .flow
            .clone()
            .with_param("run_id", json!(run_id))
            .with_max_steps(step_budget(max_iterations));
        if let Some(token) = options.cancel_token {
            flow = flow.with_cancel_token(token);
        }

        // 客户端的 token 统计是累计值，本次用量取差值
        let usage_before = self.services.model.llm().token_usage();

        tracing::info!(run_id = %run_id, max_iterations, "agent run started");
        if let Err(e) = flow.run(&mut ctx).await {
            tracing::error!(run_id = %run_id, error = %e, "agent run failed");
            return Err(e);
        }

        let elapsed_ms = start.elapsed().as_millis() as u64;
        let mut tools_used: Vec<String> = Vec::new();
        for name in &ctx.tools_used {
            if !tools_used.contains(name) {
                tools_used.push(name.clone());
            }
        }
        tracing::info!(
            run_id = %run_id,
            iterations = ctx.iteration,
            tool_calls = ctx.tools_used.len(),
            elapsed_ms,
            "agent run finished"
        );

        let mut metadata = options.metadata;
        metadata.insert("run_id".into(), json!(run_id));
        metadata.insert("started_at".into(), json!(started_at.to_rfc3339()));
        metadata.insert("elapsed_ms".into(), json!(elapsed_ms));
        metadata.insert("iterations".into(), json!(ctx.iteration));
        metadata.insert("tools_used".into(), json!(tools_used));
        metadata.insert("tool_calls".into(), json!(ctx.tools_used.len()));
        let usage_after = self.services.model.llm().token_usage();
        let prompt_tokens = usage_after.0.saturating_sub(usage_before.0);
        let completion_tokens = usage_after.1.saturating_sub(usage_before.1);
        let total_tokens = usage_after.2.saturating_sub(usage_before.2);
        metadata.insert(
            "token_usage".into(),
            json!({
                "prompt_tokens": prompt_tokens,
                "completion_tokens": completion_tokens,
                "total_tokens": total_tokens,
            }),
        );

        Ok(AgentOutput {
            output: ctx.final_response,
            metadata,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_input_variants_deserialize() {
        let text: AgentInput = serde_json::from_value(json!("hi")).unwrap();
        assert_eq!(text.into_messages(), vec![Message::user("hi")]);

        let list: AgentInput =
            serde_json::from_value(json!([{ "role": "user", "content": "a" }])).unwrap();
        assert_eq!(list.into_messages().len(), 1);

        let wrapped: AgentInput = serde_json::from_value(json!({
            "messages": [
                { "role": "system", "content": "s" },
                { "role": "user", "content": "b" }
            ]
        }))
        .unwrap();
        let messages = wrapped.into_messages();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[1].content, "b");
    }

    #[test]
    fn test_flow_definition_is_serializable() {
        let def = agent_flow_definition(Some(2));
        let json = serde_json::to_value(&def).unwrap();
        assert_eq!(json["start"], PLAN);
        assert_eq!(def.nodes.len(), 6);
        assert_eq!(def.edges.len(), 9);
    }

    #[test]
    fn test_step_budget_saturates() {
        assert_eq!(step_budget(5), 28);
        assert_eq!(step_budget(usize::MAX), usize::MAX);
    }
}
