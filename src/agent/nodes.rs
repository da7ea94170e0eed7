//! 控制循环的六个节点：Plan / Execute / Tool-Execute / Replan / Respond / End
//!
//! 模型调用放在 exec（按 [llm] 的重试策略重试，耗尽即致命）；解析与路由放在 post。
//! Tool-Execute 是并行批处理节点：每个工具调用一个条目，单个调用的失败经 exec_fallback 变成错误文本结果。

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::agent::events::{AgentEvent, EventBus};
use crate::agent::model::ModelCaller;
use crate::agent::parse::{parse_plan, parse_replan, parse_tool_calls, Decision, ParseOutcome};
use crate::agent::prompts;
use crate::agent::state::{AgentContext, ToolCall, ToolResult};
use crate::core::FlowError;
use crate::memory::Message;
use crate::tools::ToolExecutor;
use crate::workflow::{Action, Node, Params, RetryPolicy};

pub const PLAN: &str = "plan";
pub const EXECUTE: &str = "execute";
pub const TOOL_EXECUTE: &str = "tool_execute";
pub const REPLAN: &str = "replan";
pub const RESPOND: &str = "respond";
pub const END: &str = "end";

/// Respond 得到空回复时使用的兜底文本
const EMPTY_ANSWER: &str = "I was unable to produce an answer for this request.";

/// 节点共享的运行依赖（构建图时注入，运行期只读）
pub struct AgentServices {
    pub model: ModelCaller,
    pub tools: Arc<ToolExecutor>,
    pub events: EventBus,
    pub system_prompt: Option<String>,
    pub llm_retry: RetryPolicy,
    pub tool_retry: RetryPolicy,
}

impl AgentServices {
    fn prefix(&self) -> Option<&str> {
        self.system_prompt.as_deref()
    }
}

/// 当前运行的 id（由 invoke 通过 params 注入）
pub fn run_id(params: &Params) -> &str {
    params.get("run_id").and_then(|v| v.as_str()).unwrap_or("")
}

fn route(label: &str) -> Action {
    Some(label.to_string())
}

fn to_messages(prep: Value) -> Result<Vec<Message>, FlowError> {
    Ok(serde_json::from_value(prep)?)
}

fn text_of(exec: &Value) -> &str {
    exec.as_str().unwrap_or_default()
}

async fn call_model(
    services: &AgentServices,
    stage: &str,
    prep: Value,
    params: &Params,
) -> Result<Value, FlowError> {
    let messages = to_messages(prep)?;
    let text = services.model.call(run_id(params), stage, &messages).await?;
    Ok(Value::String(text))
}

/// Plan：产出计划与是否需要工具
pub struct PlanNode {
    services: Arc<AgentServices>,
}

impl PlanNode {
    pub fn new(services: Arc<AgentServices>) -> Self {
        Self { services }
    }
}

#[async_trait]
impl Node<AgentContext> for PlanNode {
    fn name(&self) -> &str {
        PLAN
    }

    fn retry_policy(&self) -> RetryPolicy {
        self.services.llm_retry.clone()
    }

    async fn prep(&self, ctx: &AgentContext, _params: &Params) -> Result<Value, FlowError> {
        let messages = prompts::plan(
            self.services.prefix(),
            &self.services.tools.descriptors(),
            &ctx.history,
        );
        Ok(serde_json::to_value(messages)?)
    }

    async fn exec(&self, prep: Value, params: &Params) -> Result<Value, FlowError> {
        call_model(&self.services, PLAN, prep, params).await
    }

    async fn post(
        &self,
        ctx: &mut AgentContext,
        _prep: Value,
        exec: Value,
        params: &Params,
    ) -> Result<Action, FlowError> {
        let step = parse_plan(text_of(&exec));
        ctx.plan = step.plan;
        ctx.iteration += 1;
        let needs_tools = step.needs_tools && !self.services.tools.tool_names().is_empty();
        tracing::info!(iteration = ctx.iteration, needs_tools, "plan step");
        self.services.events.publish(
            run_id(params),
            AgentEvent::PlanStep {
                iteration: ctx.iteration,
                plan: ctx.plan.clone(),
                needs_tools,
            },
        );
        Ok(route(if needs_tools { EXECUTE } else { RESPOND }))
    }
}

/// Execute：让模型给出 tool_calls，宽松解析，失败视为没有工具调用
pub struct ExecuteNode {
    services: Arc<AgentServices>,
}

impl ExecuteNode {
    pub fn new(services: Arc<AgentServices>) -> Self {
        Self { services }
    }
}

#[async_trait]
impl Node<AgentContext> for ExecuteNode {
    fn name(&self) -> &str {
        EXECUTE
    }

    fn retry_policy(&self) -> RetryPolicy {
        self.services.llm_retry.clone()
    }

    async fn prep(&self, ctx: &AgentContext, _params: &Params) -> Result<Value, FlowError> {
        let messages = prompts::execute(
            self.services.prefix(),
            &ctx.plan,
            &self.services.tools.schema_json(),
            &ctx.history,
        );
        Ok(serde_json::to_value(messages)?)
    }

    async fn exec(&self, prep: Value, params: &Params) -> Result<Value, FlowError> {
        call_model(&self.services, EXECUTE, prep, params).await
    }

    async fn post(
        &self,
        ctx: &mut AgentContext,
        _prep: Value,
        exec: Value,
        _params: &Params,
    ) -> Result<Action, FlowError> {
        let calls = match parse_tool_calls(text_of(&exec)) {
            ParseOutcome::Parsed(calls) => calls,
            ParseOutcome::Failed(reason) => {
                tracing::warn!(%reason, "tool call parse failed, continuing without tools");
                Vec::new()
            }
        };
        tracing::info!(calls = calls.len(), "execute step");
        let next = if calls.is_empty() { RESPOND } else { TOOL_EXECUTE };
        ctx.tool_calls = calls;
        Ok(route(next))
    }
}

/// Tool-Execute 的单条目节点；放进 ParallelBatchNode 使用
pub struct ToolExecuteNode {
    services: Arc<AgentServices>,
}

impl ToolExecuteNode {
    pub fn new(services: Arc<AgentServices>) -> Self {
        Self { services }
    }
}

#[async_trait]
impl Node<AgentContext> for ToolExecuteNode {
    fn name(&self) -> &str {
        TOOL_EXECUTE
    }

    fn retry_policy(&self) -> RetryPolicy {
        self.services.tool_retry.clone()
    }

    async fn prep(&self, ctx: &AgentContext, _params: &Params) -> Result<Value, FlowError> {
        Ok(serde_json::to_value(&ctx.tool_calls)?)
    }

    async fn exec(&self, item: Value, _params: &Params) -> Result<Value, FlowError> {
        let call: ToolCall = serde_json::from_value(item)?;
        let output = self
            .services
            .tools
            .execute(&call.name, call.arguments.clone())
            .await?;
        Ok(serde_json::to_value(ToolResult {
            id: call.id,
            name: call.name,
            result: output,
            success: true,
        })?)
    }

    async fn exec_fallback(
        &self,
        item: Value,
        _params: &Params,
        err: FlowError,
    ) -> Result<Value, FlowError> {
        let (id, name) = match serde_json::from_value::<ToolCall>(item) {
            Ok(call) => (call.id, call.name),
            Err(_) => (None, "unknown".to_string()),
        };
        tracing::warn!(tool = %name, error = %err, "tool call failed, recording error result");
        Ok(serde_json::to_value(ToolResult {
            id,
            name,
            result: format!("Error: {}", err),
            success: false,
        })?)
    }

    async fn post(
        &self,
        ctx: &mut AgentContext,
        _prep: Value,
        exec: Value,
        params: &Params,
    ) -> Result<Action, FlowError> {
        let results: Vec<ToolResult> = serde_json::from_value(exec)?;
        let calls = std::mem::take(&mut ctx.tool_calls);

        for (index, result) in results.iter().enumerate() {
            let arguments = calls
                .get(index)
                .map(|c| c.arguments.clone())
                .unwrap_or(Value::Null);
            self.services.events.publish(
                run_id(params),
                AgentEvent::ToolExecution {
                    id: result.id.clone(),
                    name: result.name.clone(),
                    arguments,
                    result: result.result.clone(),
                    success: result.success,
                },
            );
            ctx.history.push(Message::tool(
                result.name.clone(),
                result.id.clone(),
                result.result.clone(),
            ));
            ctx.tools_used.push(result.name.clone());
        }
        ctx.tool_results = results;

        // 工具全部成功也进入 Replan
        let next = if ctx.at_cap() { RESPOND } else { REPLAN };
        tracing::info!(
            results = ctx.tool_results.len(),
            iteration = ctx.iteration,
            next,
            "tool execute step"
        );
        Ok(route(next))
    }
}

/// Replan：CONTINUE 回到 Execute，RESPOND 或达到上限进入 Respond
pub struct ReplanNode {
    services: Arc<AgentServices>,
}

impl ReplanNode {
    pub fn new(services: Arc<AgentServices>) -> Self {
        Self { services }
    }
}

#[async_trait]
impl Node<AgentContext> for ReplanNode {
    fn name(&self) -> &str {
        REPLAN
    }

    fn retry_policy(&self) -> RetryPolicy {
        self.services.llm_retry.clone()
    }

    async fn prep(&self, ctx: &AgentContext, _params: &Params) -> Result<Value, FlowError> {
        let messages = prompts::replan(
            self.services.prefix(),
            &ctx.plan,
            &ctx.tool_results,
            &ctx.history,
        );
        Ok(serde_json::to_value(messages)?)
    }

    async fn exec(&self, prep: Value, params: &Params) -> Result<Value, FlowError> {
        call_model(&self.services, REPLAN, prep, params).await
    }

    async fn post(
        &self,
        ctx: &mut AgentContext,
        _prep: Value,
        exec: Value,
        params: &Params,
    ) -> Result<Action, FlowError> {
        let step = parse_replan(text_of(&exec));
        if let Some(plan) = step.plan {
            ctx.plan = plan;
        }
        ctx.iteration += 1;

        let respond = step.decision == Decision::Respond || ctx.at_cap();
        let decision = match step.decision {
            Decision::Continue => "CONTINUE",
            Decision::Respond => "RESPOND",
        };
        tracing::info!(iteration = ctx.iteration, decision, "replan step");
        self.services.events.publish(
            run_id(params),
            AgentEvent::ReplanStep {
                iteration: ctx.iteration,
                decision: decision.to_string(),
                plan: ctx.plan.clone(),
            },
        );
        Ok(route(if respond { RESPOND } else { EXECUTE }))
    }
}

/// Respond：生成最终回复并标记完成
pub struct RespondNode {
    services: Arc<AgentServices>,
}

impl RespondNode {
    pub fn new(services: Arc<AgentServices>) -> Self {
        Self { services }
    }
}

/// 模型给出空回复时的兜底：最后一个成功的工具结果，否则计划，否则固定文本
fn fallback_answer(ctx: &AgentContext) -> String {
    ctx.tool_results
        .iter()
        .rev()
        .find(|r| r.success && !r.result.trim().is_empty())
        .map(|r| r.result.clone())
        .or_else(|| Some(ctx.plan.trim().to_string()).filter(|p| !p.is_empty()))
        .unwrap_or_else(|| EMPTY_ANSWER.to_string())
}

#[async_trait]
impl Node<AgentContext> for RespondNode {
    fn name(&self) -> &str {
        RESPOND
    }

    fn retry_policy(&self) -> RetryPolicy {
        self.services.llm_retry.clone()
    }

    async fn prep(&self, ctx: &AgentContext, _params: &Params) -> Result<Value, FlowError> {
        let messages = prompts::respond(
            self.services.prefix(),
            &ctx.plan,
            &ctx.tool_results,
            &ctx.history,
        );
        Ok(serde_json::to_value(messages)?)
    }

    async fn exec(&self, prep: Value, params: &Params) -> Result<Value, FlowError> {
        call_model(&self.services, RESPOND, prep, params).await
    }

    async fn post(
        &self,
        ctx: &mut AgentContext,
        _prep: Value,
        exec: Value,
        params: &Params,
    ) -> Result<Action, FlowError> {
        let answer = text_of(&exec).trim();
        let answer = if answer.is_empty() {
            tracing::warn!("empty final answer from model, using fallback");
            fallback_answer(ctx)
        } else {
            answer.to_string()
        };
        ctx.final_response = answer.clone();
        ctx.finished = true;
        ctx.history.push(Message::assistant(answer.clone()));
        self.services.events.publish(
            run_id(params),
            AgentEvent::FinalResponse { response: answer },
        );
        Ok(route(END))
    }
}

/// End：终止状态
pub struct EndNode;

#[async_trait]
impl Node<AgentContext> for EndNode {
    fn name(&self) -> &str {
        END
    }

    async fn prep(&self, ctx: &AgentContext, _params: &Params) -> Result<Value, FlowError> {
        Ok(Value::String(ctx.final_response.clone()))
    }

    async fn exec(&self, prep: Value, _params: &Params) -> Result<Value, FlowError> {
        Ok(prep)
    }

    async fn post(
        &self,
        ctx: &mut AgentContext,
        _prep: Value,
        _exec: Value,
        _params: &Params,
    ) -> Result<Action, FlowError> {
        tracing::debug!(iterations = ctx.iteration, "agent run finished");
        Ok(None)
    }
}
