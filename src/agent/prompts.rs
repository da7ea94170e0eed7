//! 各阶段的 prompt 拼装
//!
//! 每个阶段一条 system 消息（可选的自定义前缀 + 阶段指令），后接对话历史。
//! 阶段指令中的标记（NEEDS_TOOLS / "tool_calls" / DECISION）与 parse 模块的解析规则一一对应。

use crate::agent::state::ToolResult;
use crate::memory::Message;
use crate::tools::{tool_call_schema_json, ToolDescriptor};

fn system_message(prefix: Option<&str>, body: String) -> Message {
    match prefix.map(str::trim).filter(|p| !p.is_empty()) {
        Some(prefix) => Message::system(format!("{}\n\n{}", prefix, body)),
        None => Message::system(body),
    }
}

fn with_history(system: Message, history: &[Message]) -> Vec<Message> {
    let mut messages = Vec::with_capacity(history.len() + 1);
    messages.push(system);
    messages.extend(history.iter().filter(|m| m.role != crate::memory::Role::System).cloned());
    messages
}

fn tool_list(tools: &[ToolDescriptor]) -> String {
    if tools.is_empty() {
        return "(none)".to_string();
    }
    tools
        .iter()
        .map(|t| format!("- {}: {}", t.name, t.description))
        .collect::<Vec<_>>()
        .join("\n")
}

/// 工具结果渲染为文本，失败的调用带 FAILED 标记
pub fn render_results(results: &[ToolResult]) -> String {
    if results.is_empty() {
        return "(no tool results)".to_string();
    }
    results
        .iter()
        .map(|r| {
            let status = if r.success { "ok" } else { "FAILED" };
            format!("[{}] {}: {}", status, r.name, r.result)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn plan(prefix: Option<&str>, tools: &[ToolDescriptor], history: &[Message]) -> Vec<Message> {
    let body = format!(
        "You are the planning step of a tool-using assistant.\n\
         Available tools:\n{}\n\n\
         Write a short numbered plan for answering the user's latest request and say whether \
         any tool is needed. Reply in exactly this format:\n\
         PLAN: <plan>\n\
         NEEDS_TOOLS: YES or NO",
        tool_list(tools)
    );
    with_history(system_message(prefix, body), history)
}

pub fn execute(
    prefix: Option<&str>,
    plan: &str,
    tools_schema: &str,
    history: &[Message],
) -> Vec<Message> {
    let body = format!(
        "You are the execution step of a tool-using assistant.\n\
         Current plan:\n{}\n\n\
         Registered tools with their parameter schemas:\n{}\n\n\
         Choose the tool calls that carry out the next part of the plan. Output only one JSON \
         object matching this schema:\n{}\n\
         Example: {{\"tool_calls\": [{{\"name\": \"echo\", \"arguments\": {{\"text\": \"hi\"}}}}]}}\n\
         Use an empty list when no tool is needed.",
        plan,
        tools_schema,
        tool_call_schema_json()
    );
    with_history(system_message(prefix, body), history)
}

pub fn replan(
    prefix: Option<&str>,
    plan: &str,
    results: &[ToolResult],
    history: &[Message],
) -> Vec<Message> {
    let body = format!(
        "You are the review step of a tool-using assistant.\n\
         Current plan:\n{}\n\n\
         Latest tool results:\n{}\n\n\
         Decide whether the results are enough to answer the user's latest request. \
         Reply in exactly this format:\n\
         DECISION: CONTINUE or RESPOND\n\
         PLAN: <updated plan>",
        plan,
        render_results(results)
    );
    with_history(system_message(prefix, body), history)
}

pub fn respond(
    prefix: Option<&str>,
    plan: &str,
    results: &[ToolResult],
    history: &[Message],
) -> Vec<Message> {
    let body = format!(
        "You are the final answer step of a tool-using assistant.\n\
         Plan that was followed:\n{}\n\n\
         Tool results:\n{}\n\n\
         Write the final answer to the user's latest request in plain language. If a tool \
         failed, say what could not be retrieved.",
        if plan.is_empty() { "(no plan)" } else { plan },
        render_results(results)
    );
    with_history(system_message(prefix, body), history)
}
