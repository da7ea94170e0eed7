//! 模型输出解析：计划标记、工具调用 JSON、重规划决策
//!
//! 工具调用解析返回显式的 ParseOutcome，不依赖异常控制流；解析失败由 Execute 降级为「无工具」。

use std::sync::OnceLock;

use regex::Regex;
use serde_json::Value;

use crate::agent::state::ToolCall;

/// 工具调用解析结果
#[derive(Debug, Clone, PartialEq)]
pub enum ParseOutcome {
    Parsed(Vec<ToolCall>),
    Failed(String),
}

impl ParseOutcome {
    /// 解析失败时退化为空列表
    pub fn into_calls(self) -> Vec<ToolCall> {
        match self {
            ParseOutcome::Parsed(calls) => calls,
            ParseOutcome::Failed(_) => Vec::new(),
        }
    }
}

/// Plan 阶段的解析结果
#[derive(Debug, Clone, PartialEq)]
pub struct PlanStep {
    pub plan: String,
    pub needs_tools: bool,
}

/// Replan 阶段的决策
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Continue,
    Respond,
}

/// Replan 阶段的解析结果
#[derive(Debug, Clone, PartialEq)]
pub struct ReplanStep {
    pub decision: Decision,
    /// 模型给出的新计划；未给出时为 None
    pub plan: Option<String>,
}

static PLAN_RE: OnceLock<Regex> = OnceLock::new();
static MARKER_LINE_RE: OnceLock<Regex> = OnceLock::new();
static NEEDS_TOOLS_RE: OnceLock<Regex> = OnceLock::new();
static DECISION_RE: OnceLock<Regex> = OnceLock::new();
static FENCE_RE: OnceLock<Regex> = OnceLock::new();

fn cached<'a>(cell: &'a OnceLock<Regex>, pattern: &str) -> &'a Regex {
    cell.get_or_init(|| Regex::new(pattern).expect("static regex"))
}

/// 提取 `PLAN:` 之后的内容，直到下一个 `KEY:` 标记行
fn extract_plan(text: &str) -> Option<String> {
    let re = cached(&PLAN_RE, r"(?is)\bPLAN:\s*(.*?)(?:\n\s*(?:NEEDS_TOOLS|DECISION)\s*:|\z)");
    re.captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim().to_string())
        .filter(|s| !s.is_empty())
}

/// 去掉所有标记行后剩余的文本
fn strip_markers(text: &str) -> String {
    let re = cached(&MARKER_LINE_RE, r"(?im)^\s*(NEEDS_TOOLS|DECISION)\s*:.*$");
    re.replace_all(text, "").trim().to_string()
}

/// 解析 Plan 输出：`PLAN: ...` 与 `NEEDS_TOOLS: YES|NO`；缺少标记视为不需要工具
pub fn parse_plan(text: &str) -> PlanStep {
    let re = cached(&NEEDS_TOOLS_RE, r"(?i)NEEDS_TOOLS\s*:\s*(YES|NO|TRUE|FALSE)");
    let needs_tools = re
        .captures(text)
        .and_then(|c| c.get(1))
        .map(|m| matches!(m.as_str().to_ascii_uppercase().as_str(), "YES" | "TRUE"))
        .unwrap_or(false);
    let plan = extract_plan(text).unwrap_or_else(|| strip_markers(text));
    PlanStep { plan, needs_tools }
}

/// 解析 Replan 输出：`DECISION: CONTINUE|RESPOND` 与可选 `PLAN: ...`；缺少决策视为 RESPOND
pub fn parse_replan(text: &str) -> ReplanStep {
    let re = cached(&DECISION_RE, r"(?i)DECISION\s*:\s*(CONTINUE|RESPOND)");
    let decision = match re
        .captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_ascii_uppercase())
    {
        Some(d) if d == "CONTINUE" => Decision::Continue,
        _ => Decision::Respond,
    };
    ReplanStep {
        decision,
        plan: extract_plan(text),
    }
}

/// 去掉 ``` 代码围栏与 // 、/* */ 注释（字符串字面量内的内容保留）
fn strip_fences_and_comments(text: &str) -> String {
    let fence = cached(&FENCE_RE, r"(?m)^\s*```[A-Za-z0-9_-]*\s*$");
    let text = fence.replace_all(text, "");

    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(chars.len());
    let mut i = 0;
    let mut in_string = false;
    while i < chars.len() {
        let c = chars[i];
        if in_string {
            out.push(c);
            if c == '\\' && i + 1 < chars.len() {
                out.push(chars[i + 1]);
                i += 2;
                continue;
            }
            if c == '"' {
                in_string = false;
            }
            i += 1;
            continue;
        }
        match (c, chars.get(i + 1)) {
            ('"', _) => {
                in_string = true;
                out.push(c);
                i += 1;
            }
            ('/', Some('/')) => {
                while i < chars.len() && chars[i] != '\n' {
                    i += 1;
                }
            }
            ('/', Some('*')) => {
                i += 2;
                while i + 1 < chars.len() && !(chars[i] == '*' && chars[i + 1] == '/') {
                    i += 1;
                }
                i += 2;
            }
            _ => {
                out.push(c);
                i += 1;
            }
        }
    }
    out
}

fn call_from_value(value: &Value) -> Option<ToolCall> {
    let name = value
        .get("name")
        .or_else(|| value.get("tool"))
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())?;
    let arguments = value
        .get("arguments")
        .or_else(|| value.get("args"))
        .cloned()
        .unwrap_or_else(|| Value::Object(Default::default()));
    // 部分模型把 arguments 输出为 JSON 字符串
    let arguments = match arguments {
        Value::String(s) => serde_json::from_str(&s).unwrap_or(Value::String(s)),
        other => other,
    };
    let id = value
        .get("id")
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| format!("call_{}", uuid::Uuid::new_v4().simple()));
    Some(ToolCall {
        name: name.to_string(),
        arguments,
        id: Some(id),
    })
}

/// 解析 Execute 输出中的 `{"tool_calls": [...]}`
///
/// 容忍代码围栏、注释与 JSON 前后的说明文字；也接受裸数组或单个 `{"name": ..}` 对象。
pub fn parse_tool_calls(text: &str) -> ParseOutcome {
    let cleaned = strip_fences_and_comments(text);
    let span = |open: char, close: char| match (cleaned.find(open), cleaned.rfind(close)) {
        (Some(s), Some(e)) if e > s => Some(&cleaned[s..=e]),
        _ => None,
    };
    let json = match span('{', '}').or_else(|| span('[', ']')) {
        Some(json) => json,
        None => return ParseOutcome::Failed("no JSON object in model output".to_string()),
    };

    let value: Value = match serde_json::from_str(json) {
        Ok(v) => v,
        Err(e) => return ParseOutcome::Failed(format!("invalid tool call JSON: {}", e)),
    };

    let entries = match &value {
        Value::Object(map) => match map.get("tool_calls") {
            Some(Value::Array(items)) => items.clone(),
            Some(Value::Null) => Vec::new(),
            Some(_) => return ParseOutcome::Failed("tool_calls is not an array".to_string()),
            None if map.contains_key("name") || map.contains_key("tool") => vec![value.clone()],
            None => return ParseOutcome::Failed("missing tool_calls field".to_string()),
        },
        Value::Array(items) => items.clone(),
        _ => return ParseOutcome::Failed("tool call JSON is not an object".to_string()),
    };

    let calls: Vec<ToolCall> = entries.iter().filter_map(call_from_value).collect();
    if calls.len() < entries.len() {
        tracing::debug!(
            dropped = entries.len() - calls.len(),
            "tool call entries without a name were skipped"
        );
    }
    ParseOutcome::Parsed(calls)
}
