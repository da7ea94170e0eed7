//! 工具调用 JSON Schema 生成（schemars）
//!
//! 将「合法 tool_calls 信封」的 JSON 结构注入 Execute 阶段的 system prompt，减少 LLM 输出格式错误。

use schemars::{schema_for, JsonSchema};

/// 单个工具调用（仅用于 Schema 生成）
#[allow(dead_code)]
#[derive(JsonSchema)]
struct ToolCallFormat {
    /// 工具名，须为已注册工具之一
    pub name: String,
    /// 工具参数对象，结构见对应工具的 parameters
    pub arguments: serde_json::Map<String, serde_json::Value>,
    /// 可选调用 ID；缺省时由执行方生成
    pub id: Option<String>,
}

/// 工具调用信封：{"tool_calls": [...]}，空数组表示无需工具
#[allow(dead_code)]
#[derive(JsonSchema)]
struct ToolCallEnvelope {
    pub tool_calls: Vec<ToolCallFormat>,
}

/// 返回工具调用信封的 JSON Schema 字符串，可拼入 system prompt
pub fn tool_call_schema_json() -> String {
    let schema = schema_for!(ToolCallEnvelope);
    serde_json::to_string_pretty(&schema).unwrap_or_default()
}
