//! Mock LLM 客户端（用于测试与本地演示，无需 API）
//!
//! 默认模式按 prompt 中的阶段标记给出固定格式的回复，能让 Plan → Execute → Tool-Execute → Replan → Respond
//! 在本地完整跑通（调用 echo 工具回显用户最后一条消息）；scripted 模式按顺序返回预设回复，用完后重复最后一条。

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::llm::LlmClient;
use crate::memory::{Message, Role};

/// Mock 客户端
#[derive(Debug, Default)]
pub struct MockLlmClient {
    script: Option<Mutex<VecDeque<String>>>,
    last: Mutex<Option<String>>,
    calls: AtomicUsize,
}

impl MockLlmClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// 按顺序返回给定回复，用完后重复最后一条
    pub fn scripted<I, S>(responses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            script: Some(Mutex::new(responses.into_iter().map(Into::into).collect())),
            last: Mutex::new(None),
            calls: AtomicUsize::new(0),
        }
    }

    /// 已被调用的次数
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn next_scripted(&self, script: &Mutex<VecDeque<String>>) -> Result<String, String> {
        let mut queue = script.lock().map_err(|e| e.to_string())?;
        let mut last = self.last.lock().map_err(|e| e.to_string())?;
        match queue.pop_front() {
            Some(next) => {
                *last = Some(next.clone());
                Ok(next)
            }
            None => last
                .clone()
                .ok_or_else(|| "mock script is empty".to_string()),
        }
    }
}

/// 默认模式：根据 system prompt 中的阶段标记构造回复
fn staged_reply(messages: &[Message]) -> String {
    let system = messages
        .iter()
        .filter(|m| m.role == Role::System)
        .map(|m| m.content.as_str())
        .collect::<Vec<_>>()
        .join("\n");
    let last_user = messages
        .iter()
        .rev()
        .find(|m| m.role == Role::User)
        .map(|m| m.content.as_str())
        .unwrap_or("(no input)");

    if system.contains("NEEDS_TOOLS") {
        "PLAN: echo the request back with the echo tool\nNEEDS_TOOLS: YES".to_string()
    } else if system.contains("\"tool_calls\"") {
        serde_json::json!({
            "tool_calls": [
                { "name": "echo", "arguments": { "text": format!("Echo from Mock: {}", last_user) } }
            ]
        })
        .to_string()
    } else if system.contains("DECISION") {
        "DECISION: RESPOND\nPLAN: the echo result answers the request".to_string()
    } else {
        format!("Echo from Mock: {}", last_user)
    }
}

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(&self, messages: &[Message]) -> Result<String, String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.script {
            Some(script) => self.next_scripted(script),
            None => Ok(staged_reply(messages)),
        }
    }
}
