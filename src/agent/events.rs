//! 运行事件：规划、工具执行、重规划、最终回复，以及模型调用的 start / token / end / error
//!
//! EventBus 基于 tokio broadcast，任意数量订阅者，可按事件种类过滤。发布从不阻塞、从不影响控制流：
//! 没有订阅者或订阅者落后时事件直接丢弃。

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;

pub const PLAN_STEP: &str = "plan:step";
pub const TOOL_EXECUTION: &str = "tool:execution";
pub const REPLAN_STEP: &str = "replan:step";
pub const FINAL_RESPONSE: &str = "final:response";
pub const LLM_START: &str = "llm:start";
pub const LLM_TOKEN: &str = "llm:token";
pub const LLM_END: &str = "llm:end";
pub const LLM_ERROR: &str = "llm:error";

const DEFAULT_CAPACITY: usize = 256;

/// 事件内容（可序列化为 JSON 供前端展示）
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    PlanStep {
        iteration: usize,
        plan: String,
        needs_tools: bool,
    },
    ToolExecution {
        id: Option<String>,
        name: String,
        arguments: serde_json::Value,
        result: String,
        success: bool,
    },
    ReplanStep {
        iteration: usize,
        decision: String,
        plan: String,
    },
    FinalResponse {
        response: String,
    },
    /// stage 为发起调用的节点名（plan / execute / replan / respond）
    LlmStart {
        stage: String,
    },
    LlmToken {
        stage: String,
        token: String,
    },
    LlmEnd {
        stage: String,
        chars: usize,
    },
    LlmError {
        stage: String,
        error: String,
    },
}

impl AgentEvent {
    /// 事件种类名，如 `plan:step`
    pub fn kind(&self) -> &'static str {
        match self {
            AgentEvent::PlanStep { .. } => PLAN_STEP,
            AgentEvent::ToolExecution { .. } => TOOL_EXECUTION,
            AgentEvent::ReplanStep { .. } => REPLAN_STEP,
            AgentEvent::FinalResponse { .. } => FINAL_RESPONSE,
            AgentEvent::LlmStart { .. } => LLM_START,
            AgentEvent::LlmToken { .. } => LLM_TOKEN,
            AgentEvent::LlmEnd { .. } => LLM_END,
            AgentEvent::LlmError { .. } => LLM_ERROR,
        }
    }
}

/// 带运行标识与时间戳的事件
#[derive(Debug, Clone, Serialize)]
pub struct EventRecord {
    pub run_id: String,
    pub at: DateTime<Utc>,
    #[serde(flatten)]
    pub event: AgentEvent,
}

impl EventRecord {
    pub fn kind(&self) -> &'static str {
        self.event.kind()
    }
}

/// 事件总线
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<EventRecord>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// 发布事件；没有订阅者时静默丢弃
    pub fn publish(&self, run_id: &str, event: AgentEvent) {
        let record = EventRecord {
            run_id: run_id.to_string(),
            at: Utc::now(),
            event,
        };
        let _ = self.tx.send(record);
    }

    /// 订阅全部事件
    pub fn subscribe(&self) -> EventSubscriber {
        EventSubscriber {
            rx: self.tx.subscribe(),
            kinds: None,
        }
    }

    /// 只订阅指定种类的事件
    pub fn subscribe_kinds(&self, kinds: &[&str]) -> EventSubscriber {
        EventSubscriber {
            rx: self.tx.subscribe(),
            kinds: Some(kinds.iter().map(|k| k.to_string()).collect()),
        }
    }
}

/// 订阅端
pub struct EventSubscriber {
    rx: broadcast::Receiver<EventRecord>,
    kinds: Option<HashSet<String>>,
}

impl EventSubscriber {
    fn accepts(&self, record: &EventRecord) -> bool {
        self.kinds
            .as_ref()
            .map_or(true, |kinds| kinds.contains(record.kind()))
    }

    /// 等待下一条匹配的事件；总线关闭后返回 None
    pub async fn recv(&mut self) -> Option<EventRecord> {
        loop {
            match self.rx.recv().await {
                Ok(record) if self.accepts(&record) => return Some(record),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "event subscriber lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// 非阻塞地取出当前已缓冲的所有匹配事件
    pub fn drain(&mut self) -> Vec<EventRecord> {
        let mut out = Vec::new();
        loop {
            match self.rx.try_recv() {
                Ok(record) => {
                    if self.accepts(&record) {
                        out.push(record);
                    }
                }
                Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "event subscriber lagged");
                }
                Err(_) => return out,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_publish_without_subscribers_is_silent() {
        let bus = EventBus::default();
        bus.publish("r1", AgentEvent::FinalResponse { response: "x".into() });
        // 之后订阅的接收端看不到早先的事件
        let mut late = bus.subscribe();
        assert!(late.drain().is_empty());
    }

    #[tokio::test]
    async fn test_kind_filter() {
        let bus = EventBus::default();
        let mut all = bus.subscribe();
        let mut finals = bus.subscribe_kinds(&[FINAL_RESPONSE]);

        bus.publish("r1", AgentEvent::LlmStart { stage: "plan".into() });
        bus.publish("r1", AgentEvent::FinalResponse { response: "done".into() });

        assert_eq!(all.drain().len(), 2);
        let record = finals.recv().await.unwrap();
        assert_eq!(record.kind(), FINAL_RESPONSE);
        assert_eq!(record.run_id, "r1");
        assert!(finals.drain().is_empty());
    }

    #[test]
    fn test_record_serializes_flat() {
        let record = EventRecord {
            run_id: "r".into(),
            at: Utc::now(),
            event: AgentEvent::LlmToken {
                stage: "respond".into(),
                token: "hi".into(),
            },
        };
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["type"], "llm_token");
        assert_eq!(json["token"], "hi");
        assert_eq!(json["run_id"], "r");
    }
}
