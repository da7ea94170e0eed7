//! 模型调用：在一次 LLM 调用前后发布 llm:start / llm:token / llm:end / llm:error
//!
//! 失败统一转为 FlowError（超时为 Timeout，其余为 Llm），交由调用节点的重试策略处理。

use std::sync::Arc;

use futures_util::StreamExt;

use crate::agent::events::{AgentEvent, EventBus};
use crate::core::FlowError;
use crate::llm::{is_timeout_error, LlmClient};
use crate::memory::Message;

pub struct ModelCaller {
    llm: Arc<dyn LlmClient>,
    events: EventBus,
    stream: bool,
}

impl ModelCaller {
    pub fn new(llm: Arc<dyn LlmClient>, events: EventBus, stream: bool) -> Self {
        Self {
            llm,
            events,
            stream,
        }
    }

    pub fn llm(&self) -> &Arc<dyn LlmClient> {
        &self.llm
    }

    /// 调用模型并返回完整文本；stage 为发起调用的节点名
    pub async fn call(
        &self,
        run_id: &str,
        stage: &str,
        messages: &[Message],
    ) -> Result<String, FlowError> {
        self.events.publish(
            run_id,
            AgentEvent::LlmStart {
                stage: stage.to_string(),
            },
        );
        tracing::debug!(stage, messages = messages.len(), "llm call");

        let result = if self.stream {
            self.call_streaming(run_id, stage, messages).await
        } else {
            self.llm.complete(messages).await
        };

        match result {
            Ok(text) => {
                self.events.publish(
                    run_id,
                    AgentEvent::LlmEnd {
                        stage: stage.to_string(),
                        chars: text.chars().count(),
                    },
                );
                Ok(text)
            }
            Err(e) => {
                tracing::warn!(stage, error = %e, "llm call failed");
                self.events.publish(
                    run_id,
                    AgentEvent::LlmError {
                        stage: stage.to_string(),
                        error: e.clone(),
                    },
                );
                if is_timeout_error(&e) {
                    Err(FlowError::Timeout(e))
                } else {
                    Err(FlowError::Llm(e))
                }
            }
        }
    }

    async fn call_streaming(
        &self,
        run_id: &str,
        stage: &str,
        messages: &[Message],
    ) -> Result<String, String> {
        let mut stream = self.llm.complete_stream(messages).await?;
        let mut text = String::new();
        while let Some(token) = stream.next().await {
            let token = token?;
            if token.is_empty() {
                continue;
            }
            self.events.publish(
                run_id,
                AgentEvent::LlmToken {
                    stage: stage.to_string(),
                    token: token.clone(),
                },
            );
            text.push_str(&token);
        }
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::events::{LLM_END, LLM_ERROR, LLM_START, LLM_TOKEN};
    use crate::llm::MockLlmClient;
    use async_trait::async_trait;

    struct FailingLlm;

    #[async_trait]
    impl LlmClient for FailingLlm {
        async fn complete(&self, _messages: &[Message]) -> Result<String, String> {
            Err("connection refused".to_string())
        }
    }

    #[tokio::test]
    async fn test_streaming_call_publishes_tokens() {
        let bus = EventBus::default();
        let mut sub = bus.subscribe();
        let caller = ModelCaller::new(Arc::new(MockLlmClient::scripted(["hello"])), bus, true);

        let text = caller.call("r", "respond", &[Message::user("hi")]).await.unwrap();
        assert_eq!(text, "hello");

        let kinds: Vec<&str> = sub.drain().iter().map(|r| r.kind()).collect();
        assert_eq!(kinds, vec![LLM_START, LLM_TOKEN, LLM_END]);
    }

    #[tokio::test]
    async fn test_failure_publishes_error() {
        let bus = EventBus::default();
        let mut sub = bus.subscribe_kinds(&[LLM_ERROR]);
        let caller = ModelCaller::new(Arc::new(FailingLlm), bus, false);

        let err = caller.call("r", "plan", &[]).await.unwrap_err();
        assert!(matches!(err, FlowError::Llm(_)));
        assert_eq!(sub.drain().len(), 1);
    }

    struct SlowLlm;

    #[async_trait]
    impl LlmClient for SlowLlm {
        async fn complete(&self, _messages: &[Message]) -> Result<String, String> {
            tokio::time::sleep(std::time::Duration::from_millis(200)).await;
            Ok("late".to_string())
        }
    }

    #[tokio::test]
    async fn test_timeout_is_classified_as_timeout() {
        let llm = crate::llm::TimeoutLlmClient::new(
            Arc::new(SlowLlm),
            std::time::Duration::from_millis(20),
        );
        let caller = ModelCaller::new(Arc::new(llm), EventBus::default(), false);

        let err = caller.call("r", "plan", &[]).await.unwrap_err();
        assert!(matches!(err, FlowError::Timeout(_)));
    }

    #[tokio::test]
    async fn test_plain_call_has_no_tokens() {
        let bus = EventBus::default();
        let mut sub = bus.subscribe();
        let caller = ModelCaller::new(Arc::new(MockLlmClient::scripted(["x"])), bus, false);
        caller.call("r", "plan", &[]).await.unwrap();
        let kinds: Vec<&str> = sub.drain().iter().map(|r| r.kind()).collect();
        assert_eq!(kinds, vec![LLM_START, LLM_END]);
    }
}
