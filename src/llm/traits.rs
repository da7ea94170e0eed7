//! LLM 客户端抽象
//!
//! 所有后端（OpenAI 兼容 / DeepSeek / Mock）实现 LlmClient：complete（非流式）、complete_stream（流式 Token）。
//! TimeoutLlmClient 为任意后端的每次调用加超时，超时视为该次调用失败（交由节点的重试策略处理）。

use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::Stream;

use crate::memory::Message;

/// 超时错误文本中的标记；TimeoutLlmClient 产出，调用方据此把失败归为超时
pub const TIMEOUT_MARKER: &str = "timed out";

/// 错误文本是否来自超时
pub fn is_timeout_error(err: &str) -> bool {
    err.contains(TIMEOUT_MARKER)
}

/// Token 流
pub type TokenStream = Pin<Box<dyn Stream<Item = Result<String, String>> + Send>>;

/// LLM 客户端 trait：非流式完成与流式完成（返回 Token 流）
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// 非流式完成
    async fn complete(&self, messages: &[Message]) -> Result<String, String>;

    /// 流式完成，返回 Token 流；默认把 complete 的结果作为单个 Token
    async fn complete_stream(&self, messages: &[Message]) -> Result<TokenStream, String> {
        let content = self.complete(messages).await?;
        Ok(Box::pin(futures_util::stream::iter(vec![Ok(content)])))
    }

    /// 获取累计 token 使用统计：(prompt_tokens, completion_tokens, total_tokens)
    /// 默认返回 (0, 0, 0)，具体实现可覆盖
    fn token_usage(&self) -> (u64, u64, u64) {
        (0, 0, 0)
    }
}

/// 为内部客户端的 complete / complete_stream 建立连接阶段加超时
pub struct TimeoutLlmClient {
    inner: Arc<dyn LlmClient>,
    timeout: Duration,
}

impl TimeoutLlmClient {
    pub fn new(inner: Arc<dyn LlmClient>, timeout: Duration) -> Self {
        Self { inner, timeout }
    }
}

#[async_trait]
impl LlmClient for TimeoutLlmClient {
    async fn complete(&self, messages: &[Message]) -> Result<String, String> {
        match tokio::time::timeout(self.timeout, self.inner.complete(messages)).await {
            Ok(result) => result,
            Err(_) => Err(format!(
                "LLM request {} after {}s",
                TIMEOUT_MARKER,
                self.timeout.as_secs_f64()
            )),
        }
    }

    async fn complete_stream(&self, messages: &[Message]) -> Result<TokenStream, String> {
        match tokio::time::timeout(self.timeout, self.inner.complete_stream(messages)).await {
            Ok(result) => result,
            Err(_) => Err(format!(
                "LLM stream {} after {}s",
                TIMEOUT_MARKER,
                self.timeout.as_secs_f64()
            )),
        }
    }

    fn token_usage(&self) -> (u64, u64, u64) {
        self.inner.token_usage()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct SlowLlm(Duration);

    #[async_trait]
    impl LlmClient for SlowLlm {
        async fn complete(&self, _messages: &[Message]) -> Result<String, String> {
            tokio::time::sleep(self.0).await;
            Ok("late".to_string())
        }
    }

    #[tokio::test]
    async fn test_timeout_surfaces_as_failure() {
        let client = TimeoutLlmClient::new(
            Arc::new(SlowLlm(Duration::from_millis(200))),
            Duration::from_millis(20),
        );
        let err = client.complete(&[Message::user("hi")]).await.unwrap_err();
        assert!(is_timeout_error(&err));
    }

    #[tokio::test]
    async fn test_fast_call_passes_through() {
        let client = TimeoutLlmClient::new(
            Arc::new(SlowLlm(Duration::from_millis(1))),
            Duration::from_secs(1),
        );
        assert_eq!(client.complete(&[]).await.unwrap(), "late");
    }
}
