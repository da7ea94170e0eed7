//! 工作单元（Node）：prep -> exec -> post 三阶段生命周期
//!
//! - prep 只读共享上下文，产出 exec 的输入
//! - exec 不接触上下文，是唯一会被重试的阶段；重试耗尽后交给 exec_fallback
//! - post 是唯一可写上下文的阶段，返回动作标签供编排器选择后继
//!
//! 阶段之间用 serde_json::Value 传递，这样不同种类的节点可以放进同一张图，批处理条目也能统一展开。

use async_trait::async_trait;
use serde_json::Value;

use crate::core::FlowError;
use crate::workflow::retry::RetryPolicy;
use crate::workflow::types::{Action, Params};

/// 工作单元 trait。`C` 为共享上下文类型。
#[async_trait]
pub trait Node<C>: Send + Sync
where
    C: Send + Sync + 'static,
{
    /// 节点名（日志与错误信息使用）
    fn name(&self) -> &str;

    /// exec 的重试策略，默认只尝试一次
    fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::None
    }

    async fn prep(&self, _ctx: &C, _params: &Params) -> Result<Value, FlowError> {
        Ok(Value::Null)
    }

    async fn exec(&self, _prep: Value, _params: &Params) -> Result<Value, FlowError> {
        Ok(Value::Null)
    }

    /// 所有尝试失败后的兜底；默认把错误原样抛给编排器
    async fn exec_fallback(
        &self,
        _prep: Value,
        _params: &Params,
        err: FlowError,
    ) -> Result<Value, FlowError> {
        Err(err)
    }

    async fn post(
        &self,
        _ctx: &mut C,
        _prep: Value,
        _exec: Value,
        _params: &Params,
    ) -> Result<Action, FlowError> {
        Ok(None)
    }

    /// 跑完整的一次生命周期。Flow / Batch 等复合节点覆盖此方法。
    async fn run(&self, ctx: &mut C, params: &Params) -> Result<Action, FlowError> {
        run_node(self, ctx, params).await
    }
}

/// 单节点生命周期：prep、带重试的 exec、post
pub async fn run_node<C, N>(node: &N, ctx: &mut C, params: &Params) -> Result<Action, FlowError>
where
    C: Send + Sync + 'static,
    N: Node<C> + ?Sized,
{
    let prep = node.prep(ctx, params).await?;
    let exec = exec_with_retry::<C, N>(node, &prep, params).await?;
    let action = node.post(ctx, prep, exec, params).await?;
    tracing::debug!(node = node.name(), action = ?action, "node finished");
    Ok(action)
}

/// 按节点的重试策略执行 exec；全部失败后调用 exec_fallback，fallback 也失败则包装为 ExecFailed
pub async fn exec_with_retry<C, N>(
    node: &N,
    prep: &Value,
    params: &Params,
) -> Result<Value, FlowError>
where
    C: Send + Sync + 'static,
    N: Node<C> + ?Sized,
{
    let policy = node.retry_policy();
    let max_attempts = policy.max_attempts();
    let mut attempt = 0;

    loop {
        attempt += 1;
        match node.exec(prep.clone(), params).await {
            Ok(value) => return Ok(value),
            Err(e) if policy.should_retry(attempt) => {
                let delay = policy.delay(attempt);
                tracing::warn!(
                    node = node.name(),
                    attempt,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "exec failed, retrying"
                );
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
            }
            Err(e) => {
                tracing::warn!(node = node.name(), attempt, error = %e, "exec exhausted retries");
                return node
                    .exec_fallback(prep.clone(), params, e)
                    .await
                    .map_err(|source| FlowError::ExecFailed {
                        node: node.name().to_string(),
                        attempts: attempt,
                        source: Box::new(source),
                    });
            }
        }
    }
}
