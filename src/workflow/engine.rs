//! 流程编排器（Flow）
//!
//! 从起始节点出发：注入参数 -> 跑节点生命周期 -> 按返回的动作标签查后继 -> 没有后继则结束。
//! 图允许环，编排器本身不保证终止；可选的步数上限与取消令牌只是兜底。
//! Flow 自身也实现 Node，可以作为一个节点嵌进更大的图里。

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::core::FlowError;
use crate::workflow::graph::Graph;
use crate::workflow::node::Node;
use crate::workflow::types::{merge_params, Action, NodeId, Params};

/// 流程：持有共享的图、起始节点与本次运行的只读参数
pub struct Flow<C> {
    name: String,
    graph: Arc<Graph<C>>,
    start: NodeId,
    params: Params,
    max_steps: Option<usize>,
    cancel_token: Option<CancellationToken>,
}

impl<C> Clone for Flow<C> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            graph: Arc::clone(&self.graph),
            start: self.start,
            params: self.params.clone(),
            max_steps: self.max_steps,
            cancel_token: self.cancel_token.clone(),
        }
    }
}

impl<C> Flow<C>
where
    C: Send + Sync + 'static,
{
    pub fn new(graph: impl Into<Arc<Graph<C>>>, start: NodeId) -> Self {
        Self {
            name: "flow".to_string(),
            graph: graph.into(),
            start,
            params: Params::new(),
            max_steps: None,
            cancel_token: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_params(mut self, params: Params) -> Self {
        self.params = params;
        self
    }

    pub fn with_param(mut self, key: impl Into<String>, value: Value) -> Self {
        self.params.insert(key.into(), value);
        self
    }

    /// 节点执行次数上限，超出返回 StepLimitExceeded
    pub fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = Some(max_steps);
        self
    }

    /// 每一步开始前检查取消令牌
    pub fn with_cancel_token(mut self, token: CancellationToken) -> Self {
        self.cancel_token = Some(token);
        self
    }

    pub fn params(&self) -> &Params {
        &self.params
    }

    pub fn graph(&self) -> &Arc<Graph<C>> {
        &self.graph
    }

    pub fn start(&self) -> NodeId {
        self.start
    }

    /// 以流程自身的参数运行到结束，返回最后一个节点的动作标签
    pub async fn run(&self, ctx: &mut C) -> Result<Action, FlowError> {
        self.orchestrate(ctx, &self.params).await
    }

    /// 以给定参数运行（批量流程为每个参数集调用）
    pub async fn orchestrate(&self, ctx: &mut C, params: &Params) -> Result<Action, FlowError> {
        let mut current = self.start;
        let mut steps = 0usize;

        loop {
            if let Some(token) = &self.cancel_token {
                if token.is_cancelled() {
                    tracing::info!(flow = %self.name, steps, "flow cancelled");
                    return Err(FlowError::Cancelled);
                }
            }
            if let Some(max) = self.max_steps {
                if steps >= max {
                    return Err(FlowError::StepLimitExceeded(max));
                }
            }
            steps += 1;

            let node = self.graph.node(current)?;
            tracing::debug!(flow = %self.name, node = node.name(), step = steps, "running node");
            let action = node.run(ctx, params).await?;

            match self.graph.successor(current, action.as_deref()) {
                Some(next) => current = next,
                None => {
                    let actions = self.graph.actions(current);
                    if !actions.is_empty() {
                        tracing::warn!(
                            flow = %self.name,
                            node = node.name(),
                            action = ?action,
                            registered = ?actions,
                            "flow ends: action has no successor"
                        );
                    }
                    tracing::info!(flow = %self.name, node = node.name(), steps, "flow finished");
                    return Ok(action);
                }
            }
        }
    }
}

#[async_trait]
impl<C> Node<C> for Flow<C>
where
    C: Send + Sync + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    /// 嵌套运行：父级注入的参数覆盖本流程的默认参数
    async fn run(&self, ctx: &mut C, params: &Params) -> Result<Action, FlowError> {
        let merged = merge_params(&self.params, params);
        self.orchestrate(ctx, &merged).await
    }
}
