//! 后继图
//!
//! 节点存放在 arena（Vec）中，用 NodeId 下标引用；每个节点有一张「动作标签 -> NodeId」的后继表。
//! 允许自环与回边，图不是 DAG。

use std::collections::HashMap;
use std::sync::Arc;

use crate::core::FlowError;
use crate::workflow::node::Node;
use crate::workflow::types::{NodeId, DEFAULT_ACTION};

struct NodeEntry<C> {
    node: Arc<dyn Node<C>>,
    successors: HashMap<String, NodeId>,
}

/// 节点 arena + 后继表
pub struct Graph<C> {
    nodes: Vec<NodeEntry<C>>,
}

impl<C> Default for Graph<C>
where
    C: Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<C> Graph<C>
where
    C: Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self { nodes: Vec::new() }
    }

    /// 添加节点，返回其 NodeId
    pub fn add_node(&mut self, node: impl Node<C> + 'static) -> NodeId {
        self.add_shared(Arc::new(node))
    }

    /// 添加共享节点（同一个节点实例可以出现在多张图中）
    pub fn add_shared(&mut self, node: Arc<dyn Node<C>>) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(NodeEntry {
            node,
            successors: HashMap::new(),
        });
        id
    }

    /// 注册后继：from 在 post 返回 action 时跳到 to；同一标签重复注册时覆盖并告警
    pub fn connect(
        &mut self,
        from: NodeId,
        action: impl Into<String>,
        to: NodeId,
    ) -> Result<(), FlowError> {
        self.check(to)?;
        let action = action.into();
        let entry = self
            .nodes
            .get_mut(from.0)
            .ok_or_else(|| FlowError::NodeNotFound(from.to_string()))?;
        if let Some(prev) = entry.successors.insert(action.clone(), to) {
            tracing::warn!(
                node = entry.node.name(),
                action = %action,
                previous = %prev,
                "overwriting successor"
            );
        }
        Ok(())
    }

    /// 注册默认后继（post 返回 None 或空标签时使用）
    pub fn connect_default(&mut self, from: NodeId, to: NodeId) -> Result<(), FlowError> {
        self.connect(from, DEFAULT_ACTION, to)
    }

    pub fn node(&self, id: NodeId) -> Result<&Arc<dyn Node<C>>, FlowError> {
        self.nodes
            .get(id.0)
            .map(|e| &e.node)
            .ok_or_else(|| FlowError::NodeNotFound(id.to_string()))
    }

    /// 按动作标签查后继；None 或空字符串回退到默认标签
    pub fn successor(&self, id: NodeId, action: Option<&str>) -> Option<NodeId> {
        let label = match action {
            Some(a) if !a.is_empty() => a,
            _ => DEFAULT_ACTION,
        };
        self.nodes.get(id.0)?.successors.get(label).copied()
    }

    /// 节点已注册的动作标签（排序后返回，便于日志与测试）
    pub fn actions(&self, id: NodeId) -> Vec<String> {
        let mut actions: Vec<String> = self
            .nodes
            .get(id.0)
            .map(|e| e.successors.keys().cloned().collect())
            .unwrap_or_default();
        actions.sort();
        actions
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    fn check(&self, id: NodeId) -> Result<(), FlowError> {
        if id.0 < self.nodes.len() {
            Ok(())
        } else {
            Err(FlowError::NodeNotFound(id.to_string()))
        }
    }
}
