//! 节点注册表与流程定义构建
//!
//! NodeRegistry 把「节点种类字符串」映射到构造函数；新增节点种类只需注册构造函数。
//! FlowDefinition 描述节点（id + kind + config）与边（from --action--> to），
//! 通过注册表实例化为可运行的 Flow。

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::FlowError;
use crate::workflow::engine::Flow;
use crate::workflow::graph::Graph;
use crate::workflow::node::Node;
use crate::workflow::types::{NodeId, Params, DEFAULT_ACTION};

/// 节点构造函数：根据节点配置构造节点实例
pub type NodeConstructor<C> =
    Arc<dyn Fn(&Value) -> Result<Arc<dyn Node<C>>, FlowError> + Send + Sync>;

/// 节点种类注册表
pub struct NodeRegistry<C> {
    constructors: HashMap<String, NodeConstructor<C>>,
}

impl<C> Default for NodeRegistry<C>
where
    C: Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<C> NodeRegistry<C>
where
    C: Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            constructors: HashMap::new(),
        }
    }

    /// 注册节点种类；同名种类会被覆盖
    pub fn register<F>(&mut self, kind: impl Into<String>, constructor: F)
    where
        F: Fn(&Value) -> Result<Arc<dyn Node<C>>, FlowError> + Send + Sync + 'static,
    {
        let kind = kind.into();
        if self
            .constructors
            .insert(kind.clone(), Arc::new(constructor))
            .is_some()
        {
            tracing::warn!(kind = %kind, "node kind re-registered");
        }
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.constructors.contains_key(kind)
    }

    pub fn kinds(&self) -> Vec<String> {
        let mut kinds: Vec<String> = self.constructors.keys().cloned().collect();
        kinds.sort();
        kinds
    }

    /// 按种类构造节点
    pub fn create(&self, kind: &str, config: &Value) -> Result<Arc<dyn Node<C>>, FlowError> {
        let constructor = self
            .constructors
            .get(kind)
            .ok_or_else(|| FlowError::UnknownNodeKind(kind.to_string()))?;
        constructor(config)
    }

    /// 按定义构建流程；定义错误（重复 id、未知节点引用）以 Config 错误返回
    pub fn build(&self, definition: &FlowDefinition) -> Result<Flow<C>, FlowError> {
        let mut graph = Graph::new();
        let mut ids: HashMap<&str, NodeId> = HashMap::new();

        for node in &definition.nodes {
            if ids.contains_key(node.id.as_str()) {
                return Err(FlowError::Config(format!(
                    "flow '{}': duplicate node id '{}'",
                    definition.name, node.id
                )));
            }
            let instance = self.create(&node.kind, &node.config)?;
            ids.insert(node.id.as_str(), graph.add_shared(instance));
        }

        let lookup = |id: &str| {
            ids.get(id).copied().ok_or_else(|| {
                FlowError::Config(format!(
                    "flow '{}': unknown node id '{}'",
                    definition.name, id
                ))
            })
        };

        for edge in &definition.edges {
            let from = lookup(&edge.from)?;
            let to = lookup(&edge.to)?;
            graph.connect(from, edge.action.clone(), to)?;
        }

        let start = lookup(&definition.start)?;
        tracing::debug!(
            flow = %definition.name,
            nodes = definition.nodes.len(),
            edges = definition.edges.len(),
            "flow built"
        );
        Ok(Flow::new(graph, start)
            .with_name(definition.name.clone())
            .with_params(definition.params.clone()))
    }
}

/// 节点定义
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeDefinition {
    pub id: String,
    pub kind: String,
    #[serde(default)]
    pub config: Value,
}

/// 边定义：from 的 post 返回 action 时跳到 to
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EdgeDefinition {
    pub from: String,
    #[serde(default = "default_action")]
    pub action: String,
    pub to: String,
}

fn default_action() -> String {
    DEFAULT_ACTION.to_string()
}

/// 流程定义
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowDefinition {
    pub name: String,
    pub start: String,
    pub nodes: Vec<NodeDefinition>,
    #[serde(default)]
    pub edges: Vec<EdgeDefinition>,
    #[serde(default)]
    pub params: Params,
}

impl FlowDefinition {
    pub fn new(name: impl Into<String>, start: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            start: start.into(),
            nodes: Vec::new(),
            edges: Vec::new(),
            params: Params::new(),
        }
    }

    /// 添加节点
    pub fn node(mut self, id: impl Into<String>, kind: impl Into<String>, config: Value) -> Self {
        self.nodes.push(NodeDefinition {
            id: id.into(),
            kind: kind.into(),
            config,
        });
        self
    }

    /// 添加带标签的边
    pub fn edge(
        mut self,
        from: impl Into<String>,
        action: impl Into<String>,
        to: impl Into<String>,
    ) -> Self {
        self.edges.push(EdgeDefinition {
            from: from.into(),
            action: action.into(),
            to: to.into(),
        });
        self
    }

    /// 添加默认边
    pub fn default_edge(self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.edge(from, DEFAULT_ACTION, to)
    }

    pub fn param(mut self, key: impl Into<String>, value: Value) -> Self {
        self.params.insert(key.into(), value);
        self
    }
}
