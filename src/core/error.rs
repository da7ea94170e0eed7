//! 引擎与智能体错误类型
//!
//! 只有致命错误（exec 重试耗尽且无 fallback、模型调用失败）与配置错误会传播给调用方；
//! 工具失败与解析失败在控制器内部被吸收，转成下一轮规划的上下文。

use thiserror::Error;

/// 节点执行、流程编排与智能体运行过程中可能出现的错误
#[derive(Error, Debug)]
pub enum FlowError {
    /// exec 阶段所有尝试均失败且 fallback 未给出结果
    #[error("Node '{node}' failed after {attempts} attempt(s): {source}")]
    ExecFailed {
        node: String,
        attempts: usize,
        #[source]
        source: Box<FlowError>,
    },

    /// 节点自身报告的失败（exec / prep / post 中的业务错误）
    #[error("Node error: {0}")]
    Node(String),

    #[error("LLM error: {0}")]
    Llm(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Tool execution failed: {0}")]
    ToolExecutionFailed(String),

    #[error("Tool timeout: {0}")]
    ToolTimeout(String),

    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    /// 批处理中某一项失败，index 为输入中的位置
    #[error("Batch item {index} failed: {source}")]
    BatchItemFailed {
        index: usize,
        #[source]
        source: Box<FlowError>,
    },

    #[error("Node not found: {0}")]
    NodeNotFound(String),

    #[error("Unknown node kind: {0}")]
    UnknownNodeKind(String),

    #[error("Step limit exceeded: {0}")]
    StepLimitExceeded(usize),

    #[error("Cancelled")]
    Cancelled,

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("Config error: {0}")]
    Config(String),
}

impl FlowError {
    /// 便捷构造节点错误
    pub fn node(msg: impl Into<String>) -> Self {
        FlowError::Node(msg.into())
    }

    /// 是否为配置类错误（运行开始前即失败）
    pub fn is_config(&self) -> bool {
        matches!(self, FlowError::Config(_) | FlowError::UnknownNodeKind(_))
    }
}

impl From<config::ConfigError> for FlowError {
    fn from(e: config::ConfigError) -> Self {
        FlowError::Config(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exec_failed_message_includes_source() {
        let err = FlowError::ExecFailed {
            node: "plan".to_string(),
            attempts: 3,
            source: Box::new(FlowError::Llm("rate limited".to_string())),
        };
        let msg = err.to_string();
        assert!(msg.contains("plan"));
        assert!(msg.contains("3 attempt"));
        assert!(msg.contains("rate limited"));
    }

    #[test]
    fn test_config_classification() {
        assert!(FlowError::Config("missing key".into()).is_config());
        assert!(FlowError::UnknownNodeKind("x".into()).is_config());
        assert!(!FlowError::Cancelled.is_config());
    }
}
