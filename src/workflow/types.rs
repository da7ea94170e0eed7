//! 工作流类型定义
//!
//! 节点标识、动作标签、运行参数（Params）与并行分支的上下文分叉/合并约定。

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// 运行参数：由父级编排器在运行子节点/子流程前注入，子节点只读
pub type Params = BTreeMap<String, Value>;

/// post 返回的动作标签；None 表示「没有显式后继」，编排器会回退到 [`DEFAULT_ACTION`]
pub type Action = Option<String>;

/// 默认动作标签
pub const DEFAULT_ACTION: &str = "default";

/// 图中节点的索引（arena 下标）
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub(crate) usize);

impl NodeId {
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// 并行批量流程的上下文约定：每个并发分支拿到一份 fork，全部成功后按输入顺序 join 回主上下文。
///
/// 各分支写入的部分应互不重叠（例如按参数里的 id 分片），join 负责把分支自己的那一片合并回来。
pub trait ForkJoin: Clone + Send + Sync {
    /// 为一个并发分支复制上下文
    fn fork(&self) -> Self {
        self.clone()
    }

    /// 合并分支运行后的上下文
    fn join(&mut self, branch: Self);
}

/// 将 `overlay` 覆盖合并到 `base` 之上（同名键以 overlay 为准）
pub fn merge_params(base: &Params, overlay: &Params) -> Params {
    let mut merged = base.clone();
    for (k, v) in overlay {
        merged.insert(k.clone(), v.clone());
    }
    merged
}

/// 把 prep 的结果解释为批处理条目：数组逐项展开，null 视为空，其它值视为单个条目
pub fn batch_items(prep: &Value) -> Vec<Value> {
    match prep {
        Value::Array(items) => items.clone(),
        Value::Null => Vec::new(),
        other => vec![other.clone()],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_merge_params_overlay_wins() {
        let mut base = Params::new();
        base.insert("a".into(), json!(1));
        base.insert("b".into(), json!(2));
        let mut overlay = Params::new();
        overlay.insert("b".into(), json!(20));
        overlay.insert("c".into(), json!(30));

        let merged = merge_params(&base, &overlay);
        assert_eq!(merged.get("a"), Some(&json!(1)));
        assert_eq!(merged.get("b"), Some(&json!(20)));
        assert_eq!(merged.get("c"), Some(&json!(30)));
        // base 不被修改
        assert_eq!(base.get("b"), Some(&json!(2)));
    }

    #[test]
    fn test_batch_items_shapes() {
        assert_eq!(batch_items(&json!([1, 2, 3])).len(), 3);
        assert!(batch_items(&Value::Null).is_empty());
        assert_eq!(batch_items(&json!("one")), vec![json!("one")]);
    }
}
