//! 批处理变体
//!
//! - [`BatchNode`] / [`ParallelBatchNode`]：包装一个节点，prep 产出条目集合，exec 对每个条目各跑一次
//!   （各自带重试与 fallback），结果按输入顺序收集后交给 post。任一条目最终失败则整批失败，post 不执行。
//! - [`BatchFlow`] / [`ParallelBatchFlow`]：驱动节点的 prep 产出一组参数集，内部流程对每个参数集跑一遍，
//!   驱动节点的 post 在全部跑完后执行一次。
//!
//! 并行版本在同一个任务上用 join_all 协作式并发，等待全部结束后再判断成败；结果顺序始终与输入一致。

use async_trait::async_trait;
use futures_util::future::join_all;
use futures_util::stream::{self, StreamExt};
use serde_json::Value;

use crate::core::FlowError;
use crate::workflow::engine::Flow;
use crate::workflow::node::{exec_with_retry, Node};
use crate::workflow::retry::RetryPolicy;
use crate::workflow::types::{batch_items, merge_params, Action, ForkJoin, Params};

/// 把条目按 size 切块，每块是一个 JSON 数组；size 为 0 时按 1 处理
pub fn chunk_items(items: &[Value], size: usize) -> Vec<Value> {
    items
        .chunks(size.max(1))
        .map(|c| Value::Array(c.to_vec()))
        .collect()
}

/// 按输入顺序收集结果，遇到第一个失败的条目（按下标）返回错误
fn collect_in_order<T>(outcomes: Vec<Result<T, FlowError>>) -> Result<Vec<T>, FlowError> {
    let mut results = Vec::with_capacity(outcomes.len());
    for (index, outcome) in outcomes.into_iter().enumerate() {
        match outcome {
            Ok(v) => results.push(v),
            Err(e) => {
                return Err(FlowError::BatchItemFailed {
                    index,
                    source: Box::new(e),
                })
            }
        }
    }
    Ok(results)
}

/// 把驱动节点 prep 的结果解释为参数集列表；每个条目必须是 JSON 对象
fn param_sets(prep: &Value) -> Result<Vec<Params>, FlowError> {
    batch_items(prep)
        .into_iter()
        .enumerate()
        .map(|(index, item)| match item {
            Value::Object(map) => Ok(map.into_iter().collect()),
            other => Err(FlowError::node(format!(
                "batch flow param set {} is not an object: {}",
                index, other
            ))),
        })
        .collect()
}

fn action_value(action: Action) -> Value {
    action.map(Value::String).unwrap_or(Value::Null)
}

/// 顺序批处理节点
pub struct BatchNode<N> {
    inner: N,
}

impl<N> BatchNode<N> {
    pub fn new(inner: N) -> Self {
        Self { inner }
    }

    pub fn inner(&self) -> &N {
        &self.inner
    }
}

#[async_trait]
impl<C, N> Node<C> for BatchNode<N>
where
    C: Send + Sync + 'static,
    N: Node<C>,
{
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn retry_policy(&self) -> RetryPolicy {
        self.inner.retry_policy()
    }

    async fn run(&self, ctx: &mut C, params: &Params) -> Result<Action, FlowError> {
        let prep = self.inner.prep(ctx, params).await?;
        let items = batch_items(&prep);
        tracing::debug!(node = self.inner.name(), items = items.len(), "batch start");

        let mut results = Vec::with_capacity(items.len());
        for (index, item) in items.iter().enumerate() {
            let value = exec_with_retry::<C, N>(&self.inner, item, params)
                .await
                .map_err(|e| FlowError::BatchItemFailed {
                    index,
                    source: Box::new(e),
                })?;
            results.push(value);
        }

        self.inner
            .post(ctx, prep, Value::Array(results), params)
            .await
    }
}

/// 并行批处理节点；默认不限并发，可用 with_concurrency_limit 限制同时在途的条目数
pub struct ParallelBatchNode<N> {
    inner: N,
    concurrency: Option<usize>,
}

impl<N> ParallelBatchNode<N> {
    pub fn new(inner: N) -> Self {
        Self {
            inner,
            concurrency: None,
        }
    }

    pub fn with_concurrency_limit(mut self, limit: usize) -> Self {
        self.concurrency = Some(limit.max(1));
        self
    }

    /// 与 with_concurrency_limit 相同，但 None 表示不限
    pub fn with_optional_limit(mut self, limit: Option<usize>) -> Self {
        self.concurrency = limit.map(|l| l.max(1));
        self
    }

    pub fn inner(&self) -> &N {
        &self.inner
    }
}

#[async_trait]
impl<C, N> Node<C> for ParallelBatchNode<N>
where
    C: Send + Sync + 'static,
    N: Node<C>,
{
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn retry_policy(&self) -> RetryPolicy {
        self.inner.retry_policy()
    }

    async fn run(&self, ctx: &mut C, params: &Params) -> Result<Action, FlowError> {
        let prep = self.inner.prep(ctx, params).await?;
        let items = batch_items(&prep);
        tracing::debug!(
            node = self.inner.name(),
            items = items.len(),
            limit = ?self.concurrency,
            "parallel batch start"
        );

        let futures = items
            .iter()
            .map(|item| exec_with_retry::<C, N>(&self.inner, item, params))
            .collect::<Vec<_>>();
        let outcomes: Vec<Result<Value, FlowError>> = match self.concurrency {
            Some(limit) => stream::iter(futures).buffered(limit).collect().await,
            None => join_all(futures).await,
        };
        let results = collect_in_order(outcomes)?;

        self.inner
            .post(ctx, prep, Value::Array(results), params)
            .await
    }
}

/// 顺序批量流程：对驱动节点 prep 产出的每个参数集，把内部流程完整跑一遍
pub struct BatchFlow<C, N> {
    driver: N,
    flow: Flow<C>,
}

impl<C, N> BatchFlow<C, N>
where
    C: Send + Sync + 'static,
    N: Node<C>,
{
    pub fn new(driver: N, flow: Flow<C>) -> Self {
        Self { driver, flow }
    }
}

#[async_trait]
impl<C, N> Node<C> for BatchFlow<C, N>
where
    C: Send + Sync + 'static,
    N: Node<C>,
{
    fn name(&self) -> &str {
        self.driver.name()
    }

    async fn run(&self, ctx: &mut C, params: &Params) -> Result<Action, FlowError> {
        let prep = self.driver.prep(ctx, params).await?;
        let sets = param_sets(&prep)?;
        let base = merge_params(self.flow.params(), params);

        let mut actions = Vec::with_capacity(sets.len());
        for (index, set) in sets.iter().enumerate() {
            let merged = merge_params(&base, set);
            let action = self
                .flow
                .orchestrate(ctx, &merged)
                .await
                .map_err(|e| FlowError::BatchItemFailed {
                    index,
                    source: Box::new(e),
                })?;
            actions.push(action_value(action));
        }

        self.driver
            .post(ctx, prep, Value::Array(actions), params)
            .await
    }
}

/// 并行批量流程：每个参数集在上下文的一份 fork 上并发运行，全部成功后按输入顺序 join 回主上下文
pub struct ParallelBatchFlow<C, N> {
    driver: N,
    flow: Flow<C>,
    concurrency: Option<usize>,
}

impl<C, N> ParallelBatchFlow<C, N>
where
    C: ForkJoin + 'static,
    N: Node<C>,
{
    pub fn new(driver: N, flow: Flow<C>) -> Self {
        Self {
            driver,
            flow,
            concurrency: None,
        }
    }

    pub fn with_concurrency_limit(mut self, limit: usize) -> Self {
        self.concurrency = Some(limit.max(1));
        self
    }
}

#[async_trait]
impl<C, N> Node<C> for ParallelBatchFlow<C, N>
where
    C: ForkJoin + 'static,
    N: Node<C>,
{
    fn name(&self) -> &str {
        self.driver.name()
    }

    async fn run(&self, ctx: &mut C, params: &Params) -> Result<Action, FlowError> {
        let prep = self.driver.prep(ctx, params).await?;
        let sets = param_sets(&prep)?;
        let base = merge_params(self.flow.params(), params);

        let flow = &self.flow;
        let futures = sets
            .iter()
            .map(|set| {
                let merged = merge_params(&base, set);
                let mut branch = ctx.fork();
                async move {
                    let action = flow.orchestrate(&mut branch, &merged).await?;
                    Ok::<_, FlowError>((branch, action))
                }
            })
            .collect::<Vec<_>>();
        let outcomes: Vec<Result<(C, Action), FlowError>> = match self.concurrency {
            Some(limit) => stream::iter(futures).buffered(limit).collect().await,
            None => join_all(futures).await,
        };
        let finished = collect_in_order(outcomes)?;

        let mut actions = Vec::with_capacity(finished.len());
        for (branch, action) in finished {
            ctx.join(branch);
            actions.push(action_value(action));
        }

        self.driver
            .post(ctx, prep, Value::Array(actions), params)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::Graph;
    use serde_json::json;
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::{Duration, Instant};

    #[derive(Default, Clone, Debug)]
    struct Ctx {
        numbers: Vec<i64>,
        results: Option<Vec<i64>>,
        posted: usize,
        per_key: BTreeMap<String, i64>,
    }

    impl ForkJoin for Ctx {
        fn join(&mut self, branch: Self) {
            for (k, v) in branch.per_key {
                self.per_key.insert(k, v);
            }
        }
    }

    /// prep 把 numbers 按 chunk 切块，exec 对块求和
    struct ChunkSum {
        chunk: usize,
    }

    #[async_trait]
    impl Node<Ctx> for ChunkSum {
        fn name(&self) -> &str {
            "chunk_sum"
        }

        async fn prep(&self, ctx: &Ctx, _params: &Params) -> Result<Value, FlowError> {
            let items: Vec<Value> = ctx.numbers.iter().map(|n| json!(n)).collect();
            Ok(Value::Array(chunk_items(&items, self.chunk)))
        }

        async fn exec(&self, prep: Value, _params: &Params) -> Result<Value, FlowError> {
            let sum: i64 = prep
                .as_array()
                .map(|a| a.iter().filter_map(|v| v.as_i64()).sum())
                .unwrap_or(0);
            Ok(json!(sum))
        }

        async fn post(
            &self,
            ctx: &mut Ctx,
            _prep: Value,
            exec: Value,
            _params: &Params,
        ) -> Result<Action, FlowError> {
            ctx.results = serde_json::from_value(exec)?;
            ctx.posted += 1;
            Ok(None)
        }
    }

    /// 每个条目休眠 delay 后翻倍；fail_on 指定的条目总是失败
    struct SlowDouble {
        delay: Duration,
        fail_on: Option<i64>,
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    impl SlowDouble {
        fn new(delay: Duration, fail_on: Option<i64>) -> Self {
            Self {
                delay,
                fail_on,
                in_flight: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl Node<Ctx> for SlowDouble {
        fn name(&self) -> &str {
            "slow_double"
        }

        async fn prep(&self, ctx: &Ctx, _params: &Params) -> Result<Value, FlowError> {
            Ok(json!(ctx.numbers))
        }

        async fn exec(&self, prep: Value, _params: &Params) -> Result<Value, FlowError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            let n = prep.as_i64().unwrap_or(0);
            if Some(n) == self.fail_on {
                return Err(FlowError::node(format!("item {} failed", n)));
            }
            Ok(json!(n * 2))
        }

        async fn post(
            &self,
            ctx: &mut Ctx,
            _prep: Value,
            exec: Value,
            _params: &Params,
        ) -> Result<Action, FlowError> {
            ctx.results = serde_json::from_value(exec)?;
            ctx.posted += 1;
            Ok(None)
        }
    }

    #[tokio::test]
    async fn test_chunked_batch_sums() {
        let node = BatchNode::new(ChunkSum { chunk: 10 });
        let mut ctx = Ctx {
            numbers: (0..25).collect(),
            ..Default::default()
        };
        node.run(&mut ctx, &Params::new()).await.unwrap();
        assert_eq!(ctx.results, Some(vec![45, 145, 110]));
    }

    #[test]
    fn test_chunk_items_concatenation() {
        for n in 0..30usize {
            for k in 1..7usize {
                let items: Vec<Value> = (0..n).map(|i| json!(i)).collect();
                let chunks = chunk_items(&items, k);
                assert_eq!(chunks.len(), (n + k - 1) / k);
                let flat: Vec<Value> = chunks
                    .iter()
                    .flat_map(|c| c.as_array().cloned().unwrap_or_default())
                    .collect();
                assert_eq!(flat, items);
            }
        }
    }

    #[tokio::test]
    async fn test_parallel_batch_is_concurrent_and_ordered() {
        let node = ParallelBatchNode::new(SlowDouble::new(Duration::from_millis(100), None));
        let mut ctx = Ctx {
            numbers: vec![0, 1, 2, 3, 4],
            ..Default::default()
        };
        let started = Instant::now();
        node.run(&mut ctx, &Params::new()).await.unwrap();
        assert!(started.elapsed() < Duration::from_millis(200));
        assert_eq!(ctx.results, Some(vec![0, 2, 4, 6, 8]));
        assert_eq!(node.inner().peak.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn test_parallel_batch_respects_limit() {
        let node = ParallelBatchNode::new(SlowDouble::new(Duration::from_millis(20), None))
            .with_concurrency_limit(2);
        let mut ctx = Ctx {
            numbers: vec![5, 4, 3, 2, 1, 0],
            ..Default::default()
        };
        node.run(&mut ctx, &Params::new()).await.unwrap();
        assert_eq!(ctx.results, Some(vec![10, 8, 6, 4, 2, 0]));
        assert!(node.inner().peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_sequential_batch_fails_fast() {
        let node = BatchNode::new(SlowDouble::new(Duration::from_millis(1), Some(2)));
        let mut ctx = Ctx {
            numbers: vec![0, 1, 2, 3],
            ..Default::default()
        };
        let err = node.run(&mut ctx, &Params::new()).await.unwrap_err();
        assert!(matches!(err, FlowError::BatchItemFailed { index: 2, .. }));
        assert_eq!(ctx.posted, 0);
        assert!(ctx.results.is_none());
    }

    #[tokio::test]
    async fn test_parallel_batch_fails_after_all_finish() {
        let node = ParallelBatchNode::new(SlowDouble::new(Duration::from_millis(10), Some(3)));
        let mut ctx = Ctx {
            numbers: vec![0, 1, 2, 3, 4],
            ..Default::default()
        };
        let err = node.run(&mut ctx, &Params::new()).await.unwrap_err();
        assert!(matches!(err, FlowError::BatchItemFailed { index: 3, .. }));
        assert_eq!(ctx.posted, 0);
        assert_eq!(node.inner().in_flight.load(Ordering::SeqCst), 0);
    }

    /// 驱动节点：为每个 key 产出一个参数集，post 记录内部流程的动作
    struct KeysDriver {
        keys: Vec<&'static str>,
    }

    #[async_trait]
    impl Node<Ctx> for KeysDriver {
        fn name(&self) -> &str {
            "keys_driver"
        }

        async fn prep(&self, _ctx: &Ctx, _params: &Params) -> Result<Value, FlowError> {
            Ok(Value::Array(
                self.keys.iter().map(|k| json!({ "key": k })).collect(),
            ))
        }

        async fn post(
            &self,
            ctx: &mut Ctx,
            _prep: Value,
            exec: Value,
            _params: &Params,
        ) -> Result<Action, FlowError> {
            ctx.posted += exec.as_array().map(|a| a.len()).unwrap_or(0);
            Ok(None)
        }
    }

    /// 内部节点：把 key 的长度乘以 factor 写进 per_key[key]；key 为 "boom" 时失败
    struct WriteKey;

    #[async_trait]
    impl Node<Ctx> for WriteKey {
        fn name(&self) -> &str {
            "write_key"
        }

        async fn exec(&self, _prep: Value, params: &Params) -> Result<Value, FlowError> {
            tokio::time::sleep(Duration::from_millis(50)).await;
            let key = params.get("key").and_then(|v| v.as_str()).unwrap_or("");
            if key == "boom" {
                return Err(FlowError::node("cannot write boom"));
            }
            let factor = params.get("factor").and_then(|v| v.as_i64()).unwrap_or(1);
            Ok(json!({ "key": key, "value": key.len() as i64 * factor }))
        }

        async fn post(
            &self,
            ctx: &mut Ctx,
            _prep: Value,
            exec: Value,
            _params: &Params,
        ) -> Result<Action, FlowError> {
            let key = exec["key"].as_str().unwrap_or("").to_string();
            ctx.per_key.insert(key, exec["value"].as_i64().unwrap_or(0));
            Ok(Some("written".to_string()))
        }
    }

    fn inner_flow() -> Flow<Ctx> {
        let mut graph = Graph::new();
        let w = graph.add_node(WriteKey);
        Flow::new(graph, w).with_param("factor", json!(1))
    }

    #[tokio::test]
    async fn test_batch_flow_runs_inner_flow_per_param_set() {
        let batch = BatchFlow::new(
            KeysDriver {
                keys: vec!["a", "bb", "ccc"],
            },
            inner_flow(),
        );
        let mut params = Params::new();
        params.insert("factor".into(), json!(10));
        let mut ctx = Ctx::default();
        batch.run(&mut ctx, &params).await.unwrap();

        assert_eq!(ctx.per_key.get("a"), Some(&10));
        assert_eq!(ctx.per_key.get("bb"), Some(&20));
        assert_eq!(ctx.per_key.get("ccc"), Some(&30));
        assert_eq!(ctx.posted, 3);
    }

    #[tokio::test]
    async fn test_parallel_batch_flow_merges_branches() {
        let batch = ParallelBatchFlow::new(
            KeysDriver {
                keys: vec!["x", "yy", "zzz", "wwww"],
            },
            inner_flow(),
        );
        let mut ctx = Ctx::default();
        let started = Instant::now();
        batch.run(&mut ctx, &Params::new()).await.unwrap();

        assert!(started.elapsed() < Duration::from_millis(150));
        assert_eq!(ctx.per_key.len(), 4);
        assert_eq!(ctx.per_key.get("wwww"), Some(&4));
        assert_eq!(ctx.posted, 4);
    }

    #[tokio::test]
    async fn test_batch_flow_rejects_non_object_param_set() {
        struct BadDriver;

        #[async_trait]
        impl Node<Ctx> for BadDriver {
            fn name(&self) -> &str {
                "bad_driver"
            }

            async fn prep(&self, _ctx: &Ctx, _params: &Params) -> Result<Value, FlowError> {
                Ok(json!([1, 2]))
            }
        }

        let batch = BatchFlow::new(BadDriver, inner_flow());
        let mut ctx = Ctx::default();
        assert!(batch.run(&mut ctx, &Params::new()).await.is_err());
        assert!(ctx.per_key.is_empty());
    }

    #[tokio::test]
    async fn test_batch_flow_fails_fast_on_inner_failure() {
        let batch = BatchFlow::new(
            KeysDriver {
                keys: vec!["a", "boom", "ccc"],
            },
            inner_flow(),
        );
        let mut ctx = Ctx::default();
        let err = batch.run(&mut ctx, &Params::new()).await.unwrap_err();

        assert!(matches!(err, FlowError::BatchItemFailed { index: 1, .. }));
        assert_eq!(ctx.posted, 0);
        // 失败之前的运行已写入上下文，之后的不再运行
        assert_eq!(ctx.per_key.get("a"), Some(&1));
        assert!(!ctx.per_key.contains_key("ccc"));
    }

    #[tokio::test]
    async fn test_parallel_batch_flow_joins_nothing_on_failure() {
        let batch = ParallelBatchFlow::new(
            KeysDriver {
                keys: vec!["x", "boom", "zzz"],
            },
            inner_flow(),
        );
        let mut ctx = Ctx::default();
        let err = batch.run(&mut ctx, &Params::new()).await.unwrap_err();

        assert!(matches!(err, FlowError::BatchItemFailed { index: 1, .. }));
        assert_eq!(ctx.posted, 0);
        assert!(ctx.per_key.is_empty());
    }
}
