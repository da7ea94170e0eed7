//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `BEEFLOW__*` 覆盖（双下划线表示嵌套，如 `BEEFLOW__LLM__PROVIDER=openai`）。

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::workflow::RetryPolicy;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub agent: AgentSection,
    pub llm: LlmSection,
    pub tools: ToolsSection,
    pub flow: FlowSection,
}

/// [agent] 段：迭代上限、工具并发、可选 system prompt
#[derive(Debug, Clone, Deserialize)]
pub struct AgentSection {
    /// Plan / Replan 的最大迭代次数（保证控制循环终止）
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,
    /// Tool-Execute 阶段同时执行的工具调用上限
    #[serde(default = "default_tool_concurrency")]
    pub tool_concurrency: usize,
    /// 追加到各阶段 prompt 前的系统提示
    pub system_prompt: Option<String>,
    /// 模型调用是否走流式接口（逐 Token 发布 llm:token 事件）
    #[serde(default)]
    pub stream_tokens: bool,
}

impl Default for AgentSection {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            tool_concurrency: default_tool_concurrency(),
            system_prompt: None,
            stream_tokens: false,
        }
    }
}

fn default_max_iterations() -> usize {
    5
}

fn default_tool_concurrency() -> usize {
    4
}

/// [llm] 段：后端选择、重试与超时
#[derive(Debug, Clone, Deserialize)]
pub struct LlmSection {
    /// 后端：mock / openai / deepseek
    #[serde(default = "default_provider")]
    pub provider: String,
    pub model: Option<String>,
    pub base_url: Option<String>,
    /// 读取 API Key 的环境变量名；未设置时按 provider 取 OPENAI_API_KEY / DEEPSEEK_API_KEY
    pub api_key_env: Option<String>,
    /// 单次模型调用的总尝试次数
    #[serde(default = "default_llm_max_attempts")]
    pub max_attempts: usize,
    #[serde(default = "default_retry_wait_ms")]
    pub retry_wait_ms: u64,
    #[serde(default)]
    pub timeouts: LlmTimeoutsSection,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            base_url: None,
            api_key_env: None,
            max_attempts: default_llm_max_attempts(),
            retry_wait_ms: default_retry_wait_ms(),
            timeouts: LlmTimeoutsSection::default(),
        }
    }
}

impl LlmSection {
    /// 模型调用节点使用的重试策略
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::fixed(self.max_attempts, Duration::from_millis(self.retry_wait_ms))
    }
}

fn default_provider() -> String {
    "mock".to_string()
}

fn default_llm_max_attempts() -> usize {
    2
}

fn default_retry_wait_ms() -> u64 {
    500
}

#[derive(Debug, Clone, Deserialize)]
pub struct LlmTimeoutsSection {
    #[serde(default = "default_request_timeout")]
    pub request: u64,
}

impl Default for LlmTimeoutsSection {
    fn default() -> Self {
        Self {
            request: default_request_timeout(),
        }
    }
}

fn default_request_timeout() -> u64 {
    60
}

/// [tools] 段：工具超时
#[derive(Debug, Clone, Deserialize)]
pub struct ToolsSection {
    /// 单次工具调用超时（秒）
    #[serde(default = "default_tool_timeout_secs")]
    pub tool_timeout_secs: u64,
}

impl Default for ToolsSection {
    fn default() -> Self {
        Self {
            tool_timeout_secs: default_tool_timeout_secs(),
        }
    }
}

fn default_tool_timeout_secs() -> u64 {
    30
}

/// [flow] 段：引擎默认值
#[derive(Debug, Clone, Deserialize)]
pub struct FlowSection {
    /// 并行批处理的并发上限；不设置表示不限
    pub max_concurrency: Option<usize>,
    #[serde(default = "default_flow_max_attempts")]
    pub default_max_attempts: usize,
    #[serde(default)]
    pub default_wait_ms: u64,
}

impl Default for FlowSection {
    fn default() -> Self {
        Self {
            max_concurrency: None,
            default_max_attempts: default_flow_max_attempts(),
            default_wait_ms: 0,
        }
    }
}

impl FlowSection {
    /// 未单独配置重试的节点使用的策略
    pub fn default_retry_policy(&self) -> RetryPolicy {
        if self.default_max_attempts <= 1 {
            RetryPolicy::None
        } else {
            RetryPolicy::fixed(
                self.default_max_attempts,
                Duration::from_millis(self.default_wait_ms),
            )
        }
    }
}

fn default_flow_max_attempts() -> usize {
    1
}

/// 从 config 目录加载配置，环境变量 BEEFLOW__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 BEEFLOW__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("BEEFLOW")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.agent.max_iterations, 5);
        assert_eq!(cfg.agent.tool_concurrency, 4);
        assert_eq!(cfg.llm.provider, "mock");
        assert_eq!(cfg.llm.retry_policy().max_attempts(), 2);
        assert_eq!(cfg.tools.tool_timeout_secs, 30);
        assert_eq!(cfg.flow.default_retry_policy(), RetryPolicy::None);
    }

    #[test]
    fn test_load_from_explicit_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "[agent]\nmax_iterations = 9\n\n[llm]\nprovider = \"deepseek\"\nmax_attempts = 4\n\n[flow]\nmax_concurrency = 3"
        )
        .unwrap();

        let cfg = load_config(Some(file.path().to_path_buf())).unwrap();
        assert_eq!(cfg.agent.max_iterations, 9);
        assert_eq!(cfg.agent.tool_concurrency, 4);
        assert_eq!(cfg.llm.provider, "deepseek");
        assert_eq!(cfg.llm.max_attempts, 4);
        assert_eq!(cfg.flow.max_concurrency, Some(3));
    }
}
