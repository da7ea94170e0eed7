//! 按配置创建 LLM 客户端
//!
//! provider 为 openai / deepseek 时必须能读到 API Key，否则在任何运行开始前返回 Config 错误；
//! 所有真实后端都包一层 TimeoutLlmClient。

use std::sync::Arc;
use std::time::Duration;

use crate::config::LlmSection;
use crate::core::FlowError;
use crate::llm::{create_deepseek_client, LlmClient, MockLlmClient, OpenAiClient, TimeoutLlmClient};

const DEFAULT_OPENAI_MODEL: &str = "gpt-4o-mini";

/// 读取 API Key：显式配置的环境变量名优先，否则用 provider 对应的默认变量名
fn api_key(section: &LlmSection, default_env: &str) -> Result<String, FlowError> {
    let env_name = section.api_key_env.as_deref().unwrap_or(default_env);
    match std::env::var(env_name) {
        Ok(key) if !key.trim().is_empty() => Ok(key),
        _ => Err(FlowError::Config(format!(
            "LLM provider '{}' requires environment variable {}",
            section.provider, env_name
        ))),
    }
}

/// 根据 [llm] 配置创建客户端
pub fn create_llm_from_config(section: &LlmSection) -> Result<Arc<dyn LlmClient>, FlowError> {
    let timeout = Duration::from_secs(section.timeouts.request.max(1));
    let provider = section.provider.to_lowercase();

    let client: Arc<dyn LlmClient> = match provider.as_str() {
        "mock" => {
            tracing::warn!("Using Mock LLM");
            return Ok(Arc::new(MockLlmClient::new()));
        }
        "deepseek" => {
            let key = api_key(section, "DEEPSEEK_API_KEY")?;
            let client = create_deepseek_client(section.model.as_deref(), &key);
            tracing::info!("Using DeepSeek LLM ({})", client.model());
            Arc::new(client)
        }
        "openai" => {
            let key = api_key(section, "OPENAI_API_KEY")?;
            let model = section.model.as_deref().unwrap_or(DEFAULT_OPENAI_MODEL);
            tracing::info!("Using OpenAI LLM ({})", model);
            Arc::new(OpenAiClient::new(section.base_url.as_deref(), model, &key))
        }
        other => {
            return Err(FlowError::Config(format!("unknown LLM provider '{}'", other)));
        }
    };

    Ok(Arc::new(TimeoutLlmClient::new(client, timeout)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_provider_needs_no_key() {
        let section = LlmSection::default();
        assert!(create_llm_from_config(&section).is_ok());
    }

    #[test]
    fn test_missing_key_is_config_error() {
        let section = LlmSection {
            provider: "openai".to_string(),
            api_key_env: Some("BEEFLOW_TEST_KEY_THAT_IS_NEVER_SET".to_string()),
            ..LlmSection::default()
        };
        let err = create_llm_from_config(&section).err().unwrap();
        assert!(err.is_config());
        assert!(err.to_string().contains("BEEFLOW_TEST_KEY_THAT_IS_NEVER_SET"));
    }

    #[test]
    fn test_unknown_provider() {
        let section = LlmSection {
            provider: "carrier-pigeon".to_string(),
            ..LlmSection::default()
        };
        assert!(create_llm_from_config(&section).err().unwrap().is_config());
    }
}
