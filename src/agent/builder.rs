//! Agent 构建器：按配置装配 LLM、工具、事件总线与控制循环

use std::sync::Arc;

use crate::agent::controller::{agent_flow_definition, agent_node_registry, PlanningAgent};
use crate::agent::events::EventBus;
use crate::agent::model::ModelCaller;
use crate::agent::nodes::AgentServices;
use crate::config::AppConfig;
use crate::core::FlowError;
use crate::llm::{create_llm_from_config, LlmClient};
use crate::tools::{CalculatorTool, EchoTool, ToolExecutor, ToolRegistry};

/// Agent 构建器：未显式提供的组件按配置创建
pub struct AgentBuilder {
    config: AppConfig,
    llm: Option<Arc<dyn LlmClient>>,
    tools: Option<ToolRegistry>,
    events: Option<EventBus>,
}

impl AgentBuilder {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config,
            llm: None,
            tools: None,
            events: None,
        }
    }

    /// 使用给定的 LLM 客户端，而不是按 [llm] 创建
    pub fn with_llm(mut self, llm: Arc<dyn LlmClient>) -> Self {
        self.llm = Some(llm);
        self
    }

    /// 使用给定的工具表，而不是内置的 echo / calculator
    pub fn with_tools(mut self, tools: ToolRegistry) -> Self {
        self.tools = Some(tools);
        self
    }

    pub fn with_event_bus(mut self, events: EventBus) -> Self {
        self.events = Some(events);
        self
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.agent.system_prompt = Some(prompt.into());
        self
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.config.agent.max_iterations = max_iterations;
        self
    }

    /// 内置工具表
    pub fn build_tool_registry() -> ToolRegistry {
        let mut tools = ToolRegistry::new();
        tools.register(EchoTool);
        tools.register(CalculatorTool);
        tools
    }

    /// 构建智能体；provider 缺少 API Key 等配置问题在这里返回 Config 错误
    pub fn build(self) -> Result<PlanningAgent, FlowError> {
        let llm = match self.llm {
            Some(llm) => llm,
            None => create_llm_from_config(&self.config.llm)?,
        };
        let tools = self.tools.unwrap_or_else(Self::build_tool_registry);
        let events = self.events.unwrap_or_default();
        let agent = &self.config.agent;

        let tool_concurrency = if agent.tool_concurrency > 0 {
            Some(agent.tool_concurrency)
        } else {
            self.config.flow.max_concurrency
        };

        let services = Arc::new(AgentServices {
            model: ModelCaller::new(llm, events.clone(), agent.stream_tokens),
            tools: Arc::new(ToolExecutor::new(tools, self.config.tools.tool_timeout_secs)),
            events,
            system_prompt: agent.system_prompt.clone(),
            llm_retry: self.config.llm.retry_policy(),
            tool_retry: self.config.flow.default_retry_policy(),
        });

        let flow = agent_node_registry(services.clone())
            .build(&agent_flow_definition(tool_concurrency))?;
        tracing::info!(
            tools = ?services.tools.tool_names(),
            max_iterations = agent.max_iterations,
            tool_concurrency = ?tool_concurrency,
            "planning agent built"
        );
        Ok(PlanningAgent::new(flow, services, agent.max_iterations))
    }
}
