//! bee-flow 命令行入口
//!
//! 用法：`bee-flow [--config <path>] <query...>`
//! 加载配置、初始化日志、按配置构建智能体（内置 echo / calculator 工具），对 query 跑一次控制循环，
//! 以 JSON 打印 output 与 metadata；运行事件写入日志。

use std::path::PathBuf;

use anyhow::Context;
use bee_flow::agent::{AgentBuilder, InvokeOptions};
use bee_flow::config::{load_config, AppConfig};
use bee_flow::observability;

fn parse_args() -> (Option<PathBuf>, String) {
    let mut config_path = None;
    let mut words = Vec::new();
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        if arg == "--config" {
            config_path = args.next().map(PathBuf::from);
        } else {
            words.push(arg);
        }
    }
    (config_path, words.join(" "))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    observability::init();

    let (config_path, query) = parse_args();
    if query.trim().is_empty() {
        anyhow::bail!("usage: bee-flow [--config <path>] <query...>");
    }

    let config = load_config(config_path).unwrap_or_else(|e| {
        tracing::warn!("Failed to load config, using defaults: {}", e);
        AppConfig::default()
    });

    let agent = AgentBuilder::new(config)
        .build()
        .context("Failed to build agent")?;

    let mut events = agent.subscribe();
    let event_log = tokio::spawn(async move {
        while let Some(record) = events.recv().await {
            let line = serde_json::to_string(&record).unwrap_or_default();
            tracing::info!(kind = record.kind(), event = %line, "agent event");
        }
    });

    let result = agent
        .invoke(query.as_str(), InvokeOptions::default())
        .await
        .context("Agent run failed")?;

    println!(
        "{}",
        serde_json::to_string_pretty(&result).context("Failed to serialize output")?
    );

    drop(agent);
    let _ = event_log.await;
    Ok(())
}
