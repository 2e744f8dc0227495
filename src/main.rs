//! robo-planner：把一条自然语言指令分解为 Task / Command 并在模拟机器人上执行
//!
//! 用法：`robo-planner [--config path.toml] <instruction...>`
//! 入口：加载配置、初始化日志、装配 Orchestrator，运行一个 Job 并以 JSON 打印报告。

use std::path::PathBuf;

use anyhow::Context;
use robo_planner::config::{load_config, AppConfig};
use robo_planner::core::OrchestratorBuilder;
use robo_planner::observability;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 日志：默认 info，可通过 RUST_LOG 覆盖
    observability::init();

    let mut args = std::env::args().skip(1).peekable();
    let mut config_path = None;
    if args.peek().map(String::as_str) == Some("--config") {
        args.next();
        config_path = Some(PathBuf::from(
            args.next().context("--config requires a file path")?,
        ));
    }
    let instruction = args.collect::<Vec<_>>().join(" ");
    let instruction = if instruction.trim().is_empty() {
        "Go to the kitchen and tell me what you find there.".to_string()
    } else {
        instruction
    };

    let cfg = load_config(config_path).unwrap_or_else(|e| {
        tracing::warn!("Config load failed ({}), using defaults", e);
        AppConfig::default()
    });

    let mut orchestrator = OrchestratorBuilder::new(cfg)
        .build()
        .context("Failed to build orchestrator")?;

    let report = orchestrator
        .process(&instruction, None)
        .await
        .context("Job failed")?;

    println!(
        "{}",
        serde_json::to_string_pretty(&report).context("Failed to serialize report")?
    );
    Ok(())
}
