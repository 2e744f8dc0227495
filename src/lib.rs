//! robo-planner - LLM 驱动的机器人任务编排器
//!
//! 模块划分：
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误分类、编排阶段、Orchestrator 主控循环与构建器
//! - **observability**: 进程日志初始化与 EventTracer（层级化执行追踪、sink）
//! - **memory**: Job / Task / Command 记录、ExecutionMemory、机器人状态、SQLite 存储
//! - **commands**: RobotCommand、注册表、CommandGateway 与模拟的标准 Command
//! - **planning**: Planner / Evaluator、提示词、结构化输出解析
//! - **knowledge**: 已知地点与物体的检索
//! - **llm**: LLM 客户端抽象与实现（OpenAI 兼容 / Mock）及限流

pub mod commands;
pub mod config;
pub mod core;
pub mod knowledge;
pub mod llm;
pub mod memory;
pub mod observability;
pub mod planning;

pub use crate::core::{AgentError, JobReport, Orchestrator, OrchestratorBuilder};
