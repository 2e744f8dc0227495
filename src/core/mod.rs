//! 核心编排层：错误分类、编排阶段、Orchestrator 主控循环与构建器

pub mod builder;
pub mod error;
pub mod orchestrator;
pub mod state;

pub use builder::OrchestratorBuilder;
pub use error::AgentError;
pub use orchestrator::{JobReport, Orchestrator, ReplanLimits, TaskCallback};
pub use state::{JobPhase, TaskPhase};
