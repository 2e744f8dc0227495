//! 编排器错误类型
//!
//! 只有 Command 执行失败可以在流程内恢复（通过重规划），它不是错误而是 `ExecutionStatus::Failure`；
//! 这里列出的每一种错误都会终止当前 Job。

use thiserror::Error;

/// 编排过程中可能出现的错误（校验、契约、前置条件、LLM、持久化等）
#[derive(Error, Debug)]
pub enum AgentError {
    /// 协作方返回的数据格式不合法（LLM 输出无法解析、候选列表为空等）
    #[error("Validation error: {0}")]
    Validation(String),

    /// 注册阶段出现重名 Command
    #[error("Command '{0}' is already registered; command names must be unique")]
    DuplicateCommand(String),

    /// Planner 生成了注册表中不存在的 Command
    #[error("Unknown command: {0}")]
    UnknownCommand(String),

    /// ExecutionMemory 的调用方违反了约定（非法状态迁移、执行结束时状态不是终态等）
    #[error("Contract violation: {0}")]
    ContractViolation(String),

    /// Task 声明需要的环境知识不存在
    #[error("Precondition failed for task #{task_sequence}: required {kind} '{name}' is unknown")]
    Precondition {
        task_sequence: u32,
        kind: &'static str,
        name: String,
    },

    /// 重规划次数超过配置的上限
    #[error("Replanning limit exceeded at {level} level ({limit} attempts)")]
    ReplanLimitExceeded { level: &'static str, limit: u32 },

    #[error("LLM error: {0}")]
    Llm(String),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Config error: {0}")]
    Config(String),
}

impl AgentError {
    /// 错误分类名，写入 Trace 的 metadata 与审计日志
    pub fn kind(&self) -> &'static str {
        match self {
            AgentError::Validation(_) | AgentError::DuplicateCommand(_) => "validation",
            AgentError::UnknownCommand(_) => "unknown_command",
            AgentError::ContractViolation(_) => "contract_violation",
            AgentError::Precondition { .. } => "precondition",
            AgentError::ReplanLimitExceeded { .. } => "replan_limit",
            AgentError::Llm(_) => "llm",
            AgentError::Persistence(_) => "persistence",
            AgentError::Config(_) => "config",
        }
    }

    /// 是否终止当前 Job；Command 失败走重规划而不是错误，所以这里的每一种都是致命的
    pub fn is_fatal(&self) -> bool {
        true
    }
}

impl From<rusqlite::Error> for AgentError {
    fn from(e: rusqlite::Error) -> Self {
        AgentError::Persistence(e.to_string())
    }
}

impl From<serde_json::Error> for AgentError {
    fn from(e: serde_json::Error) -> Self {
        AgentError::Persistence(format!("serialization failed: {e}"))
    }
}

impl From<config::ConfigError> for AgentError {
    fn from(e: config::ConfigError) -> Self {
        AgentError::Config(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_precondition_message_names_the_missing_fact() {
        let err = AgentError::Precondition {
            task_sequence: 2,
            kind: "location",
            name: "kitchen".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("#2"));
        assert!(msg.contains("kitchen"));
        assert_eq!(err.kind(), "precondition");
    }

    #[test]
    fn test_duplicate_is_a_validation_error() {
        let err = AgentError::DuplicateCommand("move".to_string());
        assert_eq!(err.kind(), "validation");
        assert!(err.to_string().contains("move"));
        assert!(err.is_fatal());
    }
}
