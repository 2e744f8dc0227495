//! Evaluator：Command 失败后的重规划决策
//!
//! 返回按偏好排序的候选列表；Orchestrator 只使用第一个，完整列表写入 Trace。

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::core::AgentError;
use crate::llm::LlmClient;
use crate::memory::{Command, Task};
use crate::observability::EventTracer;
use crate::planning::parse::{parse_structured, schema_json};
use crate::planning::planner::traced_completion;
use crate::planning::prompt::{render, EVALUATE_FAILURE};

/// 重规划粒度
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ReplanLevel {
    /// 重新生成剩余的 Task
    Task,
    /// 在同一 Task 内重新生成 Command
    Command,
}

impl ReplanLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReplanLevel::Task => "task",
            ReplanLevel::Command => "command",
        }
    }
}

impl fmt::Display for ReplanLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 一个重规划候选
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ReplanDecision {
    #[serde(rename = "replanning_level")]
    pub level: ReplanLevel,
    pub cause: String,
    #[serde(default)]
    pub detail: String,
    #[serde(default)]
    pub solution: String,
    #[serde(default, rename = "failed_task_sequence_number")]
    pub failed_task_sequence: Option<u32>,
    #[serde(default, rename = "failed_command_sequence_number")]
    pub failed_command_sequence: Option<u32>,
}

impl ReplanDecision {
    pub fn new(level: ReplanLevel, cause: impl Into<String>) -> Self {
        Self {
            level,
            cause: cause.into(),
            detail: String::new(),
            solution: String::new(),
            failed_task_sequence: None,
            failed_command_sequence: None,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = detail.into();
        self
    }

    pub fn with_solution(mut self, solution: impl Into<String>) -> Self {
        self.solution = solution.into();
        self
    }
}

/// `{"candidates": [...]}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct EvaluationReport {
    pub candidates: Vec<ReplanDecision>,
}

#[async_trait]
pub trait Evaluator: Send + Sync {
    /// 对失败的 Command 给出按偏好排序的重规划候选（至少一个）
    async fn classify_failure(
        &self,
        task: &Task,
        command: &Command,
    ) -> Result<Vec<ReplanDecision>, AgentError>;
}

/// LLM 驱动的 Evaluator
pub struct LlmEvaluator {
    llm: Arc<dyn LlmClient>,
    tracer: Arc<EventTracer>,
}

impl LlmEvaluator {
    pub fn new(llm: Arc<dyn LlmClient>, tracer: Arc<EventTracer>) -> Self {
        Self { llm, tracer }
    }

    fn build_prompt(task: &Task, command: &Command) -> String {
        let task_json = serde_json::json!({
            "task_sequence_number": task.sequence_number,
            "task_description": task.description,
            "task_additional_info": task.additional_info,
        });
        let command_json = serde_json::json!({
            "command_sequence_number": command.sequence_number,
            "command_name": command.description,
            "args": command.args,
        });
        let result_json = match command.execution() {
            Some(e) => serde_json::json!({ "status": e.status, "detail": e.detail }),
            None => serde_json::json!({ "status": command.status() }),
        };
        let (task_text, command_text) = (task_json.to_string(), command_json.to_string());
        let result_text = result_json.to_string();
        let schema = schema_json::<EvaluationReport>();
        render(
            EVALUATE_FAILURE,
            &[
                ("task", task_text.as_str()),
                ("command", command_text.as_str()),
                ("result", result_text.as_str()),
                ("schema", schema.as_str()),
            ],
        )
    }
}

#[async_trait]
impl Evaluator for LlmEvaluator {
    async fn classify_failure(
        &self,
        task: &Task,
        command: &Command,
    ) -> Result<Vec<ReplanDecision>, AgentError> {
        let prompt = Self::build_prompt(task, command);
        let raw = traced_completion(&self.llm, &self.tracer, "evaluate failure", prompt).await?;
        let report: EvaluationReport = parse_structured(&raw)?;
        if report.candidates.is_empty() {
            return Err(AgentError::Validation(
                "evaluator returned no replanning candidates".to_string(),
            ));
        }
        Ok(report.candidates)
    }
}
