//! Mock / 脚本化 LLM 客户端（用于测试与离线运行，无需 API）
//!
//! - [`MockLlmClient`]：按提示词标记行识别请求类型，返回固定形状的 JSON
//! - [`ScriptedLlmClient`]：按顺序返回预先给定的回复，并记下收到的提示词

use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;

use crate::llm::message::{Message, Role};
use crate::llm::LlmClient;
use crate::planning::prompt::{
    line_value, COMMAND_PLANNING_MARKER, COMMAND_REPLANNING_MARKER, FAILURE_EVALUATION_MARKER,
    TASK_PLANNING_MARKER, TASK_REPLANNING_MARKER,
};

fn last_user(messages: &[Message]) -> &str {
    messages
        .iter()
        .rev()
        .find(|m| m.role == Role::User)
        .map(|m| m.content.as_str())
        .unwrap_or("(no input)")
}

/// Mock 客户端：把指令拆成「确认」与「汇报」两个说话 Task，每个 Task 生成一条 speak_message
#[derive(Debug, Default)]
pub struct MockLlmClient;

impl MockLlmClient {
    fn respond(prompt: &str) -> String {
        if prompt.starts_with(TASK_PLANNING_MARKER) || prompt.starts_with(TASK_REPLANNING_MARKER) {
            let instruction = line_value(prompt, "Instruction: ").unwrap_or("the instruction");
            serde_json::json!({
                "tasks": [
                    {
                        "task_sequence_number": 1,
                        "task_description": format!("Tell the user that the robot will handle: {instruction}"),
                        "task_reason": "the user should know the request was understood",
                    },
                    {
                        "task_sequence_number": 2,
                        "task_description": format!("Report to the user that \"{instruction}\" is done"),
                        "task_dependencies": [
                            {"dependency_task_sequence_number": 1, "reason": "acknowledge first"}
                        ],
                        "task_reason": "the user expects an answer",
                    }
                ]
            })
            .to_string()
        } else if prompt.starts_with(COMMAND_PLANNING_MARKER)
            || prompt.starts_with(COMMAND_REPLANNING_MARKER)
        {
            let task = line_value(prompt, "Task: ").unwrap_or("(unknown task)");
            format!(
                "```json\n{}\n```",
                serde_json::json!({
                    "commands": [
                        {
                            "command_sequence_number": 1,
                            "command_name": "speak_message",
                            "args": {"speak_message": task}
                        }
                    ]
                })
            )
        } else if prompt.starts_with(FAILURE_EVALUATION_MARKER) {
            serde_json::json!({
                "candidates": [
                    {
                        "replanning_level": "command",
                        "cause": "mock evaluation",
                        "detail": "the command failed; try again with new commands",
                        "solution": "regenerate the commands"
                    }
                ]
            })
            .to_string()
        } else {
            format!("Echo from Mock: {prompt}")
        }
    }
}

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(&self, messages: &[Message]) -> Result<String, String> {
        Ok(Self::respond(last_user(messages)))
    }

    fn model_name(&self) -> &str {
        "mock"
    }
}

/// 脚本化客户端：回复用完后返回错误
#[derive(Debug, Default)]
pub struct ScriptedLlmClient {
    responses: Mutex<VecDeque<String>>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedLlmClient {
    pub fn new(responses: Vec<String>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn push(&self, response: impl Into<String>) {
        self.responses
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(response.into());
    }

    /// 收到过的 User 提示词（按调用顺序）
    pub fn prompts(&self) -> Vec<String> {
        self.prompts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl LlmClient for ScriptedLlmClient {
    async fn complete(&self, messages: &[Message]) -> Result<String, String> {
        self.prompts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(last_user(messages).to_string());
        self.responses
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
            .ok_or_else(|| "scripted responses exhausted".to_string())
    }

    fn model_name(&self) -> &str {
        "scripted"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{CommandPlan, TaskPlan};
    use crate::planning::evaluator::EvaluationReport;
    use crate::planning::parse::parse_structured;
    use crate::planning::prompt::{render, EVALUATE_FAILURE, GENERATE_COMMANDS, GENERATE_TASKS};

    #[tokio::test]
    async fn test_mock_answers_every_prompt_kind() {
        let mock = MockLlmClient;

        let tasks = render(GENERATE_TASKS, &[("instruction", "water the plants")]);
        let out = mock.complete(&[Message::user(tasks)]).await.unwrap();
        let plan: TaskPlan = parse_structured(&out).unwrap();
        assert_eq!(plan.tasks.len(), 2);
        assert!(plan.tasks[0].description.contains("water the plants"));

        let commands = render(GENERATE_COMMANDS, &[("task_description", "say hello")]);
        let out = mock.complete(&[Message::user(commands)]).await.unwrap();
        let plan: CommandPlan = parse_structured(&out).unwrap();
        assert_eq!(plan.commands[0].description, "speak_message");
        assert_eq!(
            plan.commands[0].args.get("speak_message").map(String::as_str),
            Some("say hello")
        );

        let out = mock
            .complete(&[Message::user(render(EVALUATE_FAILURE, &[]))])
            .await
            .unwrap();
        let report: EvaluationReport = parse_structured(&out).unwrap();
        assert_eq!(report.candidates.len(), 1);
    }

    #[tokio::test]
    async fn test_scripted_runs_dry() {
        let scripted = ScriptedLlmClient::new(vec!["one".into()]);
        scripted.push("two");
        assert_eq!(scripted.complete(&[Message::user("a")]).await.unwrap(), "one");
        assert_eq!(scripted.complete(&[Message::user("b")]).await.unwrap(), "two");
        assert!(scripted.complete(&[Message::user("c")]).await.is_err());
        assert_eq!(scripted.prompts(), vec!["a", "b", "c"]);
    }
}
