//! Command 注册表
//!
//! 所有机器人动作实现 [`RobotCommand`]（名字 / 描述 / 参数说明 / 异步执行 / 进出钩子），
//! 由 [`CommandRegistry`] 按名注册（重名是配置错误）；`catalog()` 生成 Planner 提示词里的可用 Command 列表。

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::core::AgentError;
use crate::memory::{ExecutionOutcome, ExecutionStatus, Position, StateChange};

/// Command 的一个参数及其说明
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArgumentSpec {
    pub name: String,
    pub description: String,
}

impl ArgumentSpec {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
        }
    }
}

/// 执行结果：成功 / 失败、详情、状态差量、可选坐标
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandOutput {
    pub status: ExecutionStatus,
    pub detail: String,
    #[serde(default)]
    pub state_changes: Vec<StateChange>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<Position>,
}

impl CommandOutput {
    pub fn success(detail: impl Into<String>) -> Self {
        Self {
            status: ExecutionStatus::Success,
            detail: detail.into(),
            state_changes: Vec::new(),
            position: None,
        }
    }

    pub fn failure(detail: impl Into<String>) -> Self {
        Self {
            status: ExecutionStatus::Failure,
            detail: detail.into(),
            state_changes: Vec::new(),
            position: None,
        }
    }

    pub fn with_state_change(mut self, change: StateChange) -> Self {
        self.state_changes.push(change);
        self
    }

    pub fn with_position(mut self, position: Position) -> Self {
        self.position = Some(position);
        self
    }

    pub fn is_success(&self) -> bool {
        self.status == ExecutionStatus::Success
    }
}

impl ExecutionOutcome for CommandOutput {
    fn execution_status(&self) -> ExecutionStatus {
        self.status
    }

    fn detail(&self) -> &str {
        &self.detail
    }

    fn position(&self) -> Option<Position> {
        self.position
    }
}

/// 机器人 Command trait
#[async_trait]
pub trait RobotCommand: Send + Sync {
    /// 注册表中的唯一键，也是 Planner 输出里的 command_name
    fn name(&self) -> &str;

    /// 供 LLM 理解的功能说明
    fn description(&self) -> &str;

    /// 参数说明（按提示词中的顺序）
    fn arguments(&self) -> Vec<ArgumentSpec>;

    /// 必须取自已知事实的参数名
    fn required_known_arguments(&self) -> Vec<String> {
        Vec::new()
    }

    async fn execute(&self, args: &BTreeMap<String, String>) -> CommandOutput;

    fn on_enter(&self) {}

    fn on_exit(&self) {}
}

/// 目录条目：渲染为提示词中的一行
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandDescriptor {
    pub name: String,
    pub description: String,
    pub arguments: Vec<ArgumentSpec>,
    pub required_known: Vec<String>,
}

impl CommandDescriptor {
    /// `"move":, args: location: <location>  # description <location> must ...`
    pub fn to_prompt_line(&self) -> String {
        let args = self
            .arguments
            .iter()
            .map(|a| format!("{}: {}", a.name, a.description))
            .collect::<Vec<_>>()
            .join(", ");
        let mut line = format!("\"{}\":, args: {}  # {}", self.name, args, self.description);
        if !self.required_known.is_empty() {
            let required = self
                .required_known
                .iter()
                .map(|a| format!("<{a}>"))
                .collect::<Vec<_>>()
                .join(", ");
            line.push_str(&format!(
                " {required} must be copied word for word from what the robot already knows; \
                 if it is unknown, output the error command instead"
            ));
        }
        line
    }
}

/// 按注册顺序保存的 Command 表
#[derive(Default, Clone)]
pub struct CommandRegistry {
    commands: Vec<Arc<dyn RobotCommand>>,
}

impl std::fmt::Debug for CommandRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandRegistry")
            .field("commands", &self.names())
            .finish()
    }
}

impl CommandRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, command: impl RobotCommand + 'static) -> Result<(), AgentError> {
        self.register_arc(Arc::new(command))
    }

    /// 重名返回 DuplicateCommand；必须已知的参数若不在参数表中返回 Validation
    pub fn register_arc(&mut self, command: Arc<dyn RobotCommand>) -> Result<(), AgentError> {
        let name = command.name().to_string();
        if self.get(&name).is_some() {
            return Err(AgentError::DuplicateCommand(name));
        }
        let declared: Vec<String> = command.arguments().into_iter().map(|a| a.name).collect();
        if let Some(missing) = command
            .required_known_arguments()
            .into_iter()
            .find(|r| !declared.contains(r))
        {
            return Err(AgentError::Validation(format!(
                "command '{name}' requires known argument '{missing}' that it does not declare"
            )));
        }
        tracing::debug!(command = %name, "command registered");
        self.commands.push(command);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn RobotCommand>> {
        self.commands.iter().find(|c| c.name() == name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        self.commands.iter().map(|c| c.name().to_string()).collect()
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub fn catalog(&self) -> Vec<CommandDescriptor> {
        self.commands
            .iter()
            .map(|c| CommandDescriptor {
                name: c.name().to_string(),
                description: c.description().to_string(),
                arguments: c.arguments(),
                required_known: c.required_known_arguments(),
            })
            .collect()
    }

    /// 提示词用：每个 Command 一行
    pub fn catalog_lines(&self) -> Vec<String> {
        self.catalog().iter().map(CommandDescriptor::to_prompt_line).collect()
    }
}
