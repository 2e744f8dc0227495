//! 执行记录：Job / Task / Command 及其状态机
//!
//! - **Spec**（`TaskSpec` / `CommandSpec`）：Planner 产出的计划，字段名与 LLM 输出的 JSON 一致
//! - **记录**（`Task` / `Command`）：ExecutionMemory 铸造 id 后的规范记录，除 status 与执行结果外不可变
//! - **Status**：`pending → in_progress → {success, failure}` 或 `pending → canceled`，由 [`Status::transition`] 守卫

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::core::AgentError;

macro_rules! record_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub u64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

record_id!(
    /// Job 唯一 ID（进程内单调递增，从 1 开始）
    JobId
);
record_id!(
    /// Task 唯一 ID
    TaskId
);
record_id!(
    /// Command 唯一 ID
    CommandId
);

/// Task 与 Command 共用的状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Pending,
    InProgress,
    Success,
    Failure,
    Canceled,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Pending => "pending",
            Status::InProgress => "in_progress",
            Status::Success => "success",
            Status::Failure => "failure",
            Status::Canceled => "canceled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Status::Success | Status::Failure | Status::Canceled)
    }

    /// 唯一的状态迁移入口；非法迁移返回 ContractViolation
    pub fn transition(self, to: Status) -> Result<Status, AgentError> {
        let legal = matches!(
            (self, to),
            (Status::Pending, Status::InProgress)
                | (Status::Pending, Status::Canceled)
                | (Status::InProgress, Status::Success)
                | (Status::InProgress, Status::Failure)
        );
        if legal {
            Ok(to)
        } else {
            Err(AgentError::ContractViolation(format!(
                "illegal status transition {} -> {}",
                self, to
            )))
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Status {
    type Err = AgentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Status::Pending),
            "in_progress" => Ok(Status::InProgress),
            "success" => Ok(Status::Success),
            "failure" => Ok(Status::Failure),
            "canceled" => Ok(Status::Canceled),
            other => Err(AgentError::Persistence(format!("unknown status '{other}'"))),
        }
    }
}

/// Command 执行结果只可能是成功或失败
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Success,
    Failure,
}

impl From<ExecutionStatus> for Status {
    fn from(s: ExecutionStatus) -> Self {
        match s {
            ExecutionStatus::Success => Status::Success,
            ExecutionStatus::Failure => Status::Failure,
        }
    }
}

/// Job 状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    InProgress,
    Success,
    Failure,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::InProgress => "in_progress",
            JobStatus::Success => "success",
            JobStatus::Failure => "failure",
        }
    }
}

/// 空间坐标（Command 执行结果可选携带）
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize, JsonSchema)]
pub struct Position {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Position {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }
}

/// 执行结果：开始后挂到记录上，结束时补上 end_time 与最终状态
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub status: Status,
    pub detail: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<Position>,
}

impl ExecutionResult {
    pub fn started(now: DateTime<Utc>) -> Self {
        Self {
            start_time: now,
            end_time: None,
            status: Status::InProgress,
            detail: String::new(),
            position: None,
        }
    }
}

/// 一次端到端的指令执行
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub description: String,
    pub additional_info: Option<String>,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
}

// ---------- Planner 输出（wire 形状） ----------

/// Task 依赖：依赖的 Task 序号、理由与所需 outcome 的 id
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize, JsonSchema)]
pub struct TaskDependency {
    #[serde(rename = "dependency_task_sequence_number")]
    pub task_sequence: u32,
    #[serde(default)]
    pub reason: String,
    #[serde(default, rename = "required_outcome_desired_information_uids")]
    pub required_information_ids: Vec<u32>,
    #[serde(default, rename = "required_outcome_desired_robot_state_uids")]
    pub required_robot_state_ids: Vec<u32>,
}

/// 信息条件：执行前必须已知的地点与物体
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize, JsonSchema)]
pub struct InformationConditions {
    #[serde(default, rename = "required_information_locations")]
    pub locations: Vec<String>,
    #[serde(default, rename = "required_information_objects")]
    pub objects: Vec<String>,
}

impl InformationConditions {
    pub fn is_empty(&self) -> bool {
        self.locations.is_empty() && self.objects.is_empty()
    }
}

/// 环境条件（物理条件 + 信息条件）
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize, JsonSchema)]
pub struct EnvironmentalConditions {
    #[serde(default, rename = "required_physical_conditions")]
    pub physical: Vec<String>,
    #[serde(default, rename = "required_information_conditions")]
    pub information: InformationConditions,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize, JsonSchema)]
pub struct DesiredInformation {
    #[serde(rename = "uid")]
    pub id: u32,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize, JsonSchema)]
pub struct DesiredRobotState {
    #[serde(rename = "uid")]
    pub id: u32,
    pub state_name: String,
    #[serde(default)]
    pub state_args: Vec<String>,
}

/// Task 的完成条件
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize, JsonSchema)]
pub struct DesiredOutcome {
    #[serde(default, rename = "desired_information")]
    pub information: Vec<DesiredInformation>,
    #[serde(default, rename = "desired_robot_state")]
    pub robot_states: Vec<DesiredRobotState>,
}

/// Planner 产出的一个 Task
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize, JsonSchema)]
pub struct TaskSpec {
    #[serde(rename = "task_sequence_number")]
    pub sequence_number: u32,
    #[serde(rename = "task_description")]
    pub description: String,
    #[serde(default, rename = "task_additional_info")]
    pub additional_info: String,
    #[serde(default, rename = "task_dependencies")]
    pub dependencies: Vec<TaskDependency>,
    #[serde(default, rename = "task_environmental_conditions")]
    pub environmental_conditions: EnvironmentalConditions,
    #[serde(default, rename = "task_reason")]
    pub reason: String,
    #[serde(default, rename = "task_outcome")]
    pub desired_outcome: DesiredOutcome,
}

impl TaskSpec {
    pub fn new(sequence_number: u32, description: impl Into<String>) -> Self {
        Self {
            sequence_number,
            description: description.into(),
            ..Self::default()
        }
    }

    pub fn requiring_location(mut self, location: impl Into<String>) -> Self {
        self.environmental_conditions
            .information
            .locations
            .push(location.into());
        self
    }

    pub fn requiring_object(mut self, object: impl Into<String>) -> Self {
        self.environmental_conditions
            .information
            .objects
            .push(object.into());
        self
    }
}

/// Planner 产出的一个 Command
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize, JsonSchema)]
pub struct CommandSpec {
    #[serde(rename = "command_sequence_number")]
    pub sequence_number: u32,
    /// 要调用的 Command 名
    #[serde(rename = "command_name", alias = "name")]
    pub description: String,
    #[serde(default)]
    pub additional_info: String,
    #[serde(default)]
    pub args: BTreeMap<String, String>,
}

impl CommandSpec {
    pub fn new(sequence_number: u32, name: impl Into<String>) -> Self {
        Self {
            sequence_number,
            description: name.into(),
            ..Self::default()
        }
    }

    pub fn arg(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.args.insert(key.into(), value.into());
        self
    }
}

/// `{"tasks": [...]}`
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize, JsonSchema)]
pub struct TaskPlan {
    pub tasks: Vec<TaskSpec>,
}

/// `{"commands": [...]}`
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize, JsonSchema)]
pub struct CommandPlan {
    pub commands: Vec<CommandSpec>,
}

// ---------- 规范记录 ----------

/// 已注册的 Task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub job_id: JobId,
    pub sequence_number: u32,
    pub description: String,
    pub additional_info: String,
    pub dependencies: Vec<TaskDependency>,
    pub environmental_conditions: EnvironmentalConditions,
    pub reason: String,
    pub desired_outcome: DesiredOutcome,
    status: Status,
    execution: Option<ExecutionResult>,
}

impl Task {
    pub(crate) fn from_spec(id: TaskId, job_id: JobId, spec: TaskSpec) -> Self {
        Self {
            id,
            job_id,
            sequence_number: spec.sequence_number,
            description: spec.description,
            additional_info: spec.additional_info,
            dependencies: spec.dependencies,
            environmental_conditions: spec.environmental_conditions,
            reason: spec.reason,
            desired_outcome: spec.desired_outcome,
            status: Status::Pending,
            execution: None,
        }
    }

    pub fn status(&self) -> Status {
        self.status
    }

    pub fn execution(&self) -> Option<&ExecutionResult> {
        self.execution.as_ref()
    }

    /// 还原为 wire 形状（重规划时把已执行的 Task 交回 Planner）
    pub fn to_spec(&self) -> TaskSpec {
        TaskSpec {
            sequence_number: self.sequence_number,
            description: self.description.clone(),
            additional_info: self.additional_info.clone(),
            dependencies: self.dependencies.clone(),
            environmental_conditions: self.environmental_conditions.clone(),
            reason: self.reason.clone(),
            desired_outcome: self.desired_outcome.clone(),
        }
    }

    pub(crate) fn transition(&mut self, to: Status) -> Result<(), AgentError> {
        self.status = self.status.transition(to).map_err(|e| {
            AgentError::ContractViolation(format!("task {}: {}", self.id, e))
        })?;
        Ok(())
    }

    pub(crate) fn execution_mut(&mut self) -> &mut Option<ExecutionResult> {
        &mut self.execution
    }
}

/// 已注册的 Command
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    pub id: CommandId,
    pub task_id: TaskId,
    pub sequence_number: u32,
    /// 要调用的 Command 名
    pub description: String,
    pub additional_info: String,
    pub args: BTreeMap<String, String>,
    status: Status,
    execution: Option<ExecutionResult>,
}

impl Command {
    pub(crate) fn from_spec(id: CommandId, task_id: TaskId, spec: CommandSpec) -> Self {
        Self {
            id,
            task_id,
            sequence_number: spec.sequence_number,
            description: spec.description,
            additional_info: spec.additional_info,
            args: spec.args,
            status: Status::Pending,
            execution: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.description
    }

    pub fn status(&self) -> Status {
        self.status
    }

    pub fn execution(&self) -> Option<&ExecutionResult> {
        self.execution.as_ref()
    }

    pub(crate) fn transition(&mut self, to: Status) -> Result<(), AgentError> {
        self.status = self.status.transition(to).map_err(|e| {
            AgentError::ContractViolation(format!("command {}: {}", self.id, e))
        })?;
        Ok(())
    }

    pub(crate) fn execution_mut(&mut self) -> &mut Option<ExecutionResult> {
        &mut self.execution
    }
}
