//! 编排阶段：Job 级与 Task 级状态机

use std::fmt;

use serde::Serialize;

/// Job 级阶段：`PlanningJob → ExecutingTasks → (Done | ReplanningTasks)`
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobPhase {
    Idle,
    PlanningJob,
    ExecutingTasks,
    ReplanningTasks,
    Done,
    Failed,
}

impl JobPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobPhase::Idle => "IDLE",
            JobPhase::PlanningJob => "PLANNING_JOB",
            JobPhase::ExecutingTasks => "EXECUTING_TASKS",
            JobPhase::ReplanningTasks => "REPLANNING_TASKS",
            JobPhase::Done => "DONE",
            JobPhase::Failed => "FAILED",
        }
    }
}

impl fmt::Display for JobPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Task 级阶段：`GeneratingCommands → ExecutingCommands → (TaskDone | ReplanningCommands | TaskFailed)`
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskPhase {
    GeneratingCommands,
    ExecutingCommands,
    ReplanningCommands,
    TaskDone,
    TaskFailed,
}

impl TaskPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskPhase::GeneratingCommands => "GENERATING_COMMANDS",
            TaskPhase::ExecutingCommands => "EXECUTING_COMMANDS",
            TaskPhase::ReplanningCommands => "REPLANNING_COMMANDS",
            TaskPhase::TaskDone => "TASK_DONE",
            TaskPhase::TaskFailed => "TASK_FAILED",
        }
    }
}

impl fmt::Display for TaskPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
