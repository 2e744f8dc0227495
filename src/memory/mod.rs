//! 执行记忆层：Job / Task / Command 记录、ExecutionMemory、机器人状态、持久化

pub mod execution;
pub mod records;
pub mod robot_state;
pub mod store;

pub use execution::{ExecutionMemory, ExecutionOutcome};
pub use records::{
    Command, CommandId, CommandPlan, CommandSpec, DesiredInformation, DesiredOutcome,
    DesiredRobotState, EnvironmentalConditions, ExecutionResult, ExecutionStatus,
    InformationConditions, Job, JobId, JobStatus, Position, Status, Task, TaskDependency, TaskId,
    TaskPlan, TaskSpec,
};
pub use robot_state::{RobotState, RobotStateBook, StateChange};
pub use store::{ExecutionStore, SqliteExecutionStore};
