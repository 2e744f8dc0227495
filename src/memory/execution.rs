//! ExecutionMemory：Job / Task / Command 的唯一写入者
//!
//! - 铸造 id（三类各自从 1 开始单调递增，进程内不复用）
//! - 维护「活动视图」（当前应执行的 Task / Command，按顺序）与「上次执行视图」（最近一次切换前的快照）
//! - 重规划切换时把仍为 pending 的记录标记为 canceled 并从活动视图移除，历史保持完整
//! - 执行包裹：begin → 执行体 → complete / abort；每次变更都写穿到可选的 [`ExecutionStore`]

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;

use chrono::{DateTime, Utc};

use crate::core::AgentError;
use crate::memory::records::{
    Command, CommandId, CommandSpec, ExecutionResult, ExecutionStatus, Job, JobId, JobStatus,
    Position, Status, Task, TaskId, TaskSpec,
};
use crate::memory::store::ExecutionStore;

/// `run_command` 执行体的产出：最终状态、详情与可选坐标
pub trait ExecutionOutcome {
    fn execution_status(&self) -> ExecutionStatus;
    fn detail(&self) -> &str;
    fn position(&self) -> Option<Position> {
        None
    }
}

/// Task 与 Command 共用的执行簿记
trait Tracked {
    fn label(&self) -> String;
    fn status(&self) -> Status;
    fn transition(&mut self, to: Status) -> Result<(), AgentError>;
    fn execution_mut(&mut self) -> &mut Option<ExecutionResult>;
}

impl Tracked for Task {
    fn label(&self) -> String {
        format!("task {}", self.id)
    }
    fn status(&self) -> Status {
        Task::status(self)
    }
    fn transition(&mut self, to: Status) -> Result<(), AgentError> {
        Task::transition(self, to)
    }
    fn execution_mut(&mut self) -> &mut Option<ExecutionResult> {
        Task::execution_mut(self)
    }
}

impl Tracked for Command {
    fn label(&self) -> String {
        format!("command {}", self.id)
    }
    fn status(&self) -> Status {
        Command::status(self)
    }
    fn transition(&mut self, to: Status) -> Result<(), AgentError> {
        Command::transition(self, to)
    }
    fn execution_mut(&mut self) -> &mut Option<ExecutionResult> {
        Command::execution_mut(self)
    }
}

fn begin_record<R: Tracked>(record: &mut R, now: DateTime<Utc>) -> Result<(), AgentError> {
    if record.status() != Status::Pending {
        return Err(AgentError::ContractViolation(format!(
            "{} cannot begin: status is {}, expected pending",
            record.label(),
            record.status()
        )));
    }
    record.transition(Status::InProgress)?;
    *record.execution_mut() = Some(ExecutionResult::started(now));
    Ok(())
}

fn stamp_end(record: &mut impl Tracked, now: DateTime<Utc>) -> &mut ExecutionResult {
    let execution = record
        .execution_mut()
        .get_or_insert_with(|| ExecutionResult::started(now));
    execution.end_time = Some(now.max(execution.start_time));
    execution
}

/// 结束执行：status 必须是 success / failure；否则仍然盖上 end_time，再返回 ContractViolation
fn complete_record<R: Tracked>(
    record: &mut R,
    status: Status,
    detail: &str,
    position: Option<Position>,
    now: DateTime<Utc>,
) -> Result<(), AgentError> {
    if !matches!(status, Status::Success | Status::Failure) {
        stamp_end(record, now);
        return Err(AgentError::ContractViolation(format!(
            "{} finished with non-terminal status {}; expected success or failure",
            record.label(),
            status
        )));
    }
    record.transition(status)?;
    let execution = stamp_end(record, now);
    execution.status = status;
    execution.detail = detail.to_string();
    if position.is_some() {
        execution.position = position;
    }
    Ok(())
}

/// 错误路径：仍在执行中的记录记为 failure，其余保持不变
fn abort_record<R: Tracked>(record: &mut R, detail: &str, now: DateTime<Utc>) -> bool {
    if record.status() != Status::InProgress {
        return false;
    }
    if record.transition(Status::Failure).is_err() {
        return false;
    }
    let execution = stamp_end(record, now);
    execution.status = Status::Failure;
    execution.detail = detail.to_string();
    true
}

/// 执行记录内存
#[derive(Default)]
pub struct ExecutionMemory {
    jobs: Vec<Job>,
    tasks: BTreeMap<TaskId, Task>,
    commands: BTreeMap<CommandId, Command>,
    active_tasks: Vec<TaskId>,
    active_commands: Vec<CommandId>,
    last_executed_tasks: Vec<TaskId>,
    last_executed_commands: Vec<CommandId>,
    job_counter: u64,
    task_counter: u64,
    command_counter: u64,
    store: Option<Box<dyn ExecutionStore>>,
}

impl fmt::Debug for ExecutionMemory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionMemory")
            .field("jobs", &self.jobs.len())
            .field("tasks", &self.tasks.len())
            .field("commands", &self.commands.len())
            .field("active_tasks", &self.active_tasks)
            .field("active_commands", &self.active_commands)
            .field("persistent", &self.store.is_some())
            .finish()
    }
}

impl ExecutionMemory {
    pub fn new() -> Self {
        Self::default()
    }

    /// 挂上持久化存储；之后每次变更都会写穿
    pub fn with_store(mut self, store: Box<dyn ExecutionStore>) -> Self {
        self.store = Some(store);
        self
    }

    fn next_job_id(&mut self) -> JobId {
        self.job_counter += 1;
        JobId(self.job_counter)
    }

    fn next_task_id(&mut self) -> TaskId {
        self.task_counter += 1;
        TaskId(self.task_counter)
    }

    fn next_command_id(&mut self) -> CommandId {
        self.command_counter += 1;
        CommandId(self.command_counter)
    }

    fn persist_job(&self, job: &Job) -> Result<(), AgentError> {
        match &self.store {
            Some(store) => store.save_job(job),
            None => Ok(()),
        }
    }

    fn persist_task(&self, id: TaskId) -> Result<(), AgentError> {
        match (&self.store, self.tasks.get(&id)) {
            (Some(store), Some(task)) => store.save_task(task),
            _ => Ok(()),
        }
    }

    fn persist_command(&self, id: CommandId) -> Result<(), AgentError> {
        match (&self.store, self.commands.get(&id)) {
            (Some(store), Some(command)) => store.save_command(command),
            _ => Ok(()),
        }
    }

    fn task_mut(&mut self, id: TaskId) -> Result<&mut Task, AgentError> {
        self.tasks
            .get_mut(&id)
            .ok_or_else(|| AgentError::ContractViolation(format!("task {id} does not exist")))
    }

    fn command_mut(&mut self, id: CommandId) -> Result<&mut Command, AgentError> {
        self.commands
            .get_mut(&id)
            .ok_or_else(|| AgentError::ContractViolation(format!("command {id} does not exist")))
    }

    // ---------- Job ----------

    /// 新建 Job 并设为当前；之前的 Job 保留为历史
    ///
    /// 新 Job 从空的活动视图开始：上一个 Job 遗留的 pending 记录先被取消。
    pub fn add_job(
        &mut self,
        description: impl Into<String>,
        additional_info: Option<String>,
    ) -> Result<Job, AgentError> {
        if !self.active_commands.is_empty() {
            self.cleanup_pending_commands()?;
            self.clear_active_commands();
        }
        if !self.active_tasks.is_empty() {
            self.cleanup_pending_tasks()?;
            self.clear_active_tasks();
        }

        let job = Job {
            id: self.next_job_id(),
            description: description.into(),
            additional_info,
            status: JobStatus::InProgress,
            created_at: Utc::now(),
        };
        self.persist_job(&job)?;
        tracing::debug!(job_id = %job.id, "job created");
        self.jobs.push(job.clone());
        Ok(job)
    }

    pub fn current_job(&self) -> Option<&Job> {
        self.jobs.last()
    }

    pub fn jobs(&self) -> &[Job] {
        &self.jobs
    }

    /// 为当前 Job 设置最终状态
    pub fn finish_job(&mut self, status: JobStatus) -> Result<Job, AgentError> {
        let job = self
            .jobs
            .last_mut()
            .ok_or_else(|| AgentError::ContractViolation("no current job to finish".to_string()))?;
        job.status = status;
        let job = job.clone();
        self.persist_job(&job)?;
        Ok(job)
    }

    // ---------- 注册 ----------

    /// 按给定顺序为当前 Job 注册 Task，并追加到活动 Task 视图
    pub fn add_execution_tasks(&mut self, specs: Vec<TaskSpec>) -> Result<Vec<Task>, AgentError> {
        let job_id = self
            .current_job()
            .map(|j| j.id)
            .ok_or_else(|| {
                AgentError::ContractViolation("a job must be created before adding tasks".to_string())
            })?;

        let mut created = Vec::with_capacity(specs.len());
        for spec in specs {
            let id = self.next_task_id();
            let task = Task::from_spec(id, job_id, spec);
            if let Some(store) = &self.store {
                store.save_task(&task)?;
            }
            self.tasks.insert(id, task.clone());
            self.active_tasks.push(id);
            created.push(task);
        }
        Ok(created)
    }

    /// 为活动视图中的 Task 注册 Command，并追加到活动 Command 视图
    pub fn add_execution_commands(
        &mut self,
        task_id: TaskId,
        specs: Vec<CommandSpec>,
    ) -> Result<Vec<Command>, AgentError> {
        if !self.active_tasks.contains(&task_id) {
            return Err(AgentError::ContractViolation(format!(
                "task {task_id} is not in the active task view; commands cannot be added"
            )));
        }

        let mut created = Vec::with_capacity(specs.len());
        for spec in specs {
            let id = self.next_command_id();
            let command = Command::from_spec(id, task_id, spec);
            if let Some(store) = &self.store {
                store.save_command(&command)?;
            }
            self.commands.insert(id, command.clone());
            self.active_commands.push(id);
            created.push(command);
        }
        Ok(created)
    }

    // ---------- Task 执行包裹 ----------

    pub fn begin_task(&mut self, id: TaskId) -> Result<Task, AgentError> {
        let task = self.task_mut(id)?;
        begin_record(task, Utc::now())?;
        let task = task.clone();
        self.persist_task(id)?;
        Ok(task)
    }

    pub fn complete_task(
        &mut self,
        id: TaskId,
        status: Status,
        detail: &str,
    ) -> Result<Task, AgentError> {
        let task = self.task_mut(id)?;
        let result = complete_record(task, status, detail, None, Utc::now());
        let task = task.clone();
        self.persist_task(id)?;
        result.map(|_| task)
    }

    /// 错误路径收尾：仍在执行中的 Task 记为 failure
    pub fn abort_task(&mut self, id: TaskId, detail: &str) -> Result<Task, AgentError> {
        let task = self.task_mut(id)?;
        let changed = abort_record(task, detail, Utc::now());
        let task = task.clone();
        if changed {
            self.persist_task(id)?;
        }
        Ok(task)
    }

    // ---------- Command 执行包裹 ----------

    pub fn begin_command(&mut self, id: CommandId) -> Result<Command, AgentError> {
        let command = self.command_mut(id)?;
        begin_record(command, Utc::now())?;
        let command = command.clone();
        self.persist_command(id)?;
        Ok(command)
    }

    pub fn complete_command(
        &mut self,
        id: CommandId,
        status: Status,
        detail: &str,
        position: Option<Position>,
    ) -> Result<Command, AgentError> {
        let command = self.command_mut(id)?;
        let result = complete_record(command, status, detail, position, Utc::now());
        let command = command.clone();
        self.persist_command(id)?;
        result.map(|_| command)
    }

    pub fn abort_command(&mut self, id: CommandId, detail: &str) -> Result<Command, AgentError> {
        let command = self.command_mut(id)?;
        let changed = abort_record(command, detail, Utc::now());
        let command = command.clone();
        if changed {
            self.persist_command(id)?;
        }
        Ok(command)
    }

    /// 包裹一次 Command 执行：开始 → 执行体 → 按产出收尾；执行体出错时记为 failure 并向上传播
    pub async fn run_command<F, Fut, O>(
        &mut self,
        id: CommandId,
        body: F,
    ) -> Result<(Command, O), AgentError>
    where
        F: FnOnce(Command) -> Fut,
        Fut: Future<Output = Result<O, AgentError>>,
        O: ExecutionOutcome,
    {
        let command = self.begin_command(id)?;
        match body(command).await {
            Ok(outcome) => {
                let command = self.complete_command(
                    id,
                    outcome.execution_status().into(),
                    outcome.detail(),
                    outcome.position(),
                )?;
                Ok((command, outcome))
            }
            Err(e) => {
                self.abort_command(id, &e.to_string())?;
                Err(e)
            }
        }
    }

    // ---------- 视图与查询 ----------

    pub fn task(&self, id: TaskId) -> Option<&Task> {
        self.tasks.get(&id)
    }

    pub fn command(&self, id: CommandId) -> Option<&Command> {
        self.commands.get(&id)
    }

    /// 全部 Task（按 id 顺序）
    pub fn all_tasks(&self) -> impl Iterator<Item = &Task> {
        self.tasks.values()
    }

    /// 全部 Command（按 id 顺序）
    pub fn all_commands(&self) -> impl Iterator<Item = &Command> {
        self.commands.values()
    }

    pub fn active_tasks(&self) -> Vec<Task> {
        self.collect_tasks(&self.active_tasks)
    }

    pub fn active_task_ids(&self) -> &[TaskId] {
        &self.active_tasks
    }

    pub fn active_commands(&self) -> Vec<Command> {
        self.collect_commands(&self.active_commands)
    }

    pub fn last_executed_tasks(&self) -> Vec<Task> {
        self.collect_tasks(&self.last_executed_tasks)
    }

    pub fn last_executed_commands(&self) -> Vec<Command> {
        self.collect_commands(&self.last_executed_commands)
    }

    pub fn commands_for_task(&self, task_id: TaskId) -> Vec<Command> {
        self.commands
            .values()
            .filter(|c| c.task_id == task_id)
            .cloned()
            .collect()
    }

    /// 全部已结束（success / failure）的 Command，按创建顺序；作为后续规划的执行历史
    pub fn all_terminal_commands(&self) -> Vec<Command> {
        self.commands
            .values()
            .filter(|c| matches!(c.status(), Status::Success | Status::Failure))
            .cloned()
            .collect()
    }

    fn collect_tasks(&self, ids: &[TaskId]) -> Vec<Task> {
        ids.iter().filter_map(|id| self.tasks.get(id).cloned()).collect()
    }

    fn collect_commands(&self, ids: &[CommandId]) -> Vec<Command> {
        ids.iter()
            .filter_map(|id| self.commands.get(id).cloned())
            .collect()
    }

    // ---------- 切换 ----------

    /// 快照活动 Task 视图，把其中 pending 的 Task 标记为 canceled 并移出视图；返回被取消的 id
    pub fn cleanup_pending_tasks(&mut self) -> Result<Vec<TaskId>, AgentError> {
        self.last_executed_tasks = self.active_tasks.clone();

        let mut canceled = Vec::new();
        for id in &self.active_tasks {
            if let Some(task) = self.tasks.get_mut(id) {
                if task.status() == Status::Pending {
                    task.transition(Status::Canceled)?;
                    canceled.push(*id);
                }
            }
        }
        self.active_tasks.retain(|id| !canceled.contains(id));
        for id in &canceled {
            self.persist_task(*id)?;
        }
        if !canceled.is_empty() {
            tracing::debug!(count = canceled.len(), "pending tasks canceled");
        }
        Ok(canceled)
    }

    /// Command 版本的 [`Self::cleanup_pending_tasks`]
    pub fn cleanup_pending_commands(&mut self) -> Result<Vec<CommandId>, AgentError> {
        self.last_executed_commands = self.active_commands.clone();

        let mut canceled = Vec::new();
        for id in &self.active_commands {
            if let Some(command) = self.commands.get_mut(id) {
                if command.status() == Status::Pending {
                    command.transition(Status::Canceled)?;
                    canceled.push(*id);
                }
            }
        }
        self.active_commands.retain(|id| !canceled.contains(id));
        for id in &canceled {
            self.persist_command(*id)?;
        }
        if !canceled.is_empty() {
            tracing::debug!(count = canceled.len(), "pending commands canceled");
        }
        Ok(canceled)
    }

    /// 切换到下一个 Task 时清空活动 Command 视图（记录本身保留）
    pub fn clear_active_commands(&mut self) {
        self.active_commands.clear();
    }

    /// Task 级切换后清空活动 Task 视图（记录与 last-executed 快照保留）
    pub fn clear_active_tasks(&mut self) {
        self.active_tasks.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::store::SqliteExecutionStore;

    #[derive(Debug)]
    struct Outcome(ExecutionStatus, &'static str);

    impl ExecutionOutcome for Outcome {
        fn execution_status(&self) -> ExecutionStatus {
            self.0
        }
        fn detail(&self) -> &str {
            self.1
        }
    }

    fn memory_with_tasks(n: u32) -> ExecutionMemory {
        let mut memory = ExecutionMemory::new();
        memory.add_job("bring the apple", None).unwrap();
        let specs = (1..=n).map(|i| TaskSpec::new(i, format!("task {i}"))).collect();
        memory.add_execution_tasks(specs).unwrap();
        memory
    }

    #[test]
    fn test_ids_are_strictly_increasing_per_kind() {
        let mut memory = ExecutionMemory::new();
        let j1 = memory.add_job("first", None).unwrap();
        let t = memory
            .add_execution_tasks(vec![TaskSpec::new(1, "a"), TaskSpec::new(2, "b")])
            .unwrap();
        let j2 = memory.add_job("second", Some("again".into())).unwrap();
        let t2 = memory.add_execution_tasks(vec![TaskSpec::new(1, "c")]).unwrap();

        assert_eq!(j1.id, JobId(1));
        assert!(j2.id > j1.id);
        assert_eq!(t[0].id, TaskId(1));
        assert!(t[1].id > t[0].id);
        assert!(t2[0].id > t[1].id);
        assert_eq!(t2[0].job_id, j2.id);
        assert_eq!(memory.jobs().len(), 2);

        let c1 = memory
            .add_execution_commands(t2[0].id, vec![CommandSpec::new(1, "move")])
            .unwrap();
        let c2 = memory
            .add_execution_commands(t2[0].id, vec![CommandSpec::new(2, "find")])
            .unwrap();
        assert_eq!(c1[0].id, CommandId(1));
        assert!(c2[0].id > c1[0].id);
    }

    #[test]
    fn test_tasks_require_a_job() {
        let mut memory = ExecutionMemory::new();
        let err = memory
            .add_execution_tasks(vec![TaskSpec::new(1, "a")])
            .unwrap_err();
        assert!(matches!(err, AgentError::ContractViolation(_)));
    }

    #[test]
    fn test_commands_require_active_task() {
        let mut memory = memory_with_tasks(2);
        let unknown = memory
            .add_execution_commands(TaskId(99), vec![CommandSpec::new(1, "move")])
            .unwrap_err();
        assert!(matches!(unknown, AgentError::ContractViolation(_)));

        memory.cleanup_pending_tasks().unwrap();
        let canceled = memory
            .add_execution_commands(TaskId(1), vec![CommandSpec::new(1, "move")])
            .unwrap_err();
        assert!(matches!(canceled, AgentError::ContractViolation(_)));
    }

    #[test]
    fn test_task_bracket_stamps_times_and_merges() {
        let mut memory = memory_with_tasks(1);
        let started = memory.begin_task(TaskId(1)).unwrap();
        assert_eq!(started.status(), Status::InProgress);
        assert!(started.execution().unwrap().end_time.is_none());

        memory
            .complete_task(TaskId(1), Status::Success, "done")
            .unwrap();
        let task = memory.task(TaskId(1)).unwrap();
        let execution = task.execution().unwrap();
        assert_eq!(task.status(), Status::Success);
        assert_eq!(execution.status, Status::Success);
        assert_eq!(execution.detail, "done");
        assert!(execution.end_time.unwrap() >= execution.start_time);
        assert_eq!(memory.active_tasks()[0].status(), Status::Success);
    }

    #[test]
    fn test_complete_with_non_terminal_status_is_contract_violation() {
        let mut memory = memory_with_tasks(1);
        memory.begin_task(TaskId(1)).unwrap();
        let err = memory
            .complete_task(TaskId(1), Status::InProgress, "")
            .unwrap_err();
        assert!(matches!(err, AgentError::ContractViolation(_)));

        // end_time 仍然被记录
        let task = memory.task(TaskId(1)).unwrap();
        assert!(task.execution().unwrap().end_time.is_some());

        let aborted = memory.abort_task(TaskId(1), "body left task running").unwrap();
        assert_eq!(aborted.status(), Status::Failure);
    }

    #[test]
    fn test_begin_twice_is_contract_violation() {
        let mut memory = memory_with_tasks(1);
        memory.begin_task(TaskId(1)).unwrap();
        assert!(matches!(
            memory.begin_task(TaskId(1)),
            Err(AgentError::ContractViolation(_))
        ));
    }

    #[tokio::test]
    async fn test_run_command_records_outcome() {
        let mut memory = memory_with_tasks(1);
        let ids: Vec<_> = memory
            .add_execution_commands(
                TaskId(1),
                vec![CommandSpec::new(1, "move"), CommandSpec::new(2, "find")],
            )
            .unwrap()
            .into_iter()
            .map(|c| c.id)
            .collect();

        let (command, _) = memory
            .run_command(ids[0], |c| async move {
                assert_eq!(c.status(), Status::InProgress);
                Ok(Outcome(ExecutionStatus::Success, "arrived"))
            })
            .await
            .unwrap();
        assert_eq!(command.status(), Status::Success);

        let err = memory
            .run_command(ids[1], |_| async {
                Err::<Outcome, _>(AgentError::UnknownCommand("find".into()))
            })
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::UnknownCommand(_)));

        let failed = memory.command(ids[1]).unwrap();
        assert_eq!(failed.status(), Status::Failure);
        assert!(failed.execution().unwrap().detail.contains("find"));
        assert_eq!(memory.all_terminal_commands().len(), 2);
    }

    #[test]
    fn test_cleanup_cancels_pending_and_keeps_order() {
        let mut memory = memory_with_tasks(3);
        memory.begin_task(TaskId(1)).unwrap();
        memory.complete_task(TaskId(1), Status::Success, "").unwrap();
        memory.begin_task(TaskId(2)).unwrap();
        memory.complete_task(TaskId(2), Status::Failure, "").unwrap();

        let canceled = memory.cleanup_pending_tasks().unwrap();
        assert_eq!(canceled, vec![TaskId(3)]);
        assert_eq!(memory.active_task_ids(), &[TaskId(1), TaskId(2)]);
        assert_eq!(memory.last_executed_tasks().len(), 3);
        assert_eq!(memory.task(TaskId(3)).unwrap().status(), Status::Canceled);
        assert!(memory
            .active_tasks()
            .iter()
            .all(|t| t.status() != Status::Canceled));
    }

    #[test]
    fn test_cleanup_without_pending_is_idempotent() {
        let mut memory = memory_with_tasks(2);
        for id in [TaskId(1), TaskId(2)] {
            memory.begin_task(id).unwrap();
            memory.complete_task(id, Status::Success, "").unwrap();
        }
        let before = memory.active_tasks();

        assert!(memory.cleanup_pending_tasks().unwrap().is_empty());
        assert_eq!(memory.active_tasks(), before);
        assert_eq!(memory.last_executed_tasks(), before);

        assert!(memory.cleanup_pending_tasks().unwrap().is_empty());
        assert_eq!(memory.active_tasks(), before);
        assert_eq!(memory.last_executed_tasks(), before);
    }

    #[test]
    fn test_last_executed_view_is_overwritten() {
        let mut memory = memory_with_tasks(1);
        memory
            .add_execution_commands(TaskId(1), vec![CommandSpec::new(1, "a"), CommandSpec::new(2, "b")])
            .unwrap();
        memory.cleanup_pending_commands().unwrap();
        assert_eq!(memory.last_executed_commands().len(), 2);
        assert!(memory.active_commands().is_empty());

        memory
            .add_execution_commands(TaskId(1), vec![CommandSpec::new(1, "c")])
            .unwrap();
        memory.cleanup_pending_commands().unwrap();
        let last = memory.last_executed_commands();
        assert_eq!(last.len(), 1);
        assert_eq!(last[0].description, "c");
        assert_eq!(memory.commands_for_task(TaskId(1)).len(), 3);
    }

    #[test]
    fn test_new_job_starts_with_empty_views() {
        let mut memory = memory_with_tasks(2);
        memory.begin_task(TaskId(1)).unwrap();
        memory
            .add_execution_commands(TaskId(1), vec![CommandSpec::new(1, "a"), CommandSpec::new(2, "b")])
            .unwrap();
        memory.abort_task(TaskId(1), "fatal").unwrap();

        memory.add_job("second", None).unwrap();
        assert!(memory.active_tasks().is_empty());
        assert!(memory.active_commands().is_empty());
        assert_eq!(memory.task(TaskId(2)).unwrap().status(), Status::Canceled);
        assert!(memory
            .commands_for_task(TaskId(1))
            .iter()
            .all(|c| c.status() == Status::Canceled));
        assert_eq!(memory.task(TaskId(1)).unwrap().status(), Status::Failure);

        let added = memory.add_execution_tasks(vec![TaskSpec::new(1, "fresh")]).unwrap();
        assert_eq!(memory.active_task_ids(), &[added[0].id]);
    }

    #[test]
    fn test_clear_active_tasks_keeps_snapshot() {
        let mut memory = memory_with_tasks(2);
        memory.begin_task(TaskId(1)).unwrap();
        memory.complete_task(TaskId(1), Status::Failure, "blocked").unwrap();
        memory.cleanup_pending_tasks().unwrap();
        memory.clear_active_tasks();

        assert!(memory.active_tasks().is_empty());
        assert_eq!(memory.last_executed_tasks().len(), 2);
        assert_eq!(memory.task(TaskId(1)).unwrap().status(), Status::Failure);
    }

    #[test]
    fn test_writes_through_to_store() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("exec.db");
        let mut memory =
            ExecutionMemory::new().with_store(Box::new(SqliteExecutionStore::open(&path).unwrap()));
        memory.add_job("persisted", None).unwrap();
        memory.add_execution_tasks(vec![TaskSpec::new(1, "a"), TaskSpec::new(2, "b")]).unwrap();
        memory.begin_task(TaskId(1)).unwrap();
        memory.complete_task(TaskId(1), Status::Success, "ok").unwrap();
        memory.cleanup_pending_tasks().unwrap();
        memory.finish_job(JobStatus::Success).unwrap();

        let store = SqliteExecutionStore::open(&path).unwrap();
        let tasks = store.tasks_for_job(JobId(1)).unwrap();
        assert_eq!(tasks[0].status(), Status::Success);
        assert_eq!(tasks[1].status(), Status::Canceled);
        assert_eq!(store.load_job(JobId(1)).unwrap().unwrap().status, JobStatus::Success);
    }
}
