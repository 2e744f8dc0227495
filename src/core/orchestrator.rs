//! Orchestrator：Job 主控循环
//!
//! 一次 `process` 处理一条指令：生成 Task 列表，逐个执行 Task；每个 Task 内生成 Command 并逐条经
//! [`CommandGateway`] 执行。Command 失败交给 Evaluator 决定在 Command 级还是 Task 级重规划。
//! 前置条件缺失、协作方返回非法数据、Command 名未注册等错误直接终止 Job。
//!
//! 所有步骤都包在 EventTracer 作用域里（Job 为 trace，Task 为 action，规划与执行为 span）；
//! Trace 只做观测，不影响控制流。

use std::sync::Arc;

use serde::Serialize;

use crate::commands::CommandGateway;
use crate::core::{AgentError, JobPhase, TaskPhase};
use crate::knowledge::{KnowledgeBase, KnowledgeEntry, KnowledgeKind};
use crate::memory::{
    Command, CommandId, ExecutionMemory, Job, JobStatus, RobotStateBook, Status, Task, TaskId,
};
use crate::metadata;
use crate::observability::{EventTracer, ScopeKind};
use crate::planning::{CommandContext, Evaluator, Planner, ReplanDecision, ReplanLevel, TaskContext};

/// Task 到达终态后的回调
pub type TaskCallback = Box<dyn FnMut(&Task) + Send>;

/// 重规划次数上限；`None` 为不限
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplanLimits {
    /// 单个 Task 内的 Command 级重规划
    pub max_command_replans: Option<u32>,
    /// 整个 Job 内的 Task 级重规划
    pub max_task_replans: Option<u32>,
}

/// 一次 `process` 的结果
#[derive(Debug, Clone, Serialize)]
pub struct JobReport {
    pub job: Job,
    /// 本 Job 的全部 Task（包括失败与被取消的）
    pub tasks: Vec<Task>,
    pub commands: Vec<Command>,
    pub command_replans: u32,
    pub task_replans: u32,
}

impl JobReport {
    pub fn tasks_with_status(&self, status: Status) -> Vec<&Task> {
        self.tasks.iter().filter(|t| t.status() == status).collect()
    }
}

/// Task 执行体的正常结局
enum TaskEnd {
    Done,
    /// Evaluator 要求 Task 级重规划
    Replan(ReplanDecision),
}

pub struct Orchestrator {
    memory: ExecutionMemory,
    tracer: Arc<EventTracer>,
    gateway: CommandGateway,
    planner: Arc<dyn Planner>,
    evaluator: Arc<dyn Evaluator>,
    knowledge: Arc<dyn KnowledgeBase>,
    states: RobotStateBook,
    limits: ReplanLimits,
    phase: JobPhase,
    on_task_complete: Option<TaskCallback>,
    command_replans: u32,
    task_replans: u32,
}

impl Orchestrator {
    pub fn new(
        memory: ExecutionMemory,
        tracer: Arc<EventTracer>,
        gateway: CommandGateway,
        planner: Arc<dyn Planner>,
        evaluator: Arc<dyn Evaluator>,
        knowledge: Arc<dyn KnowledgeBase>,
    ) -> Self {
        Self {
            memory,
            tracer,
            gateway,
            planner,
            evaluator,
            knowledge,
            states: RobotStateBook::standard(),
            limits: ReplanLimits::default(),
            phase: JobPhase::Idle,
            on_task_complete: None,
            command_replans: 0,
            task_replans: 0,
        }
    }

    pub fn with_states(mut self, states: RobotStateBook) -> Self {
        self.states = states;
        self
    }

    pub fn with_limits(mut self, limits: ReplanLimits) -> Self {
        self.limits = limits;
        self
    }

    /// 每个 Task 到达终态（success / failure）后调用
    pub fn with_task_callback(mut self, callback: impl FnMut(&Task) + Send + 'static) -> Self {
        self.on_task_complete = Some(Box::new(callback));
        self
    }

    pub fn phase(&self) -> JobPhase {
        self.phase
    }

    pub fn memory(&self) -> &ExecutionMemory {
        &self.memory
    }

    pub fn tracer(&self) -> &Arc<EventTracer> {
        &self.tracer
    }

    pub fn states(&self) -> &RobotStateBook {
        &self.states
    }

    /// 处理一条指令直到全部 Task 成功，或遇到致命错误
    pub async fn process(
        &mut self,
        instruction: &str,
        additional_info: Option<String>,
    ) -> Result<JobReport, AgentError> {
        self.command_replans = 0;
        self.task_replans = 0;

        let job = self.memory.add_job(instruction, additional_info.clone())?;
        let scope = self.tracer.scope(
            ScopeKind::Trace,
            "job",
            &["job"],
            metadata! { "job_id" => job.id.0 },
        );
        scope.input(instruction);
        tracing::info!(job_id = %job.id, instruction, "job started");

        let outcome = self.run_job(instruction, additional_info).await;
        match scope.record(outcome) {
            Ok(()) => {
                let job = self.memory.finish_job(JobStatus::Success)?;
                self.set_phase(JobPhase::Done);
                let report = self.report(job);
                scope.output(format!(
                    "{} tasks, {} command replans, {} task replans",
                    report.tasks.len(),
                    report.command_replans,
                    report.task_replans
                ));
                tracing::info!(
                    job_id = %report.job.id,
                    tasks = report.tasks.len(),
                    command_replans = report.command_replans,
                    task_replans = report.task_replans,
                    "job finished"
                );
                Ok(report)
            }
            Err(e) => {
                self.cancel_leftovers();
                if let Err(persist) = self.memory.finish_job(JobStatus::Failure) {
                    tracing::warn!(error = %persist, "failed to record job failure");
                }
                self.set_phase(JobPhase::Failed);
                scope.metadata("error_kind", e.kind());
                tracing::warn!(job_id = %job.id, error = %e, kind = e.kind(), "job failed");
                Err(e)
            }
        }
    }

    async fn run_job(
        &mut self,
        instruction: &str,
        additional_info: Option<String>,
    ) -> Result<(), AgentError> {
        self.set_phase(JobPhase::PlanningJob);
        let ctx = self.task_context(instruction, additional_info.clone());
        let specs = {
            let span = self.tracer.span("plan tasks");
            span.record(self.planner.generate_tasks(&ctx).await)?
        };
        self.memory.add_execution_tasks(specs)?;

        loop {
            self.set_phase(JobPhase::ExecutingTasks);
            let Some(decision) = self.execute_task_list().await? else {
                return Ok(());
            };

            self.set_phase(JobPhase::ReplanningTasks);
            if let Some(limit) = self.limits.max_task_replans {
                if self.task_replans >= limit {
                    return Err(AgentError::ReplanLimitExceeded {
                        level: "task",
                        limit,
                    });
                }
            }
            self.task_replans += 1;

            let canceled = self.memory.cleanup_pending_tasks()?;
            self.memory.clear_active_tasks();
            tracing::info!(
                canceled = canceled.len(),
                cause = %decision.cause,
                "replanning tasks"
            );
            let executed = self.memory.last_executed_tasks();
            let ctx = self.task_context(instruction, additional_info.clone());
            let specs = {
                let span = self.tracer.span("replan tasks");
                span.input(decision.cause.clone());
                span.record(
                    self.planner
                        .regenerate_tasks(&ctx, &executed, &decision)
                        .await,
                )?
            };
            self.memory.add_execution_tasks(specs)?;
        }
    }

    /// 按顺序执行活动视图中仍为 pending 的 Task；需要 Task 级重规划时返回决策
    async fn execute_task_list(&mut self) -> Result<Option<ReplanDecision>, AgentError> {
        let pending: Vec<TaskId> = self
            .memory
            .active_tasks()
            .iter()
            .filter(|t| t.status() == Status::Pending)
            .map(|t| t.id)
            .collect();

        for id in pending {
            if let Some(decision) = self.execute_task(id).await? {
                return Ok(Some(decision));
            }
        }
        Ok(None)
    }

    async fn execute_task(&mut self, id: TaskId) -> Result<Option<ReplanDecision>, AgentError> {
        let task = self.memory.begin_task(id)?;
        let scope = self.tracer.scope(
            ScopeKind::Action,
            &format!("task {}", task.sequence_number),
            &["task"],
            metadata! { "task_id" => id.0, "sequence_number" => task.sequence_number },
        );
        scope.input(task.description.clone());

        let outcome = self.run_task(&task).await;
        let finished = match scope.record(outcome) {
            Ok(TaskEnd::Done) => self
                .memory
                .complete_task(id, Status::Success, "all commands succeeded")
                .map(|task| (task, None)),
            Ok(TaskEnd::Replan(decision)) => {
                let cause = decision.cause.clone();
                self.memory
                    .complete_task(id, Status::Failure, &cause)
                    .map(|task| (task, Some(decision)))
            }
            Err(e) => Err(e),
        };

        match finished {
            Ok((task, decision)) => {
                scope.output(task.status().as_str());
                self.notify(&task);
                Ok(decision)
            }
            Err(e) => {
                scope.feedback(e.to_string());
                match self.memory.abort_task(id, &e.to_string()) {
                    Ok(task) => self.notify(&task),
                    Err(abort) => tracing::warn!(task_id = %id, error = %abort, "failed to abort task"),
                }
                Err(e)
            }
        }
    }

    /// Task 执行体：前置条件 → 生成 Command → 执行，失败时按 Evaluator 决策重规划
    async fn run_task(&mut self, task: &Task) -> Result<TaskEnd, AgentError> {
        self.check_preconditions(task)?;
        self.memory.clear_active_commands();

        self.task_phase(task, TaskPhase::GeneratingCommands);
        let ctx = self.command_context(task);
        let specs = {
            let span = self.tracer.span("plan commands");
            span.record(self.planner.generate_commands(&ctx).await)?
        };
        self.memory.add_execution_commands(task.id, specs)?;

        let mut replans = 0u32;
        loop {
            self.task_phase(task, TaskPhase::ExecutingCommands);
            let Some(failed) = self.execute_commands().await? else {
                self.task_phase(task, TaskPhase::TaskDone);
                return Ok(TaskEnd::Done);
            };

            let mut decision = self.evaluate(task, &failed).await?;
            decision.failed_task_sequence.get_or_insert(task.sequence_number);
            decision
                .failed_command_sequence
                .get_or_insert(failed.sequence_number);

            match decision.level {
                ReplanLevel::Task => {
                    self.task_phase(task, TaskPhase::TaskFailed);
                    self.memory.cleanup_pending_commands()?;
                    return Ok(TaskEnd::Replan(decision));
                }
                ReplanLevel::Command => {
                    self.task_phase(task, TaskPhase::ReplanningCommands);
                    if let Some(limit) = self.limits.max_command_replans {
                        if replans >= limit {
                            return Err(AgentError::ReplanLimitExceeded {
                                level: "command",
                                limit,
                            });
                        }
                    }
                    replans += 1;
                    self.command_replans += 1;

                    self.memory.cleanup_pending_commands()?;
                    tracing::info!(
                        task_id = %task.id,
                        cause = %decision.cause,
                        "replanning commands"
                    );
                    let ctx = self.command_context(task);
                    let specs = {
                        let span = self.tracer.span("replan commands");
                        span.input(decision.cause.clone());
                        span.record(self.planner.regenerate_commands(&ctx, &decision).await)?
                    };
                    self.memory.add_execution_commands(task.id, specs)?;
                }
            }
        }
    }

    /// 逐条执行活动视图中 pending 的 Command；返回第一个失败的 Command
    async fn execute_commands(&mut self) -> Result<Option<Command>, AgentError> {
        let pending: Vec<CommandId> = self
            .memory
            .active_commands()
            .iter()
            .filter(|c| c.status() == Status::Pending)
            .map(|c| c.id)
            .collect();

        for id in pending {
            let gateway = &self.gateway;
            let (command, output) = self
                .memory
                .run_command(id, |c| async move {
                    gateway.execute(&c.description, &c.args).await
                })
                .await?;
            self.states.apply_all(&output.state_changes);
            if !output.is_success() {
                return Ok(Some(command));
            }
        }
        Ok(None)
    }

    /// 只采用排名第一的候选，完整列表写入 span 输出
    async fn evaluate(&self, task: &Task, failed: &Command) -> Result<ReplanDecision, AgentError> {
        let span = self.tracer.scope(
            ScopeKind::Span,
            "evaluate failure",
            &["evaluation"],
            metadata! { "command_id" => failed.id.0 },
        );
        span.input(failed.description.clone());
        let candidates = span.record(self.evaluator.classify_failure(task, failed).await)?;
        span.output(serde_json::to_string(&candidates)?);

        let decision = candidates.into_iter().next().ok_or_else(|| {
            AgentError::Validation("evaluator returned no replanning candidates".to_string())
        })?;
        span.metadata("replanning_level", decision.level.as_str());
        Ok(decision)
    }

    fn check_preconditions(&self, task: &Task) -> Result<(), AgentError> {
        let info = &task.environmental_conditions.information;
        let required = info
            .locations
            .iter()
            .map(|n| ("location", n))
            .chain(info.objects.iter().map(|n| ("object", n)));
        for (kind, name) in required {
            if !self.knowledge.knows(name) {
                return Err(AgentError::Precondition {
                    task_sequence: task.sequence_number,
                    kind,
                    name: name.clone(),
                });
            }
        }
        Ok(())
    }

    fn task_context(&self, instruction: &str, additional_info: Option<String>) -> TaskContext {
        TaskContext {
            instruction: instruction.to_string(),
            additional_info,
            robot_states: self.states.describe(),
            known_locations: self.knowledge.names(Some(KnowledgeKind::Location)),
        }
    }

    fn command_context(&self, task: &Task) -> CommandContext {
        let info = &task.environmental_conditions.information;
        let knowledge: Vec<KnowledgeEntry> = info
            .locations
            .iter()
            .chain(info.objects.iter())
            .flat_map(|name| self.knowledge.lookup(name))
            .collect();

        CommandContext {
            task: task.clone(),
            catalog: self.gateway.registry().catalog(),
            history: self.memory.all_terminal_commands(),
            knowledge,
            known_locations: self.knowledge.names(Some(KnowledgeKind::Location)),
            robot_states: self.states.describe(),
        }
    }

    fn set_phase(&mut self, phase: JobPhase) {
        if self.phase != phase {
            tracing::debug!(from = %self.phase, to = %phase, "job phase");
            self.phase = phase;
            self.tracer.emit_instant("job phase", phase.as_str(), &["phase"], metadata!());
        }
    }

    fn task_phase(&self, task: &Task, phase: TaskPhase) {
        self.tracer.emit_instant(
            "task phase",
            phase.as_str(),
            &["phase"],
            metadata! { "task_id" => task.id.0 },
        );
    }

    /// 致命错误后取消仍为 pending 的 Command 与 Task，失败的 Job 不留下待执行记录
    fn cancel_leftovers(&mut self) {
        match self.memory.cleanup_pending_commands() {
            Ok(canceled) if !canceled.is_empty() => {
                tracing::info!(canceled = canceled.len(), "pending commands canceled after failure")
            }
            Ok(_) => {}
            Err(e) => tracing::warn!(error = %e, "failed to cancel pending commands"),
        }
        match self.memory.cleanup_pending_tasks() {
            Ok(canceled) if !canceled.is_empty() => {
                tracing::info!(canceled = canceled.len(), "pending tasks canceled after failure")
            }
            Ok(_) => {}
            Err(e) => tracing::warn!(error = %e, "failed to cancel pending tasks"),
        }
    }

    fn notify(&mut self, task: &Task) {
        if let Some(callback) = self.on_task_complete.as_mut() {
            callback(task);
        }
    }

    fn report(&self, job: Job) -> JobReport {
        let tasks: Vec<Task> = self
            .memory
            .all_tasks()
            .filter(|t| t.job_id == job.id)
            .cloned()
            .collect();
        let commands = self
            .memory
            .all_commands()
            .filter(|c| tasks.iter().any(|t| t.id == c.task_id))
            .cloned()
            .collect();
        JobReport {
            job,
            tasks,
            commands,
            command_replans: self.command_replans,
            task_replans: self.task_replans,
        }
    }
}
