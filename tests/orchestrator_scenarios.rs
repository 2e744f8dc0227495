//! Orchestrator 场景测试：脚本化的 Planner / Evaluator + 模拟 Command

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use robo_planner::commands::{ArgumentSpec, CommandOutput, CommandRegistry, RobotCommand};
use robo_planner::config::AppConfig;
use robo_planner::core::{AgentError, JobPhase, Orchestrator, OrchestratorBuilder};
use robo_planner::knowledge::InMemoryKnowledge;
use robo_planner::memory::{
    Command, CommandId, CommandSpec, ExecutionMemory, ExecutionStore, Job, JobId, JobStatus,
    Status, Task, TaskId, TaskSpec,
};
use robo_planner::observability::{CollectingSink, EventTracer, LogKind, ScopeKind};
use robo_planner::planning::{
    CommandContext, Evaluator, Planner, ReplanDecision, ReplanLevel, TaskContext,
};

// ---------- 模拟 Command ----------

struct Say;

#[async_trait]
impl RobotCommand for Say {
    fn name(&self) -> &str {
        "say"
    }
    fn description(&self) -> &str {
        "say something"
    }
    fn arguments(&self) -> Vec<ArgumentSpec> {
        vec![ArgumentSpec::new("text", "what to say")]
    }
    async fn execute(&self, args: &BTreeMap<String, String>) -> CommandOutput {
        CommandOutput::success(format!("said {}", args.get("text").cloned().unwrap_or_default()))
    }
}

/// 前 `failures` 次失败，之后成功
struct Flaky {
    failures: usize,
    calls: AtomicUsize,
}

#[async_trait]
impl RobotCommand for Flaky {
    fn name(&self) -> &str {
        "flaky"
    }
    fn description(&self) -> &str {
        "fails a few times"
    }
    fn arguments(&self) -> Vec<ArgumentSpec> {
        Vec::new()
    }
    async fn execute(&self, _args: &BTreeMap<String, String>) -> CommandOutput {
        if self.calls.fetch_add(1, Ordering::SeqCst) < self.failures {
            CommandOutput::failure("path blocked")
        } else {
            CommandOutput::success("made it")
        }
    }
}

fn registry(flaky_failures: usize) -> CommandRegistry {
    let mut registry = CommandRegistry::new();
    registry.register(Say).unwrap();
    registry
        .register(Flaky {
            failures: flaky_failures,
            calls: AtomicUsize::new(0),
        })
        .unwrap();
    registry
}

// ---------- 脚本化协作方 ----------

#[derive(Default)]
struct ScriptedPlanner {
    task_plans: Mutex<VecDeque<Vec<TaskSpec>>>,
    command_plans: Mutex<VecDeque<Vec<CommandSpec>>>,
    calls: Mutex<Vec<String>>,
    executed_seen: Mutex<Vec<(String, Status)>>,
}

impl ScriptedPlanner {
    fn new(task_plans: Vec<Vec<TaskSpec>>, command_plans: Vec<Vec<CommandSpec>>) -> Self {
        Self {
            task_plans: Mutex::new(task_plans.into()),
            command_plans: Mutex::new(command_plans.into()),
            ..Default::default()
        }
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn next_tasks(&self, call: &str) -> Result<Vec<TaskSpec>, AgentError> {
        self.calls.lock().unwrap().push(call.to_string());
        self.task_plans
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| AgentError::Validation("no task plan left".into()))
    }

    fn next_commands(&self, call: String) -> Result<Vec<CommandSpec>, AgentError> {
        self.calls.lock().unwrap().push(call);
        self.command_plans
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| AgentError::Validation("no command plan left".into()))
    }
}

#[async_trait]
impl Planner for ScriptedPlanner {
    async fn generate_tasks(&self, _ctx: &TaskContext) -> Result<Vec<TaskSpec>, AgentError> {
        self.next_tasks("generate_tasks")
    }

    async fn regenerate_tasks(
        &self,
        _ctx: &TaskContext,
        executed: &[Task],
        _decision: &ReplanDecision,
    ) -> Result<Vec<TaskSpec>, AgentError> {
        *self.executed_seen.lock().unwrap() = executed
            .iter()
            .map(|t| (t.description.clone(), t.status()))
            .collect();
        self.next_tasks("regenerate_tasks")
    }

    async fn generate_commands(&self, ctx: &CommandContext) -> Result<Vec<CommandSpec>, AgentError> {
        self.next_commands(format!("generate_commands:{}", ctx.task.description))
    }

    async fn regenerate_commands(
        &self,
        ctx: &CommandContext,
        decision: &ReplanDecision,
    ) -> Result<Vec<CommandSpec>, AgentError> {
        self.next_commands(format!(
            "regenerate_commands:{}:{}",
            ctx.task.description, decision.cause
        ))
    }
}

struct FixedEvaluator {
    level: ReplanLevel,
    calls: AtomicUsize,
}

impl FixedEvaluator {
    fn new(level: ReplanLevel) -> Self {
        Self {
            level,
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl Evaluator for FixedEvaluator {
    async fn classify_failure(
        &self,
        _task: &Task,
        _command: &Command,
    ) -> Result<Vec<ReplanDecision>, AgentError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(vec![
            ReplanDecision::new(self.level, "path blocked").with_solution("try again"),
            ReplanDecision::new(ReplanLevel::Task, "never used"),
        ])
    }
}

fn say(seq: u32, text: &str) -> CommandSpec {
    CommandSpec::new(seq, "say").arg("text", text)
}

fn three_tasks() -> Vec<TaskSpec> {
    vec![
        TaskSpec::new(1, "greet"),
        TaskSpec::new(2, "go to the desk"),
        TaskSpec::new(3, "report back"),
    ]
}

fn orchestrator(
    config: AppConfig,
    planner: Arc<ScriptedPlanner>,
    evaluator: Arc<FixedEvaluator>,
    flaky_failures: usize,
) -> (Orchestrator, Arc<CollectingSink>) {
    let tracer = Arc::new(EventTracer::new());
    let sink = Arc::new(CollectingSink::new(false));
    tracer.register_sink(sink.clone());
    let orchestrator = OrchestratorBuilder::new(config)
        .with_tracer(tracer)
        .with_knowledge(Arc::new(InMemoryKnowledge::sample_home()))
        .with_registry(registry(flaky_failures))
        .with_planner(planner)
        .with_evaluator(evaluator)
        .build()
        .unwrap();
    (orchestrator, sink)
}

#[tokio::test]
async fn test_command_level_replanning_recovers_the_task() {
    let planner = Arc::new(ScriptedPlanner::new(
        vec![three_tasks()],
        vec![
            vec![say(1, "hello")],
            vec![CommandSpec::new(1, "flaky")],
            vec![CommandSpec::new(1, "flaky")],
            vec![say(1, "done")],
        ],
    ));
    let evaluator = Arc::new(FixedEvaluator::new(ReplanLevel::Command));
    let completed = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&completed);

    let (orchestrator, sink) =
        orchestrator(AppConfig::default(), planner.clone(), evaluator.clone(), 1);
    let mut orchestrator = orchestrator.with_task_callback(move |_task| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    let report = orchestrator.process("greet, visit the desk, report", None).await.unwrap();

    assert_eq!(report.job.status, JobStatus::Success);
    assert_eq!(report.tasks.len(), 3);
    assert!(report.tasks.iter().all(|t| t.status() == Status::Success));
    assert_eq!(report.command_replans, 1);
    assert_eq!(report.task_replans, 0);
    assert!(report.commands.iter().all(|c| c.status() != Status::Canceled));
    assert_eq!(
        report
            .commands
            .iter()
            .map(|c| c.status())
            .collect::<Vec<_>>(),
        vec![Status::Success, Status::Failure, Status::Success, Status::Success]
    );
    assert_eq!(evaluator.calls.load(Ordering::SeqCst), 1);
    assert_eq!(completed.load(Ordering::SeqCst), 3);
    assert_eq!(orchestrator.phase(), JobPhase::Done);
    assert!(planner
        .calls()
        .contains(&"regenerate_commands:go to the desk:path blocked".to_string()));

    // Trace：作用域全部关闭，Task 以 action 记录
    assert_eq!(orchestrator.tracer().depth(), 0);
    let ended = sink.ended_records();
    let actions: Vec<&str> = ended
        .iter()
        .filter(|r| r.kind == LogKind::Action)
        .map(|r| r.name.as_str())
        .collect();
    assert_eq!(actions, vec!["task 1", "task 2", "task 3"]);
    assert!(ended.iter().any(|r| r.name == "evaluate failure"));
    assert!(ended
        .iter()
        .all(|r| r.end_time().map_or(true, |end| Some(end) >= r.start_time())));
}

#[tokio::test]
async fn test_task_level_replanning_regenerates_the_rest() {
    let planner = Arc::new(ScriptedPlanner::new(
        vec![
            three_tasks(),
            vec![TaskSpec::new(1, "take the long way"), TaskSpec::new(2, "report back")],
        ],
        vec![
            vec![say(1, "hello")],
            vec![CommandSpec::new(1, "flaky"), say(2, "arrived")],
            vec![say(1, "walking")],
            vec![say(1, "done")],
        ],
    ));
    let evaluator = Arc::new(FixedEvaluator::new(ReplanLevel::Task));
    let (mut orchestrator, _sink) =
        orchestrator(AppConfig::default(), planner.clone(), evaluator, usize::MAX);

    let report = orchestrator.process("visit the desk", None).await.unwrap();

    let statuses: Vec<(&str, Status)> = report
        .tasks
        .iter()
        .map(|t| (t.description.as_str(), t.status()))
        .collect();
    assert_eq!(
        statuses,
        vec![
            ("greet", Status::Success),
            ("go to the desk", Status::Failure),
            ("report back", Status::Canceled),
            ("take the long way", Status::Success),
            ("report back", Status::Success),
        ]
    );
    assert_eq!(report.task_replans, 1);

    // 被放弃的第二条 Command 被取消
    let task2_commands: Vec<Status> = report
        .commands
        .iter()
        .filter(|c| c.task_id == report.tasks[1].id)
        .map(|c| c.status())
        .collect();
    assert_eq!(task2_commands, vec![Status::Failure, Status::Canceled]);

    // Planner 看到的是切换前的完整 Task 列表
    assert_eq!(
        *planner.executed_seen.lock().unwrap(),
        vec![
            ("greet".to_string(), Status::Success),
            ("go to the desk".to_string(), Status::Failure),
            ("report back".to_string(), Status::Canceled),
        ]
    );

    // 切换后活动视图只剩重新生成的 Task
    let active: Vec<(String, Status)> = orchestrator
        .memory()
        .active_tasks()
        .into_iter()
        .map(|t| (t.description.clone(), t.status()))
        .collect();
    assert_eq!(
        active,
        vec![
            ("take the long way".to_string(), Status::Success),
            ("report back".to_string(), Status::Success),
        ]
    );
    assert_eq!(orchestrator.memory().last_executed_tasks().len(), 3);
}

#[tokio::test]
async fn test_missing_precondition_aborts_the_job() {
    let planner = Arc::new(ScriptedPlanner::new(
        vec![vec![TaskSpec::new(1, "fly to the moon").requiring_location("moon")]],
        vec![vec![say(1, "never")]],
    ));
    let evaluator = Arc::new(FixedEvaluator::new(ReplanLevel::Command));
    let (mut orchestrator, _sink) =
        orchestrator(AppConfig::default(), planner.clone(), evaluator, 0);

    let err = orchestrator.process("go to the moon", None).await.unwrap_err();
    match err {
        AgentError::Precondition {
            task_sequence,
            kind,
            name,
        } => {
            assert_eq!(task_sequence, 1);
            assert_eq!(kind, "location");
            assert_eq!(name, "moon");
        }
        other => panic!("unexpected error: {other}"),
    }

    assert_eq!(planner.calls(), vec!["generate_tasks".to_string()]);
    let memory = orchestrator.memory();
    assert_eq!(memory.current_job().unwrap().status, JobStatus::Failure);
    assert_eq!(memory.all_commands().count(), 0);
    assert_eq!(memory.all_tasks().next().unwrap().status(), Status::Failure);
    assert_eq!(orchestrator.phase(), JobPhase::Failed);
    assert_eq!(orchestrator.tracer().depth(), 0);
}

#[tokio::test]
async fn test_command_replan_limit_is_enforced() {
    let planner = Arc::new(ScriptedPlanner::new(
        vec![vec![TaskSpec::new(1, "go to the desk")]],
        vec![
            vec![CommandSpec::new(1, "flaky")],
            vec![CommandSpec::new(1, "flaky")],
        ],
    ));
    let evaluator = Arc::new(FixedEvaluator::new(ReplanLevel::Command));
    let mut config = AppConfig::default();
    config.orchestrator.max_command_replans = Some(1);
    let (mut orchestrator, _sink) = orchestrator(config, planner, evaluator, usize::MAX);

    let err = orchestrator.process("visit the desk", None).await.unwrap_err();
    assert!(matches!(
        err,
        AgentError::ReplanLimitExceeded {
            level: "command",
            limit: 1
        }
    ));
    assert_eq!(
        orchestrator.memory().current_job().unwrap().status,
        JobStatus::Failure
    );
}

#[tokio::test]
async fn test_unknown_command_is_fatal() {
    let planner = Arc::new(ScriptedPlanner::new(
        vec![vec![TaskSpec::new(1, "dance")]],
        vec![vec![CommandSpec::new(1, "dance")]],
    ));
    let evaluator = Arc::new(FixedEvaluator::new(ReplanLevel::Command));
    let (mut orchestrator, _sink) = orchestrator(AppConfig::default(), planner, evaluator.clone(), 0);

    let err = orchestrator.process("dance", None).await.unwrap_err();
    assert!(matches!(err, AgentError::UnknownCommand(ref name) if name == "dance"));
    assert_eq!(evaluator.calls.load(Ordering::SeqCst), 0);

    let command = orchestrator.memory().all_commands().next().unwrap();
    assert_eq!(command.status(), Status::Failure);
}

#[tokio::test]
async fn test_fatal_error_cancels_leftovers_and_next_job_starts_clean() {
    let planner = Arc::new(ScriptedPlanner::new(
        vec![
            vec![TaskSpec::new(1, "dance"), TaskSpec::new(2, "bow")],
            vec![TaskSpec::new(1, "wave")],
        ],
        vec![
            vec![CommandSpec::new(1, "dance"), say(2, "ta-da")],
            vec![say(1, "hi")],
        ],
    ));
    let evaluator = Arc::new(FixedEvaluator::new(ReplanLevel::Command));
    let (mut orchestrator, _sink) =
        orchestrator(AppConfig::default(), planner.clone(), evaluator, 0);

    let err = orchestrator.process("dance and bow", None).await.unwrap_err();
    assert!(matches!(err, AgentError::UnknownCommand(_)));

    let memory = orchestrator.memory();
    let tasks: Vec<(String, Status)> = memory
        .all_tasks()
        .map(|t| (t.description.clone(), t.status()))
        .collect();
    assert_eq!(
        tasks,
        vec![
            ("dance".to_string(), Status::Failure),
            ("bow".to_string(), Status::Canceled),
        ]
    );
    let commands: Vec<Status> = memory.all_commands().map(|c| c.status()).collect();
    assert_eq!(commands, vec![Status::Failure, Status::Canceled]);
    assert!(memory.all_tasks().all(|t| t.status() != Status::Pending));

    let report = orchestrator.process("wave", None).await.unwrap();
    assert_eq!(report.tasks.len(), 1);
    assert_eq!(report.tasks[0].description, "wave");
    assert_eq!(report.tasks[0].status(), Status::Success);
    assert_eq!(
        planner.calls(),
        vec![
            "generate_tasks".to_string(),
            "generate_commands:dance".to_string(),
            "generate_tasks".to_string(),
            "generate_commands:wave".to_string(),
        ]
    );
    let bow = orchestrator
        .memory()
        .all_tasks()
        .find(|t| t.description == "bow")
        .unwrap()
        .status();
    assert_eq!(bow, Status::Canceled);
}

/// 把成功的 Task 写入时失败的存储
struct RejectingStore;

impl ExecutionStore for RejectingStore {
    fn save_job(&self, _job: &Job) -> Result<(), AgentError> {
        Ok(())
    }
    fn save_task(&self, task: &Task) -> Result<(), AgentError> {
        if task.status() == Status::Success {
            return Err(AgentError::Persistence("disk full".into()));
        }
        Ok(())
    }
    fn save_command(&self, _command: &Command) -> Result<(), AgentError> {
        Ok(())
    }
    fn load_job(&self, _id: JobId) -> Result<Option<Job>, AgentError> {
        Ok(None)
    }
    fn load_task(&self, _id: TaskId) -> Result<Option<Task>, AgentError> {
        Ok(None)
    }
    fn load_command(&self, _id: CommandId) -> Result<Option<Command>, AgentError> {
        Ok(None)
    }
    fn tasks_for_job(&self, _job: JobId) -> Result<Vec<Task>, AgentError> {
        Ok(Vec::new())
    }
    fn commands_for_task(&self, _task: TaskId) -> Result<Vec<Command>, AgentError> {
        Ok(Vec::new())
    }
}

#[tokio::test]
async fn test_failed_task_completion_goes_through_abort_path() {
    let planner = Arc::new(ScriptedPlanner::new(
        vec![vec![TaskSpec::new(1, "greet"), TaskSpec::new(2, "report back")]],
        vec![vec![say(1, "hello")]],
    ));
    let tracer = Arc::new(EventTracer::new());
    let sink = Arc::new(CollectingSink::new(false));
    tracer.register_sink(sink.clone());
    let completed = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&completed);

    let mut orchestrator = OrchestratorBuilder::new(AppConfig::default())
        .with_tracer(tracer)
        .with_knowledge(Arc::new(InMemoryKnowledge::sample_home()))
        .with_registry(registry(0))
        .with_planner(planner)
        .with_evaluator(Arc::new(FixedEvaluator::new(ReplanLevel::Command)))
        .with_memory(ExecutionMemory::new().with_store(Box::new(RejectingStore)))
        .with_task_callback(move |_task| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .build()
        .unwrap();

    let err = orchestrator.process("greet", None).await.unwrap_err();
    assert!(matches!(err, AgentError::Persistence(_)));
    assert_eq!(completed.load(Ordering::SeqCst), 1);
    assert_eq!(orchestrator.phase(), JobPhase::Failed);
    assert_eq!(orchestrator.tracer().depth(), 0);

    let memory = orchestrator.memory();
    assert!(memory.all_tasks().all(|t| t.status() != Status::InProgress));
    assert_eq!(
        memory.all_tasks().last().unwrap().status(),
        Status::Canceled
    );
    let task_action = sink
        .ended_records()
        .into_iter()
        .find(|r| r.name == "task 1")
        .unwrap();
    assert_eq!(task_action.duration_fields().unwrap().feedback, err.to_string());
}

#[test]
fn test_ending_outer_scope_closes_inner_first() {
    let tracer = Arc::new(EventTracer::new());
    let sink = Arc::new(CollectingSink::new(false));
    tracer.register_sink(sink.clone());

    let outer = tracer.begin_scope(ScopeKind::Span, "outer", &[], Default::default());
    tracer.begin_scope(ScopeKind::Span, "inner", &[], Default::default());

    assert_eq!(tracer.end_scope(Some(outer)), 2);
    let names: Vec<String> = sink.ended_records().into_iter().map(|r| r.name).collect();
    assert_eq!(names, vec!["inner", "outer"]);

    assert_eq!(tracer.end_scope(Some(outer)), 0);
    assert_eq!(sink.ended_records().len(), 2);
}
