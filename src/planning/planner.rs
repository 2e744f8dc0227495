//! Planner：Task / Command 生成与重生成
//!
//! [`Planner`] 是 Orchestrator 看到的协作方接口；[`LlmPlanner`] 渲染提示词、调用 LLM、
//! 提取 JSON 并反序列化为 [`TaskPlan`] / [`CommandPlan`]。形状不合法的回复是致命的 Validation 错误。

use std::sync::Arc;

use async_trait::async_trait;

use crate::commands::CommandDescriptor;
use crate::core::AgentError;
use crate::knowledge::KnowledgeEntry;
use crate::llm::{LlmClient, Message};
use crate::memory::{Command, CommandPlan, CommandSpec, Task, TaskPlan, TaskSpec};
use crate::metadata;
use crate::observability::{EventTracer, ScopeKind};
use crate::planning::evaluator::ReplanDecision;
use crate::planning::parse::{parse_structured, schema_json};
use crate::planning::prompt::{
    bullet_list, render, GENERATE_COMMANDS, GENERATE_TASKS, REGENERATE_COMMANDS,
    REGENERATE_TASKS, SYSTEM_PROMPT,
};

/// Task 生成的输入
#[derive(Debug, Clone, Default)]
pub struct TaskContext {
    pub instruction: String,
    pub additional_info: Option<String>,
    /// 已注册机器人状态的描述（每行一个）
    pub robot_states: String,
    pub known_locations: Vec<String>,
}

/// Command 生成的输入
#[derive(Debug, Clone)]
pub struct CommandContext {
    pub task: Task,
    pub catalog: Vec<CommandDescriptor>,
    /// 已结束的 Command（按创建顺序）
    pub history: Vec<Command>,
    /// 为本 Task 检索到的知识
    pub knowledge: Vec<KnowledgeEntry>,
    pub known_locations: Vec<String>,
    pub robot_states: String,
}

#[async_trait]
pub trait Planner: Send + Sync {
    async fn generate_tasks(&self, ctx: &TaskContext) -> Result<Vec<TaskSpec>, AgentError>;

    /// 给定已执行的 Task 与失败原因，重新生成剩余 Task
    async fn regenerate_tasks(
        &self,
        ctx: &TaskContext,
        executed: &[Task],
        decision: &ReplanDecision,
    ) -> Result<Vec<TaskSpec>, AgentError>;

    async fn generate_commands(&self, ctx: &CommandContext) -> Result<Vec<CommandSpec>, AgentError>;

    /// 给定失败原因，为同一 Task 重新生成 Command
    async fn regenerate_commands(
        &self,
        ctx: &CommandContext,
        decision: &ReplanDecision,
    ) -> Result<Vec<CommandSpec>, AgentError>;
}

/// 在 `llm generation` span 中调用 LLM：prompt 作为 input，原始回复作为 output
pub(crate) async fn traced_completion(
    llm: &Arc<dyn LlmClient>,
    tracer: &Arc<EventTracer>,
    purpose: &str,
    prompt: String,
) -> Result<String, AgentError> {
    let scope = tracer.scope(
        ScopeKind::Span,
        "llm generation",
        &["llm"],
        metadata! { "model" => llm.model_name(), "purpose" => purpose },
    );
    scope.input(prompt.clone());

    let messages = [Message::system(SYSTEM_PROMPT), Message::user(prompt)];
    let raw = scope.record(llm.complete(&messages).await.map_err(AgentError::Llm))?;
    scope.output(raw.clone());

    let (prompt_tokens, completion_tokens, _) = llm.token_usage();
    scope.metadata("prompt_tokens", prompt_tokens);
    scope.metadata("completion_tokens", completion_tokens);
    Ok(raw)
}

/// LLM 驱动的 Planner
pub struct LlmPlanner {
    llm: Arc<dyn LlmClient>,
    tracer: Arc<EventTracer>,
}

impl LlmPlanner {
    pub fn new(llm: Arc<dyn LlmClient>, tracer: Arc<EventTracer>) -> Self {
        Self { llm, tracer }
    }

    fn task_prompt(template: &str, ctx: &TaskContext, extra: &[(&str, &str)]) -> String {
        let locations = ctx.known_locations.join(", ");
        let schema = schema_json::<TaskPlan>();
        let mut replacements: Vec<(&str, &str)> = vec![
            ("instruction", ctx.instruction.as_str()),
            ("additional_info", ctx.additional_info.as_deref().unwrap_or("(none)")),
            ("state_descriptions", ctx.robot_states.as_str()),
            ("known_locations", locations.as_str()),
            ("schema", schema.as_str()),
        ];
        replacements.extend_from_slice(extra);
        render(template, &replacements)
    }

    fn command_prompt(template: &str, ctx: &CommandContext, extra: &[(&str, &str)]) -> String {
        let catalog = ctx
            .catalog
            .iter()
            .map(CommandDescriptor::to_prompt_line)
            .collect::<Vec<_>>()
            .join("\n");
        let history = bullet_list(ctx.history.iter().map(|c| {
            let detail = c.execution().map(|e| e.detail.as_str()).unwrap_or("");
            format!(
                "{} {} -> {} {}",
                c.description,
                serde_json::to_string(&c.args).unwrap_or_default(),
                c.status(),
                detail
            )
        }));
        let knowledge = bullet_list(ctx.knowledge.iter().map(KnowledgeEntry::describe));
        let locations = ctx.known_locations.join(", ");
        let details = if ctx.task.additional_info.is_empty() {
            "(none)"
        } else {
            ctx.task.additional_info.as_str()
        };
        let schema = schema_json::<CommandPlan>();

        let mut replacements: Vec<(&str, &str)> = vec![
            ("task_description", ctx.task.description.as_str()),
            ("task_details", details),
            ("command_catalog", catalog.as_str()),
            ("action_history", history.as_str()),
            ("knowledge", knowledge.as_str()),
            ("known_locations", locations.as_str()),
            ("state_descriptions", ctx.robot_states.as_str()),
            ("schema", schema.as_str()),
        ];
        replacements.extend_from_slice(extra);
        render(template, &replacements)
    }

    async fn tasks_from(&self, purpose: &str, prompt: String) -> Result<Vec<TaskSpec>, AgentError> {
        let raw = traced_completion(&self.llm, &self.tracer, purpose, prompt).await?;
        let plan: TaskPlan = parse_structured(&raw)?;
        tracing::debug!(tasks = plan.tasks.len(), purpose, "task plan parsed");
        Ok(plan.tasks)
    }

    async fn commands_from(
        &self,
        purpose: &str,
        prompt: String,
    ) -> Result<Vec<CommandSpec>, AgentError> {
        let raw = traced_completion(&self.llm, &self.tracer, purpose, prompt).await?;
        let plan: CommandPlan = parse_structured(&raw)?;
        tracing::debug!(commands = plan.commands.len(), purpose, "command plan parsed");
        Ok(plan.commands)
    }
}

#[async_trait]
impl Planner for LlmPlanner {
    async fn generate_tasks(&self, ctx: &TaskContext) -> Result<Vec<TaskSpec>, AgentError> {
        let prompt = Self::task_prompt(GENERATE_TASKS, ctx, &[]);
        self.tasks_from("generate tasks", prompt).await
    }

    async fn regenerate_tasks(
        &self,
        ctx: &TaskContext,
        executed: &[Task],
        decision: &ReplanDecision,
    ) -> Result<Vec<TaskSpec>, AgentError> {
        let executed_plan = TaskPlan {
            tasks: executed.iter().map(Task::to_spec).collect(),
        };
        let executed_json = serde_json::to_string_pretty(&executed_plan)?;
        let failed = decision
            .failed_task_sequence
            .map(|s| s.to_string())
            .unwrap_or_else(|| "?".to_string());
        let prompt = Self::task_prompt(
            REGENERATE_TASKS,
            ctx,
            &[
                ("executed_tasks", executed_json.as_str()),
                ("failed_task", failed.as_str()),
                ("cause", decision.cause.as_str()),
                ("detail", decision.detail.as_str()),
                ("solution", decision.solution.as_str()),
            ],
        );
        self.tasks_from("regenerate tasks", prompt).await
    }

    async fn generate_commands(&self, ctx: &CommandContext) -> Result<Vec<CommandSpec>, AgentError> {
        let prompt = Self::command_prompt(GENERATE_COMMANDS, ctx, &[]);
        self.commands_from("generate commands", prompt).await
    }

    async fn regenerate_commands(
        &self,
        ctx: &CommandContext,
        decision: &ReplanDecision,
    ) -> Result<Vec<CommandSpec>, AgentError> {
        let prompt = Self::command_prompt(
            REGENERATE_COMMANDS,
            ctx,
            &[
                ("cause", decision.cause.as_str()),
                ("detail", decision.detail.as_str()),
                ("solution", decision.solution.as_str()),
            ],
        );
        self.commands_from("regenerate commands", prompt).await
    }
}
