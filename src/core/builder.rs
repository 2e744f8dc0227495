//! Orchestrator 构建器：统一的初始化逻辑
//!
//! CLI 与测试共用同一套装配：未显式提供的组件按配置构建（LLM、Tracer 及其 sink、
//! 执行存储、标准 Command 注册表、示例知识库）。

use std::sync::Arc;

use crate::commands::{standard_registry, CommandGateway, CommandRegistry};
use crate::config::AppConfig;
use crate::core::orchestrator::{Orchestrator, ReplanLimits, TaskCallback};
use crate::core::AgentError;
use crate::knowledge::{InMemoryKnowledge, KnowledgeBase};
use crate::llm::{LlmClient, MockLlmClient, OpenAiClient, RateLimitedClient};
use crate::memory::{ExecutionMemory, RobotStateBook, SqliteExecutionStore};
use crate::observability::{EventTracer, LogSink, SqliteTraceSink};
use crate::planning::{Evaluator, LlmEvaluator, LlmPlanner, Planner};

pub struct OrchestratorBuilder {
    config: AppConfig,
    tracer: Option<Arc<EventTracer>>,
    llm: Option<Arc<dyn LlmClient>>,
    knowledge: Option<Arc<dyn KnowledgeBase>>,
    registry: Option<CommandRegistry>,
    planner: Option<Arc<dyn Planner>>,
    evaluator: Option<Arc<dyn Evaluator>>,
    memory: Option<ExecutionMemory>,
    states: Option<RobotStateBook>,
    task_callback: Option<TaskCallback>,
}

impl OrchestratorBuilder {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config,
            tracer: None,
            llm: None,
            knowledge: None,
            registry: None,
            planner: None,
            evaluator: None,
            memory: None,
            states: None,
            task_callback: None,
        }
    }

    /// 使用外部 Tracer（此时不再按配置注册 sink）
    pub fn with_tracer(mut self, tracer: Arc<EventTracer>) -> Self {
        self.tracer = Some(tracer);
        self
    }

    pub fn with_llm(mut self, llm: Arc<dyn LlmClient>) -> Self {
        self.llm = Some(llm);
        self
    }

    pub fn with_knowledge(mut self, knowledge: Arc<dyn KnowledgeBase>) -> Self {
        self.knowledge = Some(knowledge);
        self
    }

    pub fn with_registry(mut self, registry: CommandRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn with_planner(mut self, planner: Arc<dyn Planner>) -> Self {
        self.planner = Some(planner);
        self
    }

    pub fn with_evaluator(mut self, evaluator: Arc<dyn Evaluator>) -> Self {
        self.evaluator = Some(evaluator);
        self
    }

    pub fn with_memory(mut self, memory: ExecutionMemory) -> Self {
        self.memory = Some(memory);
        self
    }

    pub fn with_states(mut self, states: RobotStateBook) -> Self {
        self.states = Some(states);
        self
    }

    pub fn with_task_callback(mut self, callback: impl FnMut(&crate::memory::Task) + Send + 'static) -> Self {
        self.task_callback = Some(Box::new(callback));
        self
    }

    /// 根据配置与环境变量选择 LLM 后端（OpenAI 兼容 / Mock）；OpenAI 调用经过限流
    pub fn build_llm(&self) -> Arc<dyn LlmClient> {
        let cfg = &self.config.llm;
        let provider = cfg.provider.to_lowercase();
        let api_key = std::env::var("OPENAI_API_KEY").ok();

        match (provider.as_str(), api_key) {
            ("openai", Some(key)) => {
                tracing::info!(model = %cfg.model, "Using OpenAI-compatible LLM");
                let client = OpenAiClient::new(cfg.base_url.as_deref(), &cfg.model, Some(&key));
                Arc::new(RateLimitedClient::with_limits(
                    client,
                    cfg.rate_limit.max_calls,
                    cfg.rate_limit.window(),
                ))
            }
            ("openai", None) => {
                tracing::warn!("OPENAI_API_KEY not set, using Mock LLM");
                Arc::new(MockLlmClient)
            }
            _ => {
                tracing::info!("Using Mock LLM");
                Arc::new(MockLlmClient)
            }
        }
    }

    /// 新建 Tracer，并按配置注册日志 sink 与 SQLite sink
    pub fn build_tracer(&self) -> Result<Arc<EventTracer>, AgentError> {
        let tracer = Arc::new(EventTracer::new());
        if self.config.tracing.console {
            tracer.register_sink(Arc::new(LogSink));
        }
        if let Some(path) = &self.config.app.database_path {
            tracer.register_sink(Arc::new(SqliteTraceSink::open(path)?));
        }
        Ok(tracer)
    }

    /// 配置了 database_path 时挂上 SQLite 执行存储
    pub fn build_memory(&self) -> Result<ExecutionMemory, AgentError> {
        let memory = ExecutionMemory::new();
        match &self.config.app.database_path {
            Some(path) => Ok(memory.with_store(Box::new(SqliteExecutionStore::open(path)?))),
            None => Ok(memory),
        }
    }

    /// 共享的 LLM：已提供则复用，否则按配置构建一次
    fn shared_llm(&mut self) -> Arc<dyn LlmClient> {
        match &self.llm {
            Some(llm) => Arc::clone(llm),
            None => {
                let llm = self.build_llm();
                self.llm = Some(Arc::clone(&llm));
                llm
            }
        }
    }

    pub fn build(mut self) -> Result<Orchestrator, AgentError> {
        let tracer = match self.tracer.take() {
            Some(tracer) => tracer,
            None => self.build_tracer()?,
        };
        let memory = match self.memory.take() {
            Some(memory) => memory,
            None => self.build_memory()?,
        };
        let knowledge: Arc<dyn KnowledgeBase> = match self.knowledge.take() {
            Some(knowledge) => knowledge,
            None => Arc::new(InMemoryKnowledge::sample_home()),
        };
        let registry = match self.registry.take() {
            Some(registry) => registry,
            None => standard_registry(Arc::clone(&knowledge))?,
        };
        let planner: Arc<dyn Planner> = match self.planner.take() {
            Some(planner) => planner,
            None => Arc::new(LlmPlanner::new(self.shared_llm(), Arc::clone(&tracer))),
        };
        let evaluator: Arc<dyn Evaluator> = match self.evaluator.take() {
            Some(evaluator) => evaluator,
            None => Arc::new(LlmEvaluator::new(self.shared_llm(), Arc::clone(&tracer))),
        };

        let limits = ReplanLimits {
            max_command_replans: self.config.orchestrator.max_command_replans,
            max_task_replans: self.config.orchestrator.max_task_replans,
        };
        let gateway = CommandGateway::new(registry, Arc::clone(&tracer));

        let mut orchestrator =
            Orchestrator::new(memory, tracer, gateway, planner, evaluator, knowledge)
                .with_limits(limits);
        if let Some(states) = self.states.take() {
            orchestrator = orchestrator.with_states(states);
        }
        if let Some(callback) = self.task_callback.take() {
            orchestrator = orchestrator.with_task_callback(callback);
        }
        Ok(orchestrator)
    }
}
