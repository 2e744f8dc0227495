//! Command 网关
//!
//! 按名字从注册表取出 Command，依次调用 on_enter / execute / on_exit，结果原样返回；
//! 每次调用包在一个 span 里，并输出一行结构化审计日志（JSON）。
//! 不对参数做世界知识校验：参数是否来自已知事实由生成 Command 的一方负责。

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use crate::commands::registry::{CommandOutput, CommandRegistry};
use crate::core::AgentError;
use crate::metadata;
use crate::observability::{EventTracer, ScopeKind};

pub struct CommandGateway {
    registry: CommandRegistry,
    tracer: Arc<EventTracer>,
}

impl CommandGateway {
    pub fn new(registry: CommandRegistry, tracer: Arc<EventTracer>) -> Self {
        Self { registry, tracer }
    }

    pub fn registry(&self) -> &CommandRegistry {
        &self.registry
    }

    /// 执行指定 Command；名字未注册返回 UnknownCommand，Command 自身的失败作为 `Failure` 结果返回
    pub async fn execute(
        &self,
        name: &str,
        args: &BTreeMap<String, String>,
    ) -> Result<CommandOutput, AgentError> {
        let Some(command) = self.registry.get(name) else {
            let audit = serde_json::json!({
                "event": "command_audit",
                "command": name,
                "status": "unknown",
                "duration_ms": 0,
                "args_preview": args_preview(args),
            });
            tracing::warn!(audit = %audit.to_string(), "command");
            return Err(AgentError::UnknownCommand(name.to_string()));
        };

        let scope = self.tracer.scope(
            ScopeKind::Span,
            &format!("command {name}"),
            &["command"],
            metadata! { "command" => name },
        );
        let preview = args_preview(args);
        scope.input(preview.clone());

        let start = Instant::now();
        command.on_enter();
        let output = command.execute(args).await;
        command.on_exit();
        let duration_ms = start.elapsed().as_millis() as u64;

        let status = if output.is_success() { "success" } else { "failure" };
        let audit = serde_json::json!({
            "event": "command_audit",
            "command": name,
            "status": status,
            "duration_ms": duration_ms,
            "args_preview": preview,
        });
        tracing::info!(audit = %audit.to_string(), "command");

        scope.output(output.detail.clone());
        scope.metadata("status", status);
        if !output.is_success() {
            scope.feedback(output.detail.clone());
        }
        Ok(output)
    }
}

fn args_preview(args: &BTreeMap<String, String>) -> String {
    let s = serde_json::to_string(args).unwrap_or_default();
    if s.len() > 200 {
        format!("{}...", s.chars().take(200).collect::<String>())
    } else {
        s
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::commands::registry::{ArgumentSpec, RobotCommand};
    use crate::observability::CollectingSink;

    #[derive(Default)]
    struct Counted {
        enters: AtomicUsize,
        exits: AtomicUsize,
    }

    #[async_trait]
    impl RobotCommand for Arc<Counted> {
        fn name(&self) -> &str {
            "counted"
        }
        fn description(&self) -> &str {
            "counts hooks"
        }
        fn arguments(&self) -> Vec<ArgumentSpec> {
            vec![ArgumentSpec::new("target", "<target>")]
        }
        fn required_known_arguments(&self) -> Vec<String> {
            vec!["target".to_string()]
        }
        async fn execute(&self, args: &BTreeMap<String, String>) -> CommandOutput {
            match args.get("target") {
                Some(t) => CommandOutput::success(format!("reached {t}")),
                None => CommandOutput::failure("no target"),
            }
        }
        fn on_enter(&self) {
            self.enters.fetch_add(1, Ordering::SeqCst);
        }
        fn on_exit(&self) {
            self.exits.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn gateway() -> (CommandGateway, Arc<Counted>, Arc<CollectingSink>) {
        let counted = Arc::new(Counted::default());
        let mut registry = CommandRegistry::new();
        registry.register(counted.clone()).unwrap();
        let tracer = Arc::new(EventTracer::new());
        let sink = Arc::new(CollectingSink::new(false));
        tracer.register_sink(sink.clone());
        (CommandGateway::new(registry, tracer), counted, sink)
    }

    #[tokio::test]
    async fn test_hooks_wrap_execution() {
        let (gateway, counted, sink) = gateway();
        let mut args = BTreeMap::new();
        args.insert("target".to_string(), "desk".to_string());

        let output = gateway.execute("counted", &args).await.unwrap();
        assert!(output.is_success());
        assert_eq!(output.detail, "reached desk");
        assert_eq!(counted.enters.load(Ordering::SeqCst), 1);
        assert_eq!(counted.exits.load(Ordering::SeqCst), 1);

        let ended = sink.ended_records();
        assert_eq!(ended.len(), 1);
        assert_eq!(ended[0].name, "command counted");
    }

    #[tokio::test]
    async fn test_failure_is_a_result_not_an_error() {
        let (gateway, _, sink) = gateway();
        let output = gateway.execute("counted", &BTreeMap::new()).await.unwrap();
        assert!(!output.is_success());
        let ended = sink.ended_records();
        assert_eq!(ended[0].duration_fields().unwrap().feedback, "no target");
    }

    #[tokio::test]
    async fn test_arguments_are_not_validated_against_knowledge() {
        let (gateway, _, _) = gateway();
        let mut args = BTreeMap::new();
        args.insert("target".to_string(), "a place nobody knows".to_string());
        assert!(gateway.execute("counted", &args).await.unwrap().is_success());
    }

    #[tokio::test]
    async fn test_unknown_command() {
        let (gateway, _, sink) = gateway();
        let err = gateway.execute("teleport", &BTreeMap::new()).await.unwrap_err();
        assert!(matches!(err, AgentError::UnknownCommand(ref n) if n == "teleport"));
        assert!(sink.events().is_empty());
    }
}
