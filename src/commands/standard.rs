//! 标准 Command（模拟实现）
//!
//! move / find / introduce_self / speak_message / ask_question / pick_up_object / drop_object / error。
//! 没有真实硬件：位置与可见物体都从知识库取，结果是确定的。

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::commands::registry::{ArgumentSpec, CommandOutput, CommandRegistry, RobotCommand};
use crate::core::AgentError;
use crate::knowledge::{KnowledgeBase, KnowledgeKind};
use crate::memory::StateChange;

fn arg<'a>(args: &'a BTreeMap<String, String>, name: &str) -> Result<&'a str, CommandOutput> {
    args.get(name)
        .map(String::as_str)
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| CommandOutput::failure(format!("missing argument '{name}'")))
}

/// 移动到已知地点
pub struct MoveCommand {
    knowledge: Arc<dyn KnowledgeBase>,
}

impl MoveCommand {
    pub fn new(knowledge: Arc<dyn KnowledgeBase>) -> Self {
        Self { knowledge }
    }
}

#[async_trait]
impl RobotCommand for MoveCommand {
    fn name(&self) -> &str {
        "move"
    }

    fn description(&self) -> &str {
        "drive the robot base to <location>; the robot only moves and cannot grab anything with this command"
    }

    fn arguments(&self) -> Vec<ArgumentSpec> {
        vec![ArgumentSpec::new("location", "<location>")]
    }

    fn required_known_arguments(&self) -> Vec<String> {
        vec!["location".to_string()]
    }

    async fn execute(&self, args: &BTreeMap<String, String>) -> CommandOutput {
        let location = match arg(args, "location") {
            Ok(l) => l,
            Err(out) => return out,
        };
        let position = self
            .knowledge
            .lookup(location)
            .into_iter()
            .find(|e| e.kind == KnowledgeKind::Location)
            .and_then(|e| e.position);
        match position {
            Some(position) => CommandOutput::success(format!("arrived at {location}"))
                .with_position(position)
                .with_state_change(StateChange::activate("at_location").with_arg("location", location)),
            None => CommandOutput::failure(format!("no known position for location '{location}'")),
        }
    }
}

/// 用相机寻找物体
pub struct FindCommand {
    knowledge: Arc<dyn KnowledgeBase>,
}

impl FindCommand {
    pub fn new(knowledge: Arc<dyn KnowledgeBase>) -> Self {
        Self { knowledge }
    }
}

#[async_trait]
impl RobotCommand for FindCommand {
    fn name(&self) -> &str {
        "find"
    }

    fn description(&self) -> &str {
        "look for <object> with the robot camera"
    }

    fn arguments(&self) -> Vec<ArgumentSpec> {
        vec![ArgumentSpec::new("object", "<object_name>")]
    }

    async fn execute(&self, args: &BTreeMap<String, String>) -> CommandOutput {
        let object = match arg(args, "object") {
            Ok(o) => o,
            Err(out) => return out,
        };
        let seen = self
            .knowledge
            .lookup(object)
            .into_iter()
            .find(|e| e.kind == KnowledgeKind::Object);
        match seen {
            Some(entry) => {
                let out = CommandOutput::success(format!("found {object}"));
                match entry.position {
                    Some(p) => out.with_position(p),
                    None => out,
                }
            }
            None => CommandOutput::failure(format!("{object} could not be found")),
        }
    }
}

/// 只会成功、不改变状态的说话类 Command
macro_rules! speech_command {
    ($ty:ident, $name:literal, $desc:literal, $arg:literal, $arg_desc:literal) => {
        #[derive(Debug, Default, Clone, Copy)]
        pub struct $ty;

        #[async_trait]
        impl RobotCommand for $ty {
            fn name(&self) -> &str {
                $name
            }

            fn description(&self) -> &str {
                $desc
            }

            fn arguments(&self) -> Vec<ArgumentSpec> {
                vec![ArgumentSpec::new($arg, $arg_desc)]
            }

            async fn execute(&self, args: &BTreeMap<String, String>) -> CommandOutput {
                match arg(args, $arg) {
                    Ok(text) => CommandOutput::success(format!("{}: {}", $name, text)),
                    Err(out) => out,
                }
            }
        }
    };
}

speech_command!(
    IntroduceSelfCommand,
    "introduce_self",
    "introduce the robot itself",
    "message",
    "<message>"
);
speech_command!(
    SpeakMessageCommand,
    "speak_message",
    "say <message> through the robot speaker; used to answer, reply to, explain or report to the user",
    "speak_message",
    "<message>"
);
speech_command!(
    AskQuestionCommand,
    "ask_question",
    "ask the user <content> through the robot speaker; a person must be in front of the robot",
    "question",
    "<content>"
);

/// 用机械臂抓取物体
#[derive(Debug, Default, Clone, Copy)]
pub struct PickUpObjectCommand;

#[async_trait]
impl RobotCommand for PickUpObjectCommand {
    fn name(&self) -> &str {
        "pick_up_object"
    }

    fn description(&self) -> &str {
        "grab <object> using the camera and the robot arm"
    }

    fn arguments(&self) -> Vec<ArgumentSpec> {
        vec![ArgumentSpec::new("object", "<object_name>")]
    }

    fn required_known_arguments(&self) -> Vec<String> {
        vec!["object".to_string()]
    }

    async fn execute(&self, args: &BTreeMap<String, String>) -> CommandOutput {
        match arg(args, "object") {
            Ok(object) => CommandOutput::success(format!("holding {object}"))
                .with_state_change(StateChange::activate("holding_object").with_arg("object", object)),
            Err(out) => out,
        }
    }
}

/// 放下手中的物体
#[derive(Debug, Default, Clone, Copy)]
pub struct DropObjectCommand;

#[async_trait]
impl RobotCommand for DropObjectCommand {
    fn name(&self) -> &str {
        "drop_object"
    }

    fn description(&self) -> &str {
        "release the held <object> using the camera and the robot arm"
    }

    fn arguments(&self) -> Vec<ArgumentSpec> {
        vec![ArgumentSpec::new("object", "<object_name>")]
    }

    fn required_known_arguments(&self) -> Vec<String> {
        vec!["object".to_string()]
    }

    async fn execute(&self, args: &BTreeMap<String, String>) -> CommandOutput {
        match arg(args, "object") {
            Ok(object) => CommandOutput::success(format!("dropped {object}"))
                .with_state_change(StateChange::deactivate("holding_object")),
            Err(out) => out,
        }
    }
}

/// Planner 找不到可执行 Command 时输出；报告错误本身总是成功
#[derive(Debug, Default, Clone, Copy)]
pub struct ErrorCommand;

#[async_trait]
impl RobotCommand for ErrorCommand {
    fn name(&self) -> &str {
        "error"
    }

    fn description(&self) -> &str {
        "report an error; use this when no suitable executable command exists"
    }

    fn arguments(&self) -> Vec<ArgumentSpec> {
        vec![ArgumentSpec::new("message", "<message>")]
    }

    async fn execute(&self, args: &BTreeMap<String, String>) -> CommandOutput {
        let message = args.get("message").cloned().unwrap_or_default();
        tracing::warn!(message = %message, "planner reported an error");
        CommandOutput::success(message)
    }
}

/// 注册全部标准 Command
pub fn standard_registry(knowledge: Arc<dyn KnowledgeBase>) -> Result<CommandRegistry, AgentError> {
    let mut registry = CommandRegistry::new();
    registry.register(MoveCommand::new(knowledge.clone()))?;
    registry.register(FindCommand::new(knowledge))?;
    registry.register(IntroduceSelfCommand)?;
    registry.register(SpeakMessageCommand)?;
    registry.register(AskQuestionCommand)?;
    registry.register(PickUpObjectCommand)?;
    registry.register(DropObjectCommand)?;
    registry.register(ErrorCommand)?;
    Ok(registry)
}
