//! 机器人状态：RobotState 与 StateChange 差量
//!
//! 状态只能通过 Command 执行结果里的 StateChange 修改；RobotStateBook 持有全部已注册状态。

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::core::AgentError;

/// Command 执行后产生的状态差量
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateChange {
    pub name: String,
    pub active: bool,
    #[serde(default)]
    pub args: BTreeMap<String, Option<String>>,
}

impl StateChange {
    pub fn activate(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            active: true,
            args: BTreeMap::new(),
        }
    }

    pub fn deactivate(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            active: false,
            args: BTreeMap::new(),
        }
    }

    pub fn with_arg(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.args.insert(key.into(), Some(value.into()));
        self
    }
}

/// 一个具名的机器人状态
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RobotState {
    pub name: String,
    pub description: String,
    /// 参数名 -> 说明
    pub args_description: BTreeMap<String, Option<String>>,
    pub active: bool,
    pub args: BTreeMap<String, Option<String>>,
}

impl RobotState {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            args_description: BTreeMap::new(),
            active: false,
            args: BTreeMap::new(),
        }
    }

    pub fn with_arg(mut self, name: impl Into<String>, description: impl Into<String>) -> Self {
        self.args_description
            .insert(name.into(), Some(description.into()));
        self
    }

    pub fn initially_active(mut self, active: bool) -> Self {
        self.active = active;
        self
    }

    /// 用差量覆盖 active 与参数
    pub fn apply(&mut self, change: &StateChange) {
        self.active = change.active;
        self.args = change.args.clone();
    }

    /// Planner 提示词里的一行描述
    pub fn describe(&self) -> String {
        let args = self
            .args_description
            .iter()
            .map(|(k, v)| format!("{}: {}", k, v.as_deref().unwrap_or("")))
            .collect::<Vec<_>>()
            .join(", ");
        let current = if self.active {
            let values = self
                .args
                .iter()
                .map(|(k, v)| format!("{}={}", k, v.as_deref().unwrap_or("-")))
                .collect::<Vec<_>>()
                .join(", ");
            format!("active({values})")
        } else {
            "inactive".to_string()
        };
        format!(
            "\"{}\": args: [{}]  # {} [{}]",
            self.name, args, self.description, current
        )
    }
}

/// 已注册状态的目录（按注册顺序）
#[derive(Debug, Clone, Default)]
pub struct RobotStateBook {
    states: Vec<RobotState>,
}

impl RobotStateBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// 手持物体与所在位置两个常用状态
    pub fn standard() -> Self {
        let mut book = Self::new();
        book.states.push(
            RobotState::new("holding_object", "The robot is holding an object")
                .with_arg("object", "name of the held object"),
        );
        book.states.push(
            RobotState::new("at_location", "The robot is at a known location")
                .with_arg("location", "name of the current location"),
        );
        book
    }

    pub fn register(&mut self, state: RobotState) -> Result<(), AgentError> {
        if self.get(&state.name).is_some() {
            return Err(AgentError::Validation(format!(
                "robot state '{}' is already registered",
                state.name
            )));
        }
        self.states.push(state);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&RobotState> {
        self.states.iter().find(|s| s.name == name)
    }

    pub fn states(&self) -> &[RobotState] {
        &self.states
    }

    /// 应用差量；未注册的状态名只记日志
    pub fn apply(&mut self, change: &StateChange) -> bool {
        match self.states.iter_mut().find(|s| s.name == change.name) {
            Some(state) => {
                state.apply(change);
                tracing::debug!(state = %change.name, active = change.active, "robot state updated");
                true
            }
            None => {
                tracing::warn!(state = %change.name, "ignoring change for unregistered robot state");
                false
            }
        }
    }

    pub fn apply_all<'a>(&mut self, changes: impl IntoIterator<Item = &'a StateChange>) {
        for change in changes {
            self.apply(change);
        }
    }

    /// 「已知状态」列表，每行一个
    pub fn describe(&self) -> String {
        self.states
            .iter()
            .map(RobotState::describe)
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apply_overwrites_args() {
        let mut book = RobotStateBook::standard();
        assert!(book.apply(&StateChange::activate("holding_object").with_arg("object", "apple")));

        let holding = book.get("holding_object").unwrap();
        assert!(holding.active);
        assert_eq!(holding.args.get("object"), Some(&Some("apple".to_string())));

        book.apply(&StateChange::deactivate("holding_object"));
        let holding = book.get("holding_object").unwrap();
        assert!(!holding.active);
        assert!(holding.args.is_empty());
    }

    #[test]
    fn test_unknown_state_is_ignored() {
        let mut book = RobotStateBook::standard();
        assert!(!book.apply(&StateChange::activate("flying")));
        assert_eq!(book.states().len(), 2);
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let mut book = RobotStateBook::standard();
        let err = book
            .register(RobotState::new("at_location", "again"))
            .unwrap_err();
        assert!(matches!(err, AgentError::Validation(_)));
    }

    #[test]
    fn test_describe_lists_every_state() {
        let book = RobotStateBook::standard();
        let text = book.describe();
        assert!(text.contains("\"holding_object\""));
        assert!(text.contains("\"at_location\""));
        assert!(text.contains("inactive"));
    }
}
