//! 提示词模板
//!
//! 模板里的 `{{name}}` 由 [`render`] 替换；每个模板第一行是标记行，Mock 客户端靠它区分请求类型。

pub const TASK_PLANNING_MARKER: &str = "## Task planning";
pub const TASK_REPLANNING_MARKER: &str = "## Task replanning";
pub const COMMAND_PLANNING_MARKER: &str = "## Command planning";
pub const COMMAND_REPLANNING_MARKER: &str = "## Command replanning";
pub const FAILURE_EVALUATION_MARKER: &str = "## Failure evaluation";

pub const SYSTEM_PROMPT: &str = "You are the planning module of a service robot. \
You only answer with a single JSON document that follows the requested schema. \
Never invent locations, objects or commands that you were not given.";

const TASK_RULES: &str = "\
- Split the instruction into tasks, one physical action per task. \"Bring me the apple on the desk\" \
becomes: move to the desk, pick up the apple, move back, hand the apple over.
- Decide what has to happen first, then what comes next, one step at a time.
- Keep every piece of information from the instruction; the instruction must be recoverable from the tasks.
- Consider whether the robot has to return to where it started, and whether the user expects an answer.
- List the locations and objects a task needs in task_environmental_conditions; use only known names.
- Do not hallucinate.";

pub const GENERATE_TASKS: &str = "## Task planning
Decompose the instruction below into tasks.

{{rules}}

Instruction: {{instruction}}
Additional info: {{additional_info}}

Robot states (desired_robot_state may only use these):
{{state_descriptions}}

Known locations: {{known_locations}}

Answer with JSON matching this schema:
{{schema}}
";

pub const REGENERATE_TASKS: &str = "## Task replanning
The plan below was generated for the instruction and executed, but task {{failed_task}} failed.
Regenerate the tasks from task {{failed_task}} onwards so that the instruction is still fulfilled.

{{rules}}

Instruction: {{instruction}}
Additional info: {{additional_info}}

Executed plan:
{{executed_tasks}}

Failure cause: {{cause}}
Failure detail: {{detail}}
Suggested solution: {{solution}}

Robot states (desired_robot_state may only use these):
{{state_descriptions}}

Known locations: {{known_locations}}

Answer with JSON matching this schema:
{{schema}}
";

pub const GENERATE_COMMANDS: &str = "## Command planning
Turn the task below into a sequence of commands the robot can execute.
- Use only the commands listed under Available commands, with exactly the listed arguments.
- If no command fits, output the error command with a message explaining why.

Task: {{task_description}}
Task details: {{task_details}}

Available commands:
{{command_catalog}}

Commands executed so far:
{{action_history}}

Known facts:
{{knowledge}}

Known locations: {{known_locations}}

Robot states:
{{state_descriptions}}

Answer with JSON matching this schema:
{{schema}}
";

pub const REGENERATE_COMMANDS: &str = "## Command replanning
A command failed while executing the task below. Generate new commands for the rest of the task.
- Use only the commands listed under Available commands, with exactly the listed arguments.
- If no command fits, output the error command with a message explaining why.

Task: {{task_description}}
Task details: {{task_details}}

Failure cause: {{cause}}
Failure detail: {{detail}}
Suggested solution: {{solution}}

Available commands:
{{command_catalog}}

Commands executed so far:
{{action_history}}

Known facts:
{{knowledge}}

Known locations: {{known_locations}}

Robot states:
{{state_descriptions}}

Answer with JSON matching this schema:
{{schema}}
";

pub const EVALUATE_FAILURE: &str = "## Failure evaluation
A robot command failed. Classify the failure and propose how to replan.
- replanning_level \"command\": the task is still achievable; only its remaining commands need regenerating.
- replanning_level \"task\": the task itself cannot succeed as planned; the remaining tasks need regenerating.
List candidates from most to least likely.

Task:
{{task}}

Command:
{{command}}

Execution result:
{{result}}

Answer with JSON matching this schema:
{{schema}}
";

/// 替换 `{{key}}`；未提供的占位符保持原样
pub fn render(template: &str, replacements: &[(&str, &str)]) -> String {
    let mut out = template.replace("{{rules}}", TASK_RULES);
    for (key, value) in replacements {
        out = out.replace(&format!("{{{{{key}}}}}"), value);
    }
    out
}

/// 列表渲染为 `- item` 行；空列表为 `(none)`
pub fn bullet_list<I, S>(items: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let lines: Vec<String> = items
        .into_iter()
        .map(|s| format!("- {}", s.as_ref()))
        .collect();
    if lines.is_empty() {
        "(none)".to_string()
    } else {
        lines.join("\n")
    }
}

/// Mock 用：取 `prefix` 开头那一行的剩余部分
pub fn line_value<'a>(prompt: &'a str, prefix: &str) -> Option<&'a str> {
    prompt
        .lines()
        .find_map(|l| l.strip_prefix(prefix))
        .map(str::trim)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_replaces_placeholders() {
        let out = render(
            GENERATE_TASKS,
            &[("instruction", "bring the apple"), ("known_locations", "desk")],
        );
        assert!(out.starts_with(TASK_PLANNING_MARKER));
        assert!(out.contains("Instruction: bring the apple"));
        assert!(out.contains("Known locations: desk"));
        assert!(out.contains("one physical action per task"));
        assert!(out.contains("{{schema}}"));
    }

    #[test]
    fn test_bullet_list_and_line_value() {
        assert_eq!(bullet_list(Vec::<String>::new()), "(none)");
        assert_eq!(bullet_list(["a", "b"]), "- a\n- b");

        let prompt = render(GENERATE_COMMANDS, &[("task_description", "move to desk")]);
        assert_eq!(line_value(&prompt, "Task: "), Some("move to desk"));
        assert_eq!(line_value(&prompt, "Nope: "), None);
    }
}
