//! 规划层：提示词、结构化输出解析、Planner 与失败 Evaluator

pub mod evaluator;
pub mod parse;
pub mod planner;
pub mod prompt;

pub use evaluator::{EvaluationReport, Evaluator, LlmEvaluator, ReplanDecision, ReplanLevel};
pub use parse::{extract_json_block, parse_structured, schema_json};
pub use planner::{CommandContext, LlmPlanner, Planner, TaskContext};
