//! LLM 输出解析
//!
//! 从回复文本中提取 JSON（```json ... ``` 代码块，或第一个 `{` 到最后一个 `}`），
//! 再按 wire 形状反序列化。任何失败都是 Validation 错误，不重试。

use schemars::JsonSchema;
use serde::de::DeserializeOwned;

use crate::core::AgentError;

/// 提取 JSON 文本；找不到对象时返回 None
pub fn extract_json_block(output: &str) -> Option<&str> {
    let trimmed = output.trim();

    if let Some(start) = trimmed.find("```json") {
        let rest = &trimmed[start + 7..];
        let block = rest.find("```").map(|end| &rest[..end]).unwrap_or(rest);
        return Some(block.trim());
    }

    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    (end > start).then(|| &trimmed[start..=end])
}

/// 提取并反序列化
pub fn parse_structured<T: DeserializeOwned>(output: &str) -> Result<T, AgentError> {
    let json = extract_json_block(output).ok_or_else(|| {
        AgentError::Validation(format!("no JSON object in model output: {}", preview(output)))
    })?;
    serde_json::from_str(json)
        .map_err(|e| AgentError::Validation(format!("{}: {}", e, preview(json))))
}

/// wire 形状的 JSON Schema，附在提示词末尾
pub fn schema_json<T: JsonSchema>() -> String {
    let schema = schemars::schema_for!(T);
    serde_json::to_string_pretty(&schema).unwrap_or_else(|_| "{}".to_string())
}

fn preview(s: &str) -> String {
    if s.len() > 300 {
        format!("{}...", s.chars().take(300).collect::<String>())
    } else {
        s.to_string()
    }
}
