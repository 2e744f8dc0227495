//! LLM 层：客户端抽象与实现（OpenAI 兼容 / Mock / 脚本化），以及调用限流

pub mod message;
pub mod mock;
pub mod openai;
pub mod rate_limit;
pub mod traits;

pub use message::{Message, Role};
pub use mock::{MockLlmClient, ScriptedLlmClient};
pub use openai::{OpenAiClient, TokenUsage};
pub use rate_limit::RateLimitedClient;
pub use traits::LlmClient;
