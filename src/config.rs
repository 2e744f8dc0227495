//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `ROBO__*` 覆盖（双下划线表示嵌套，如 `ROBO__LLM__PROVIDER=openai`）。

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub llm: LlmSection,
    pub orchestrator: OrchestratorSection,
    pub tracing: TracingSection,
}

/// [app] 段：应用名、SQLite 文件
#[derive(Debug, Clone, Deserialize, Default)]
pub struct AppSection {
    pub name: Option<String>,
    /// 执行记录与 Trace 的 SQLite 文件；未设置时只保存在内存
    pub database_path: Option<PathBuf>,
}

/// [llm] 段：后端选择与限流
#[derive(Debug, Clone, Deserialize)]
pub struct LlmSection {
    /// openai / mock；openai 还需要 OPENAI_API_KEY
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model")]
    pub model: String,
    pub base_url: Option<String>,
    #[serde(default)]
    pub rate_limit: RateLimitSection,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            base_url: None,
            rate_limit: RateLimitSection::default(),
        }
    }
}

fn default_provider() -> String {
    "mock".to_string()
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

/// [llm.rate_limit] 段：`window_secs` 秒内最多 `max_calls` 次调用
#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitSection {
    #[serde(default = "default_max_calls")]
    pub max_calls: usize,
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,
}

impl RateLimitSection {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }
}

impl Default for RateLimitSection {
    fn default() -> Self {
        Self {
            max_calls: default_max_calls(),
            window_secs: default_window_secs(),
        }
    }
}

fn default_max_calls() -> usize {
    15
}

fn default_window_secs() -> u64 {
    60
}

/// [orchestrator] 段：重规划次数上限，不设即不限
#[derive(Debug, Clone, Deserialize, Default)]
pub struct OrchestratorSection {
    /// 单个 Task 内 Command 级重规划次数
    pub max_command_replans: Option<u32>,
    /// 整个 Job 内 Task 级重规划次数
    pub max_task_replans: Option<u32>,
}

/// [tracing] 段
#[derive(Debug, Clone, Deserialize)]
pub struct TracingSection {
    /// 是否把 Trace 事件桥接到进程日志
    #[serde(default = "default_console")]
    pub console: bool,
}

impl Default for TracingSection {
    fn default() -> Self {
        Self {
            console: default_console(),
        }
    }
}

fn default_console() -> bool {
    true
}

/// 从 config 目录加载配置，环境变量 ROBO__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 ROBO__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("ROBO")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}
