//! 可观测性：进程日志初始化 + EventTracer（层级化执行追踪）

pub mod record;
pub mod sink;
pub mod tracer;

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

pub use record::{
    DurationFields, LogEvent, LogEventType, LogKind, LogRecord, Metadata, MetadataValue,
    RecordBody, ScopeKind, ScopeUpdate,
};
pub use sink::{CollectingSink, LogSink, SqliteTraceSink, TraceSink};
pub use tracer::{EventTracer, ScopeGuard};

/// 安装 tracing 订阅器：EnvFilter（默认 info，可由 RUST_LOG 覆盖）+ fmt 输出
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .try_init();
}

/// 构造 metadata 的便捷宏：`metadata! { "model" => "gpt-4o", "attempt" => 2i64 }`
#[macro_export]
macro_rules! metadata {
    () => { $crate::observability::Metadata::new() };
    ($($key:expr => $value:expr),+ $(,)?) => {{
        let mut m = $crate::observability::Metadata::new();
        $( m.insert($key.to_string(), $crate::observability::MetadataValue::from($value)); )+
        m
    }};
}
