//! Trace 记录：不可变值对象
//!
//! 每个 `with_*` 方法都返回一条新记录，原记录保持不变。持续型记录（Trace / Action / Span）
//! 带 input / output / feedback 与起止时间；瞬时记录（Event）只带 context。

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 记录类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogKind {
    Trace,
    Action,
    Span,
    Event,
}

impl LogKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogKind::Trace => "trace",
            LogKind::Action => "action",
            LogKind::Span => "span",
            LogKind::Event => "event",
        }
    }

    pub fn is_duration(&self) -> bool {
        !matches!(self, LogKind::Event)
    }
}

impl fmt::Display for LogKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 可以入栈的作用域类型（Event 没有 begin/end，不能入栈）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScopeKind {
    Trace,
    Action,
    Span,
}

impl From<ScopeKind> for LogKind {
    fn from(kind: ScopeKind) -> Self {
        match kind {
            ScopeKind::Trace => LogKind::Trace,
            ScopeKind::Action => LogKind::Action,
            ScopeKind::Span => LogKind::Span,
        }
    }
}

/// metadata 的标量值
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetadataValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Bytes(Vec<u8>),
}

impl From<&str> for MetadataValue {
    fn from(v: &str) -> Self {
        MetadataValue::Str(v.to_string())
    }
}

impl From<String> for MetadataValue {
    fn from(v: String) -> Self {
        MetadataValue::Str(v)
    }
}

impl From<i64> for MetadataValue {
    fn from(v: i64) -> Self {
        MetadataValue::Int(v)
    }
}

impl From<u32> for MetadataValue {
    fn from(v: u32) -> Self {
        MetadataValue::Int(i64::from(v))
    }
}

impl From<u64> for MetadataValue {
    fn from(v: u64) -> Self {
        MetadataValue::Int(i64::try_from(v).unwrap_or(i64::MAX))
    }
}

impl From<f64> for MetadataValue {
    fn from(v: f64) -> Self {
        MetadataValue::Float(v)
    }
}

impl From<bool> for MetadataValue {
    fn from(v: bool) -> Self {
        MetadataValue::Bool(v)
    }
}

impl From<Vec<u8>> for MetadataValue {
    fn from(v: Vec<u8>) -> Self {
        MetadataValue::Bytes(v)
    }
}

pub type Metadata = BTreeMap<String, MetadataValue>;

/// 持续型记录的内容字段
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DurationFields {
    pub input: String,
    pub output: String,
    pub feedback: String,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
}

/// 记录主体：持续型或瞬时型
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "shape", rename_all = "snake_case")]
pub enum RecordBody {
    Duration(DurationFields),
    Instant { context: String },
}

/// 对持续型记录的字段变更（UPDATE / END 事件携带的增量）
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScopeUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub feedback: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
}

impl ScopeUpdate {
    pub fn input(value: impl Into<String>) -> Self {
        Self {
            input: Some(value.into()),
            ..Self::default()
        }
    }

    pub fn output(value: impl Into<String>) -> Self {
        Self {
            output: Some(value.into()),
            ..Self::default()
        }
    }

    pub fn feedback(value: impl Into<String>) -> Self {
        Self {
            feedback: Some(value.into()),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.input.is_none()
            && self.output.is_none()
            && self.feedback.is_none()
            && self.end_time.is_none()
    }
}

/// 一条 Trace 记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogRecord {
    pub uid: Uuid,
    pub kind: LogKind,
    pub name: String,
    pub tags: BTreeSet<String>,
    pub metadata: Metadata,
    pub parent: Option<Uuid>,
    pub children: Vec<Uuid>,
    pub timestamp: DateTime<Utc>,
    pub body: RecordBody,
}

impl LogRecord {
    /// 新的持续型记录，start_time 为当前时间
    pub fn begin(kind: ScopeKind, name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            uid: Uuid::new_v4(),
            kind: kind.into(),
            name: name.into(),
            tags: BTreeSet::new(),
            metadata: Metadata::new(),
            parent: None,
            children: Vec::new(),
            timestamp: now,
            body: RecordBody::Duration(DurationFields {
                input: String::new(),
                output: String::new(),
                feedback: String::new(),
                start_time: now,
                end_time: None,
            }),
        }
    }

    /// 新的瞬时记录（Event）
    pub fn instant(name: impl Into<String>, context: impl Into<String>) -> Self {
        Self {
            uid: Uuid::new_v4(),
            kind: LogKind::Event,
            name: name.into(),
            tags: BTreeSet::new(),
            metadata: Metadata::new(),
            parent: None,
            children: Vec::new(),
            timestamp: Utc::now(),
            body: RecordBody::Instant {
                context: context.into(),
            },
        }
    }

    pub fn with_parent(&self, parent: Option<Uuid>) -> Self {
        let mut next = self.clone();
        next.parent = parent;
        next
    }

    /// 追加一个子记录 id（children 只增不减，且只在末尾追加）
    pub fn with_child(&self, child: Uuid) -> Self {
        let mut next = self.clone();
        next.children.push(child);
        next
    }

    pub fn with_tag(&self, tag: impl Into<String>) -> Self {
        let mut next = self.clone();
        next.tags.insert(tag.into());
        next
    }

    pub fn with_tags(&self, tags: impl IntoIterator<Item = String>) -> Self {
        let mut next = self.clone();
        next.tags.extend(tags);
        next
    }

    pub fn with_metadata(&self, key: impl Into<String>, value: impl Into<MetadataValue>) -> Self {
        let mut next = self.clone();
        next.metadata.insert(key.into(), value.into());
        next
    }

    pub fn with_metadata_map(&self, metadata: Metadata) -> Self {
        let mut next = self.clone();
        next.metadata.extend(metadata);
        next
    }

    /// 应用字段变更；瞬时记录没有这些字段，原样返回
    pub fn with_update(&self, update: &ScopeUpdate) -> Self {
        let mut next = self.clone();
        if let RecordBody::Duration(fields) = &mut next.body {
            if let Some(input) = &update.input {
                fields.input = input.clone();
            }
            if let Some(output) = &update.output {
                fields.output = output.clone();
            }
            if let Some(feedback) = &update.feedback {
                fields.feedback = feedback.clone();
            }
            if let Some(end) = update.end_time {
                fields.end_time = Some(end.max(fields.start_time));
            }
        }
        next
    }

    /// 设置结束时间；早于 start_time 的值会被截到 start_time
    pub fn with_end_time(&self, end_time: DateTime<Utc>) -> Self {
        self.with_update(&ScopeUpdate {
            end_time: Some(end_time),
            ..ScopeUpdate::default()
        })
    }

    pub fn duration_fields(&self) -> Option<&DurationFields> {
        match &self.body {
            RecordBody::Duration(fields) => Some(fields),
            RecordBody::Instant { .. } => None,
        }
    }

    pub fn context(&self) -> Option<&str> {
        match &self.body {
            RecordBody::Instant { context } => Some(context),
            RecordBody::Duration(_) => None,
        }
    }

    pub fn start_time(&self) -> Option<DateTime<Utc>> {
        self.duration_fields().map(|f| f.start_time)
    }

    pub fn end_time(&self) -> Option<DateTime<Utc>> {
        self.duration_fields().and_then(|f| f.end_time)
    }

    /// end_time - start_time；未结束或瞬时记录为 None
    pub fn duration(&self) -> Option<Duration> {
        let fields = self.duration_fields()?;
        fields.end_time.map(|end| end - fields.start_time)
    }
}

/// 事件类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LogEventType {
    Begin,
    Update,
    End,
}

/// 投递给 TraceSink 的单元
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEvent {
    pub event_type: LogEventType,
    pub record: LogRecord,
    pub previous_record: Option<LogRecord>,
    pub changes: Option<ScopeUpdate>,
}

impl LogEvent {
    pub fn begin(record: LogRecord) -> Self {
        Self {
            event_type: LogEventType::Begin,
            record,
            previous_record: None,
            changes: None,
        }
    }

    pub fn update(record: LogRecord, previous: LogRecord, changes: ScopeUpdate) -> Self {
        Self {
            event_type: LogEventType::Update,
            record,
            previous_record: Some(previous),
            changes: Some(changes),
        }
    }

    pub fn end(record: LogRecord, previous: Option<LogRecord>, changes: Option<ScopeUpdate>) -> Self {
        Self {
            event_type: LogEventType::End,
            record,
            previous_record: previous,
            changes,
        }
    }
}
