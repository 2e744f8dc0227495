//! EventTracer：层级化的 Trace / Action / Span 作用域与瞬时 Event
//!
//! 嵌套关系完全由显式栈表达：begin 入栈并挂到栈顶之下，end 按 LIFO 出栈。
//! BEGIN / UPDATE 只投递给实时 sink；END（含瞬时 Event）投递给所有 sink。
//! 栈为空时 update / end 是空操作，追踪层永远不会中断被观测的流程。
//!
//! 每个编排流程持有自己的实例（`Arc<EventTracer>`），不存在全局单例。

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::observability::record::{
    LogEvent, LogRecord, Metadata, MetadataValue, ScopeKind, ScopeUpdate,
};
use crate::observability::sink::TraceSink;

#[derive(Default)]
pub struct EventTracer {
    stack: Mutex<Vec<LogRecord>>,
    sinks: RwLock<Vec<Arc<dyn TraceSink>>>,
}

impl fmt::Debug for EventTracer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventTracer")
            .field("depth", &self.depth())
            .field("sinks", &self.sink_count())
            .finish()
    }
}

impl EventTracer {
    pub fn new() -> Self {
        Self::default()
    }

    fn stack(&self) -> MutexGuard<'_, Vec<LogRecord>> {
        self.stack.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn register_sink(&self, sink: Arc<dyn TraceSink>) {
        self.sinks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(sink);
    }

    /// 按指针相等移除；返回是否找到
    pub fn unregister_sink(&self, sink: &Arc<dyn TraceSink>) -> bool {
        let mut sinks = self.sinks.write().unwrap_or_else(PoisonError::into_inner);
        let before = sinks.len();
        sinks.retain(|s| !Arc::ptr_eq(s, sink));
        sinks.len() != before
    }

    pub fn sink_count(&self) -> usize {
        self.sinks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// 当前打开的作用域数
    pub fn depth(&self) -> usize {
        self.stack().len()
    }

    /// 栈顶作用域
    pub fn current(&self) -> Option<Uuid> {
        self.stack().last().map(|r| r.uid)
    }

    /// 栈中某条记录的当前快照
    pub fn open_record(&self, uid: Uuid) -> Option<LogRecord> {
        self.stack().iter().find(|r| r.uid == uid).cloned()
    }

    fn dispatch(&self, events: Vec<LogEvent>, realtime_only: bool) {
        if events.is_empty() {
            return;
        }
        let sinks: Vec<Arc<dyn TraceSink>> = self
            .sinks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|s| !realtime_only || s.is_realtime())
            .cloned()
            .collect();
        for event in &events {
            for sink in &sinks {
                sink.handle(event);
            }
        }
    }

    /// 打开一个持续型作用域，挂到当前栈顶之下
    pub fn begin_scope(
        &self,
        kind: ScopeKind,
        name: &str,
        tags: &[&str],
        metadata: Metadata,
    ) -> Uuid {
        let event = {
            let mut stack = self.stack();
            let parent = stack.last().map(|r| r.uid);
            let record = LogRecord::begin(kind, name)
                .with_tags(tags.iter().map(|t| t.to_string()))
                .with_metadata_map(metadata)
                .with_parent(parent);
            if let Some(top) = stack.last_mut() {
                *top = top.with_child(record.uid);
            }
            stack.push(record.clone());
            LogEvent::begin(record)
        };
        let uid = event.record.uid;
        self.dispatch(vec![event], true);
        uid
    }

    /// 修改栈顶记录
    pub fn update_scope(&self, update: ScopeUpdate) {
        self.update_where(None, update);
    }

    /// 修改栈中指定记录（不要求在栈顶）；找不到时为空操作
    pub fn update_scope_of(&self, uid: Uuid, update: ScopeUpdate) {
        self.update_where(Some(uid), update);
    }

    /// 给打开中的作用域追加 metadata
    pub fn annotate(&self, uid: Uuid, key: &str, value: impl Into<MetadataValue>) {
        let mut stack = self.stack();
        if let Some(record) = stack.iter_mut().rev().find(|r| r.uid == uid) {
            *record = record.with_metadata(key, value);
        }
    }

    fn update_where(&self, uid: Option<Uuid>, update: ScopeUpdate) {
        if update.is_empty() {
            return;
        }
        let event = {
            let mut stack = self.stack();
            let slot = match uid {
                None => stack.last_mut(),
                Some(uid) => stack.iter_mut().rev().find(|r| r.uid == uid),
            };
            let Some(slot) = slot else {
                return;
            };
            let previous = slot.clone();
            *slot = previous.with_update(&update);
            LogEvent::update(slot.clone(), previous, update)
        };
        self.dispatch(vec![event], true);
    }

    /// 结束作用域（None 表示栈顶），end_time 为当前时间；返回实际结束的记录数
    pub fn end_scope(&self, uid: Option<Uuid>) -> usize {
        self.end_scope_at(uid, Utc::now())
    }

    /// 结束作用域：目标之上的所有记录按 LIFO 依次结束；目标不在栈中时为空操作
    pub fn end_scope_at(&self, uid: Option<Uuid>, end_time: DateTime<Utc>) -> usize {
        let events = {
            let mut stack = self.stack();
            let index = match uid {
                None if stack.is_empty() => return 0,
                None => stack.len() - 1,
                Some(uid) => match stack.iter().rposition(|r| r.uid == uid) {
                    Some(index) => index,
                    None => return 0,
                },
            };

            let mut events = Vec::with_capacity(stack.len() - index);
            while stack.len() > index {
                let Some(record) = stack.pop() else {
                    break;
                };
                let changes = ScopeUpdate {
                    end_time: Some(end_time),
                    ..ScopeUpdate::default()
                };
                let ended = record.with_update(&changes);
                events.push(LogEvent::end(ended, Some(record), Some(changes)));
            }
            events
        };
        let count = events.len();
        self.dispatch(events, false);
        count
    }

    /// 发出瞬时 Event：挂到栈顶之下但不入栈，只产生一个 END 事件
    pub fn emit_instant(
        &self,
        name: &str,
        context: &str,
        tags: &[&str],
        metadata: Metadata,
    ) -> Uuid {
        let event = {
            let mut stack = self.stack();
            let parent = stack.last().map(|r| r.uid);
            let record = LogRecord::instant(name, context)
                .with_tags(tags.iter().map(|t| t.to_string()))
                .with_metadata_map(metadata)
                .with_parent(parent);
            if let Some(top) = stack.last_mut() {
                *top = top.with_child(record.uid);
            }
            LogEvent::end(record, None, None)
        };
        let uid = event.record.uid;
        self.dispatch(vec![event], false);
        uid
    }

    pub fn event(&self, name: &str, context: &str) -> Uuid {
        self.emit_instant(name, context, &[], Metadata::new())
    }

    /// 打开作用域并返回守卫；守卫被丢弃时结束该作用域
    pub fn scope(
        self: &Arc<Self>,
        kind: ScopeKind,
        name: &str,
        tags: &[&str],
        metadata: Metadata,
    ) -> ScopeGuard {
        let uid = self.begin_scope(kind, name, tags, metadata);
        ScopeGuard {
            tracer: Arc::clone(self),
            uid,
        }
    }

    pub fn trace(self: &Arc<Self>, name: &str) -> ScopeGuard {
        self.scope(ScopeKind::Trace, name, &[], Metadata::new())
    }

    pub fn action(self: &Arc<Self>, name: &str) -> ScopeGuard {
        self.scope(ScopeKind::Action, name, &[], Metadata::new())
    }

    pub fn span(self: &Arc<Self>, name: &str) -> ScopeGuard {
        self.scope(ScopeKind::Span, name, &[], Metadata::new())
    }
}

/// 作用域守卫：任何退出路径（包括 `?` 提前返回）都会结束作用域
#[must_use = "dropping the guard ends the scope immediately"]
pub struct ScopeGuard {
    tracer: Arc<EventTracer>,
    uid: Uuid,
}

impl ScopeGuard {
    pub fn uid(&self) -> Uuid {
        self.uid
    }

    pub fn input(&self, value: impl Into<String>) {
        self.tracer.update_scope_of(self.uid, ScopeUpdate::input(value));
    }

    pub fn output(&self, value: impl Into<String>) {
        self.tracer.update_scope_of(self.uid, ScopeUpdate::output(value));
    }

    pub fn feedback(&self, value: impl Into<String>) {
        self.tracer
            .update_scope_of(self.uid, ScopeUpdate::feedback(value));
    }

    pub fn metadata(&self, key: &str, value: impl Into<MetadataValue>) {
        self.tracer.annotate(self.uid, key, value);
    }

    /// 错误时把错误文本写进 feedback；原样返回结果
    pub fn record<T, E: fmt::Display>(&self, result: Result<T, E>) -> Result<T, E> {
        if let Err(e) = &result {
            self.feedback(e.to_string());
        }
        result
    }
}

impl Drop for ScopeGuard {
    fn drop(&mut self) {
        self.tracer.end_scope(Some(self.uid));
    }
}
