//! 环境知识：已知地点与物体
//!
//! Orchestrator 用 [`KnowledgeBase::lookup`] 检查 Task 的信息前置条件，
//! 并把检索到的条目拼进 Command 生成的提示词。

use std::collections::BTreeMap;
use std::sync::{PoisonError, RwLock};

use serde::{Deserialize, Serialize};

use crate::memory::Position;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KnowledgeKind {
    Location,
    Object,
}

impl KnowledgeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            KnowledgeKind::Location => "location",
            KnowledgeKind::Object => "object",
        }
    }
}

/// 一条已知事实
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeEntry {
    pub id: u64,
    pub name: String,
    pub description: String,
    pub kind: KnowledgeKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<Position>,
}

impl KnowledgeEntry {
    /// 提示词里的一行
    pub fn describe(&self) -> String {
        match self.position {
            Some(p) => format!(
                "{} ({}): {} @ ({:.2}, {:.2}, {:.2})",
                self.name,
                self.kind.as_str(),
                self.description,
                p.x,
                p.y,
                p.z
            ),
            None => format!("{} ({}): {}", self.name, self.kind.as_str(), self.description),
        }
    }
}

/// 知识检索接口
pub trait KnowledgeBase: Send + Sync {
    /// 按名字查找；不存在时返回空列表
    fn lookup(&self, name: &str) -> Vec<KnowledgeEntry>;

    /// 全部已知名字（按种类筛选）
    fn names(&self, kind: Option<KnowledgeKind>) -> Vec<String>;

    fn knows(&self, name: &str) -> bool {
        !self.lookup(name).is_empty()
    }
}

/// 内存实现
#[derive(Debug, Default)]
pub struct InMemoryKnowledge {
    entries: RwLock<BTreeMap<String, Vec<KnowledgeEntry>>>,
    next_id: RwLock<u64>,
}

impl InMemoryKnowledge {
    pub fn new() -> Self {
        Self::default()
    }

    /// 屋内常见地点与物体
    pub fn sample_home() -> Self {
        let kb = Self::new();
        kb.add_location("kitchen", "kitchen with a fridge and sink", Position::new(4.0, 1.5, 0.0));
        kb.add_location("living_room", "sofa and TV", Position::new(0.0, 0.0, 0.0));
        kb.add_location("desk", "work desk in the study", Position::new(2.5, -3.0, 0.0));
        kb.add_location("entrance", "front door", Position::new(-4.0, 0.5, 0.0));
        kb.add_object("apple", "a red apple on the desk", Some(Position::new(2.6, -3.1, 0.8)));
        kb.add_object("cup", "a white cup in the kitchen", Some(Position::new(4.2, 1.4, 0.9)));
        kb
    }

    fn insert(&self, name: &str, description: &str, kind: KnowledgeKind, position: Option<Position>) -> u64 {
        let id = {
            let mut next = self.next_id.write().unwrap_or_else(PoisonError::into_inner);
            *next += 1;
            *next
        };
        let entry = KnowledgeEntry {
            id,
            name: name.to_string(),
            description: description.to_string(),
            kind,
            position,
        };
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(name.to_string())
            .or_default()
            .push(entry);
        id
    }

    pub fn add_location(&self, name: &str, description: &str, position: Position) -> u64 {
        self.insert(name, description, KnowledgeKind::Location, Some(position))
    }

    pub fn add_object(&self, name: &str, description: &str, position: Option<Position>) -> u64 {
        self.insert(name, description, KnowledgeKind::Object, position)
    }

    pub fn forget(&self, name: &str) -> bool {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(name)
            .is_some()
    }
}

impl KnowledgeBase for InMemoryKnowledge {
    fn lookup(&self, name: &str) -> Vec<KnowledgeEntry> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
            .unwrap_or_default()
    }

    fn names(&self, kind: Option<KnowledgeKind>) -> Vec<String> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|(_, entries)| kind.map_or(true, |k| entries.iter().any(|e| e.kind == k)))
            .map(|(name, _)| name.clone())
            .collect()
    }
}
