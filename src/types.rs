//! 数据类型定义

use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};
use std::fmt;

/// 记录 ID
///
/// 上游库里的 id 可能是整数主键，也可能是外部系统同步过来的字符串。
/// 按原始类型读出、原样写回，避免 SQLite 类型亲和性导致标记落空。
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RecordId {
    Int(i64),
    Text(String),
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordId::Int(id) => write!(f, "{}", id),
            RecordId::Text(id) => write!(f, "{}", id),
        }
    }
}

impl From<i64> for RecordId {
    fn from(id: i64) -> Self {
        RecordId::Int(id)
    }
}

impl From<&str> for RecordId {
    fn from(id: &str) -> Self {
        RecordId::Text(id.to_string())
    }
}

impl FromSql for RecordId {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        match value {
            ValueRef::Integer(id) => Ok(RecordId::Int(id)),
            ValueRef::Text(_) => value.as_str().map(|s| RecordId::Text(s.to_string())),
            _ => Err(FromSqlError::InvalidType),
        }
    }
}

impl ToSql for RecordId {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        match self {
            RecordId::Int(id) => Ok(ToSqlOutput::from(*id)),
            RecordId::Text(id) => Ok(ToSqlOutput::from(id.as_str())),
        }
    }
}

/// 记录种类
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordKind {
    Activity,
    Task,
    Message,
}

impl RecordKind {
    /// 所有种类（按投递顺序）
    pub const ALL: [RecordKind; 3] = [RecordKind::Activity, RecordKind::Task, RecordKind::Message];

    /// 对应的表名
    pub fn table(&self) -> &'static str {
        match self {
            RecordKind::Activity => "activities",
            RecordKind::Task => "tasks",
            RecordKind::Message => "messages",
        }
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordKind::Activity => write!(f, "activity"),
            RecordKind::Task => write!(f, "task"),
            RecordKind::Message => write!(f, "message"),
        }
    }
}

/// 活动类型
///
/// 未知类型保留原始字符串，格式化时使用默认图标。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ActivityType {
    TaskCreated,
    TaskAssigned,
    TaskCompleted,
    MessageSent,
    DocumentCreated,
    AgentBlocked,
    AgentActive,
    Other(String),
}

impl From<&str> for ActivityType {
    fn from(s: &str) -> Self {
        match s {
            "task_created" => ActivityType::TaskCreated,
            "task_assigned" => ActivityType::TaskAssigned,
            "task_completed" => ActivityType::TaskCompleted,
            "message_sent" => ActivityType::MessageSent,
            "document_created" => ActivityType::DocumentCreated,
            "agent_blocked" => ActivityType::AgentBlocked,
            "agent_active" => ActivityType::AgentActive,
            other => ActivityType::Other(other.to_string()),
        }
    }
}

impl From<String> for ActivityType {
    fn from(s: String) -> Self {
        ActivityType::from(s.as_str())
    }
}

impl From<ActivityType> for String {
    fn from(t: ActivityType) -> Self {
        t.to_string()
    }
}

impl fmt::Display for ActivityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActivityType::TaskCreated => write!(f, "task_created"),
            ActivityType::TaskAssigned => write!(f, "task_assigned"),
            ActivityType::TaskCompleted => write!(f, "task_completed"),
            ActivityType::MessageSent => write!(f, "message_sent"),
            ActivityType::DocumentCreated => write!(f, "document_created"),
            ActivityType::AgentBlocked => write!(f, "agent_blocked"),
            ActivityType::AgentActive => write!(f, "agent_active"),
            ActivityType::Other(s) => write!(f, "{}", s),
        }
    }
}

/// 任务状态
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum TaskStatus {
    Inbox,
    Assigned,
    InProgress,
    Review,
    Done,
    Blocked,
    Other(String),
}

impl From<&str> for TaskStatus {
    fn from(s: &str) -> Self {
        match s {
            "inbox" => TaskStatus::Inbox,
            "assigned" => TaskStatus::Assigned,
            "in_progress" => TaskStatus::InProgress,
            "review" => TaskStatus::Review,
            "done" => TaskStatus::Done,
            "blocked" => TaskStatus::Blocked,
            other => TaskStatus::Other(other.to_string()),
        }
    }
}

impl From<String> for TaskStatus {
    fn from(s: String) -> Self {
        TaskStatus::from(s.as_str())
    }
}

impl From<TaskStatus> for String {
    fn from(s: TaskStatus) -> Self {
        s.to_string()
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskStatus::Inbox => write!(f, "inbox"),
            TaskStatus::Assigned => write!(f, "assigned"),
            TaskStatus::InProgress => write!(f, "in_progress"),
            TaskStatus::Review => write!(f, "review"),
            TaskStatus::Done => write!(f, "done"),
            TaskStatus::Blocked => write!(f, "blocked"),
            TaskStatus::Other(s) => write!(f, "{}", s),
        }
    }
}

/// 活动记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Activity {
    pub id: RecordId,
    pub agent_name: String,
    pub activity_type: ActivityType,
    pub message: String,
    pub created_at: i64,
}

/// 任务记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: RecordId,
    pub title: String,
    pub status: TaskStatus,
    /// 逗号连接的负责人名称，无负责人时为 None
    pub assignee_names: Option<String>,
    pub created_at: i64,
}

/// 消息记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: RecordId,
    pub agent_name: String,
    pub task_title: String,
    pub content: String,
    pub created_at: i64,
}

/// 一个周期读到的待投递记录
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Candidates {
    pub activities: Vec<Activity>,
    pub tasks: Vec<Task>,
    pub messages: Vec<Message>,
}

impl Candidates {
    /// 记录总数
    pub fn total(&self) -> usize {
        self.activities.len() + self.tasks.len() + self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }
}
