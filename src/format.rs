//! 通知格式化
//!
//! 纯函数：同样的记录永远得到同样的文本，未知类型/状态使用默认图标。

use serde::Serialize;

use crate::types::{Activity, ActivityType, Candidates, Message, RecordId, RecordKind, Task, TaskStatus};

/// 消息内容最大字符数
pub const MESSAGE_PREVIEW_CHARS: usize = 200;

/// 无负责人时的显示
pub const UNASSIGNED: &str = "Unassigned";

/// 活动图标
pub fn activity_icon(activity_type: &ActivityType) -> &'static str {
    match activity_type {
        ActivityType::TaskCreated => "📋",
        ActivityType::TaskAssigned => "👤",
        ActivityType::TaskCompleted => "✅",
        ActivityType::MessageSent => "💬",
        ActivityType::DocumentCreated => "📝",
        ActivityType::AgentBlocked => "🚫",
        ActivityType::AgentActive => "▶️",
        ActivityType::Other(_) => "•",
    }
}

/// 任务状态图标
pub fn status_icon(status: &TaskStatus) -> &'static str {
    match status {
        TaskStatus::Inbox => "📥",
        TaskStatus::Assigned => "👤",
        TaskStatus::InProgress => "🔧",
        TaskStatus::Review => "👀",
        TaskStatus::Done => "✅",
        TaskStatus::Blocked => "🚫",
        TaskStatus::Other(_) => "📋",
    }
}

pub fn format_activity(activity: &Activity) -> String {
    format!(
        "{} **{}**: {}",
        activity_icon(&activity.activity_type),
        activity.agent_name,
        activity.message
    )
}

pub fn format_task(task: &Task) -> String {
    let assignees = task
        .assignee_names
        .as_deref()
        .filter(|names| !names.is_empty())
        .unwrap_or(UNASSIGNED);

    format!(
        "📋 **New Task**: {}\n   Status: {} {} | Assigned: {}",
        task.title,
        status_icon(&task.status),
        task.status,
        assignees
    )
}

pub fn format_message(message: &Message) -> String {
    format!(
        "💬 **{}** in *{}*:\n> {}",
        message.agent_name,
        message.task_title,
        truncate_chars(&message.content, MESSAGE_PREVIEW_CHARS)
    )
}

/// 一条待投递的通知
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notification {
    pub kind: RecordKind,
    pub id: RecordId,
    pub created_at: i64,
    pub text: String,
}

/// 渲染一个周期的全部候选记录
///
/// 顺序：活动、任务、消息；每种内部保持读取顺序。
pub fn render_all(candidates: &Candidates) -> Vec<Notification> {
    let activities = candidates.activities.iter().map(|a| Notification {
        kind: RecordKind::Activity,
        id: a.id.clone(),
        created_at: a.created_at,
        text: format_activity(a),
    });
    let tasks = candidates.tasks.iter().map(|t| Notification {
        kind: RecordKind::Task,
        id: t.id.clone(),
        created_at: t.created_at,
        text: format_task(t),
    });
    let messages = candidates.messages.iter().map(|m| Notification {
        kind: RecordKind::Message,
        id: m.id.clone(),
        created_at: m.created_at,
        text: format_message(m),
    });

    activities.chain(tasks).chain(messages).collect()
}

/// 按 Unicode 字符截断，超出时追加 "..."
fn truncate_chars(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => format!("{}...", &s[..byte_idx]),
        None => s.to_string(),
    }
}
