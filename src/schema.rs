//! squad 数据库 Schema 定义
//!
//! 表由上游任务系统创建和写入，Bridge 只读取并回写 `posted_to_discord`。
//! 这里的 SQL 用于初始化空库（测试、本地演练）。

/// 投递标记列名
pub const DELIVERED_COLUMN: &str = "posted_to_discord";

/// 需要投递标记的表
pub const TRACKED_TABLES: &[&str] = &["activities", "tasks", "messages"];

/// 核心 Schema SQL
pub const SCHEMA_SQL: &str = r#"
-- Agents 表
CREATE TABLE IF NOT EXISTS agents (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    role TEXT
);

-- Tasks 表
CREATE TABLE IF NOT EXISTS tasks (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    title TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'inbox',
    created_at INTEGER NOT NULL,          -- 毫秒时间戳
    posted_to_discord INTEGER DEFAULT 0   -- 0/NULL=未投递, 1=已投递
);

-- 任务分配 (多对多)
CREATE TABLE IF NOT EXISTS task_assignees (
    task_id INTEGER NOT NULL REFERENCES tasks(id),
    agent_id INTEGER NOT NULL REFERENCES agents(id),
    PRIMARY KEY (task_id, agent_id)
);

-- Activities 表
CREATE TABLE IF NOT EXISTS activities (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    agent_id INTEGER REFERENCES agents(id),
    type TEXT NOT NULL,
    message TEXT NOT NULL,
    created_at INTEGER NOT NULL,
    posted_to_discord INTEGER DEFAULT 0
);

-- Messages 表
CREATE TABLE IF NOT EXISTS messages (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    from_agent_id INTEGER REFERENCES agents(id),
    task_id INTEGER REFERENCES tasks(id),
    content TEXT NOT NULL,
    created_at INTEGER NOT NULL,
    posted_to_discord INTEGER DEFAULT 0
);
"#;

/// 增量读取索引
///
/// 三个读取查询都按 (posted_to_discord, created_at) 过滤。
pub const INDEX_SQL: &str = r#"
CREATE INDEX IF NOT EXISTS idx_activities_pending ON activities(posted_to_discord, created_at);
CREATE INDEX IF NOT EXISTS idx_tasks_pending ON tasks(posted_to_discord, created_at);
CREATE INDEX IF NOT EXISTS idx_messages_pending ON messages(posted_to_discord, created_at);
"#;

/// 获取完整 Schema
pub fn full_schema(indexes: bool) -> String {
    let mut sql = SCHEMA_SQL.to_string();

    if indexes {
        sql.push_str(INDEX_SQL);
    }

    sql
}
