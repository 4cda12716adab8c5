//! 数据库读取和投递标记
//!
//! 每次操作单独打开连接，操作结束即释放，不跨周期持有连接。

use std::path::{Path, PathBuf};
use std::time::Duration;

use aho_corasick::AhoCorasick;
use rusqlite::{params, params_from_iter, Connection, OpenFlags};

use crate::error::{Error, Result};
use crate::migrations;
use crate::schema::{self, DELIVERED_COLUMN};
use crate::types::{Activity, Candidates, Message, RecordId, RecordKind, Task};

/// 等待上游写锁的最长时间
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// 单条 UPDATE 中的最大 id 数量
const MARK_CHUNK_SIZE: usize = 500;

/// 记录存储接口
///
/// 读取只返回 `created_at > since` 且未投递的记录，按 (created_at, id) 升序。
/// 同步写入的库里 `created_at` 可能是 REAL，读出时截断为整数毫秒。
pub trait RecordStore: Send + Sync {
    /// 读取新活动
    fn fetch_activities(&self, since: i64) -> Result<Vec<Activity>>;

    /// 读取新任务（带负责人名称）
    fn fetch_tasks(&self, since: i64) -> Result<Vec<Task>>;

    /// 读取命中触发词的新消息
    fn fetch_messages(&self, since: i64, filter: &MessageFilter) -> Result<Vec<Message>>;

    /// 标记已投递，返回受影响行数
    ///
    /// `ids` 为空时不发出任何写入。
    fn mark_delivered(&self, kind: RecordKind, ids: &[RecordId]) -> Result<usize>;

    /// 一次读取三种记录
    fn fetch_candidates(&self, since: i64, filter: &MessageFilter) -> Result<Candidates> {
        Ok(Candidates {
            activities: self.fetch_activities(since)?,
            tasks: self.fetch_tasks(since)?,
            messages: self.fetch_messages(since, filter)?,
        })
    }
}

/// 消息触发词过滤器
///
/// 字面子串匹配，区分大小写。没有触发词时不放行任何消息。
#[derive(Debug, Clone)]
pub struct MessageFilter {
    triggers: Vec<String>,
    matcher: Option<AhoCorasick>,
}

impl MessageFilter {
    pub fn new<I, S>(triggers: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let triggers: Vec<String> = triggers
            .into_iter()
            .map(Into::into)
            .filter(|t: &String| !t.is_empty())
            .collect();

        let matcher = if triggers.is_empty() {
            None
        } else {
            Some(
                AhoCorasick::new(&triggers)
                    .map_err(|e| Error::Config(format!("无法构建触发词匹配器: {}", e)))?,
            )
        };

        Ok(Self { triggers, matcher })
    }

    /// 内容是否包含任意触发词
    pub fn is_match(&self, content: &str) -> bool {
        self.matcher
            .as_ref()
            .map(|m| m.is_match(content))
            .unwrap_or(false)
    }

    pub fn triggers(&self) -> &[String] {
        &self.triggers
    }
}

/// squad 数据库
#[derive(Debug, Clone)]
pub struct SquadDB {
    path: PathBuf,
}

impl SquadDB {
    /// 连接已有数据库
    ///
    /// 数据库文件必须存在（由上游系统创建）；启动时补齐投递标记列。
    pub fn connect<P: Into<PathBuf>>(path: P) -> Result<Self> {
        let db = Self { path: path.into() };

        if !db.path.exists() {
            return Err(Error::Config(format!(
                "数据库不存在: {}",
                db.path.display()
            )));
        }

        let conn = db.open()?;
        migrations::run_migrations(&conn)?;

        tracing::info!("数据库已连接: {:?}", db.path);
        Ok(db)
    }

    /// 创建并初始化空数据库（本地演练、测试用）
    pub fn init<P: Into<PathBuf>>(path: P) -> Result<Self> {
        let path = path.into();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(&path)?;
        conn.execute_batch(&schema::full_schema(true))?;
        drop(conn);

        Self::connect(path)
    }

    /// 数据库路径
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 打开一个新连接
    fn open(&self) -> Result<Connection> {
        let conn = Connection::open_with_flags(
            &self.path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_URI
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        Ok(conn)
    }

    /// 获取一个新连接 (用于测试)
    #[doc(hidden)]
    pub fn connection(&self) -> Result<Connection> {
        self.open()
    }

    /// 统计某类未投递记录数量
    pub fn count_pending(&self, kind: RecordKind) -> Result<i64> {
        let conn = self.open()?;
        let sql = format!(
            "SELECT COUNT(*) FROM {} WHERE {} = 0 OR {} IS NULL",
            kind.table(),
            DELIVERED_COLUMN,
            DELIVERED_COLUMN
        );
        conn.query_row(&sql, [], |row| row.get(0))
            .map_err(Into::into)
    }
}

impl RecordStore for SquadDB {
    fn fetch_activities(&self, since: i64) -> Result<Vec<Activity>> {
        let conn = self.open()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT a.id, COALESCE(ag.name, 'unknown'), COALESCE(a.type, ''),
                   COALESCE(a.message, ''), CAST(a.created_at AS INTEGER)
            FROM activities a
            LEFT JOIN agents ag ON a.agent_id = ag.id
            WHERE a.created_at > ?1
              AND (a.posted_to_discord = 0 OR a.posted_to_discord IS NULL)
            ORDER BY a.created_at ASC, a.id ASC
            "#,
        )?;

        let rows = stmt.query_map(params![since], |row| {
            Ok(Activity {
                id: row.get(0)?,
                agent_name: row.get(1)?,
                activity_type: row.get::<_, String>(2)?.into(),
                message: row.get(3)?,
                created_at: row.get(4)?,
            })
        })?;

        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Into::into)
    }

    fn fetch_tasks(&self, since: i64) -> Result<Vec<Task>> {
        let conn = self.open()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT t.id, COALESCE(t.title, ''), COALESCE(t.status, ''),
                   CAST(t.created_at AS INTEGER)
            FROM tasks t
            WHERE t.created_at > ?1
              AND (t.posted_to_discord = 0 OR t.posted_to_discord IS NULL)
            ORDER BY t.created_at ASC, t.id ASC
            "#,
        )?;

        let mut tasks = stmt
            .query_map(params![since], |row| {
                Ok(Task {
                    id: row.get(0)?,
                    title: row.get(1)?,
                    status: row.get::<_, String>(2)?.into(),
                    assignee_names: None,
                    created_at: row.get(3)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        // 负责人按名称排序后用逗号连接
        let mut assignees = conn.prepare(
            r#"
            SELECT ag.name
            FROM task_assignees ta
            INNER JOIN agents ag ON ta.agent_id = ag.id
            WHERE ta.task_id = ?1
            ORDER BY ag.name ASC, ag.id ASC
            "#,
        )?;

        for task in &mut tasks {
            let names = assignees
                .query_map(params![task.id], |row| row.get::<_, String>(0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            if !names.is_empty() {
                task.assignee_names = Some(names.join(","));
            }
        }

        Ok(tasks)
    }

    fn fetch_messages(&self, since: i64, filter: &MessageFilter) -> Result<Vec<Message>> {
        let conn = self.open()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT m.id, COALESCE(ag.name, 'unknown'), COALESCE(t.title, 'unknown'),
                   COALESCE(m.content, ''), CAST(m.created_at AS INTEGER)
            FROM messages m
            LEFT JOIN agents ag ON m.from_agent_id = ag.id
            LEFT JOIN tasks t ON m.task_id = t.id
            WHERE m.created_at > ?1
              AND (m.posted_to_discord = 0 OR m.posted_to_discord IS NULL)
            ORDER BY m.created_at ASC, m.id ASC
            "#,
        )?;

        let rows = stmt.query_map(params![since], |row| {
            Ok(Message {
                id: row.get(0)?,
                agent_name: row.get(1)?,
                task_title: row.get(2)?,
                content: row.get(3)?,
                created_at: row.get(4)?,
            })
        })?;

        let mut messages = Vec::new();
        for row in rows {
            let message = row?;
            if filter.is_match(&message.content) {
                messages.push(message);
            }
        }

        Ok(messages)
    }

    fn mark_delivered(&self, kind: RecordKind, ids: &[RecordId]) -> Result<usize> {
        if ids.is_empty() {
            return Ok(0);
        }

        let mut conn = self.open()?;
        let tx = conn.transaction()?;
        let mut count = 0;

        for chunk in ids.chunks(MARK_CHUNK_SIZE) {
            let placeholders: String = chunk.iter().map(|_| "?").collect::<Vec<_>>().join(",");
            let sql = format!(
                "UPDATE {} SET {} = 1 WHERE id IN ({})",
                kind.table(),
                DELIVERED_COLUMN,
                placeholders
            );
            count += tx.execute(&sql, params_from_iter(chunk.iter()))?;
        }

        tx.commit()?;
        tracing::debug!("标记已投递: {} {} 条", kind, count);
        Ok(count)
    }
}
