//! 数据库迁移模块
//!
//! 上游老版本的库可能没有 `posted_to_discord` 列。
//! Bridge 启动时补齐该列和增量读取索引，已有数据保持不变。

use rusqlite::{Connection, Result as SqliteResult};
use tracing::{info, warn};

use crate::schema::{DELIVERED_COLUMN, INDEX_SQL, TRACKED_TABLES};

/// 检查表是否存在
fn table_exists(conn: &Connection, table: &str) -> SqliteResult<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name=?1",
        [table],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

/// 检查列是否存在
fn column_exists(conn: &Connection, table: &str, column: &str) -> SqliteResult<bool> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", table))?;
    let columns = stmt.query_map([], |row| {
        let col_name: String = row.get(1)?;
        Ok(col_name)
    })?;

    for col_name in columns.flatten() {
        if col_name == column {
            return Ok(true);
        }
    }

    Ok(false)
}

/// 为单个表补齐投递标记列，返回是否新增
fn ensure_delivered_column(conn: &Connection, table: &str) -> SqliteResult<bool> {
    if column_exists(conn, table, DELIVERED_COLUMN)? {
        return Ok(false);
    }

    info!("Adding {}.{} column", table, DELIVERED_COLUMN);
    conn.execute(
        &format!(
            "ALTER TABLE {} ADD COLUMN {} INTEGER DEFAULT 0",
            table, DELIVERED_COLUMN
        ),
        [],
    )?;
    Ok(true)
}

/// 执行所有迁移
///
/// 缺失的表只记录警告：读取时会以数据库错误的形式暴露出来。
pub fn run_migrations(conn: &Connection) -> SqliteResult<usize> {
    let mut added = 0;
    let mut all_present = true;

    for table in TRACKED_TABLES {
        if !table_exists(conn, table)? {
            warn!("{} table does not exist, skipping migration", table);
            all_present = false;
            continue;
        }
        if ensure_delivered_column(conn, table)? {
            added += 1;
        }
    }

    if all_present {
        conn.execute_batch(INDEX_SQL)?;
    }

    if added > 0 {
        info!("Migration complete: {} column(s) added", added);
    }

    Ok(added)
}
