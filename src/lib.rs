//! squad-bridge - squad 数据库到聊天频道的镜像
//!
//! 把多 Agent 任务系统写入 SQLite 的活动、任务、消息增量转发到聊天频道，
//! 让旁观者不用查库也能看到 Agent 的工作动态。
//!
//! # 核心功能
//!
//! - **增量读取**: 水位线之后、尚未投递的记录
//! - **格式化**: 按记录种类生成通知文本
//! - **投递**: 外部命令（带超时），成功后回写 `posted_to_discord`
//! - **检查点**: 周期完成后才推进，崩溃重启只会重看同一窗口
//!
//! # 架构
//!
//! 存储、检查点、投递都是 trait，`Bridge` 在构造时注入，
//! 测试可以替换成内存实现而不触碰真实数据库或传输。

pub mod bridge;
pub mod checkpoint;
pub mod config;
pub mod db;
pub mod delivery;
pub mod error;
pub mod format;
pub mod migrations;
pub mod schema;
pub mod types;

// Re-exports
pub use bridge::{current_time_ms, Bridge, CycleReport, KindReport};
pub use checkpoint::{CheckpointStore, FileCheckpoint, MemoryCheckpoint, Watermark};
pub use config::{BridgeConfig, DeliveryConfig};
pub use db::{MessageFilter, RecordStore, SquadDB};
pub use delivery::{CommandDeliverer, Deliverer, RecordingDeliverer};
pub use error::{Error, Result};
pub use format::Notification;
pub use types::*;
