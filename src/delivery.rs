//! 投递客户端
//!
//! 核心只关心成功与否：超时、启动失败、非零退出码一律视为未投递。

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::process::Command;

use crate::config::DeliveryConfig;

/// 投递接口
#[async_trait]
pub trait Deliverer: Send + Sync {
    /// 发送一条文本到指定频道，返回是否成功
    async fn deliver(&self, channel: &str, text: &str) -> bool;
}

/// 外部命令投递
///
/// 调用形式：`<program> message send --channel <platform> --target <channel> --message <text>`
#[derive(Debug, Clone)]
pub struct CommandDeliverer {
    program: String,
    platform: String,
    timeout: Duration,
}

impl CommandDeliverer {
    pub fn new(config: &DeliveryConfig) -> Self {
        Self {
            program: config.program.clone(),
            platform: config.platform.clone(),
            timeout: config.timeout,
        }
    }

    fn command(&self, channel: &str, text: &str) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(["message", "send", "--channel"])
            .arg(&self.platform)
            .arg("--target")
            .arg(channel)
            .arg("--message")
            .arg(text)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            // 超时或调用被放弃时杀掉子进程
            .kill_on_drop(true);
        cmd
    }
}

#[async_trait]
impl Deliverer for CommandDeliverer {
    async fn deliver(&self, channel: &str, text: &str) -> bool {
        let child = match self.command(channel, text).spawn() {
            Ok(child) => child,
            Err(e) => {
                tracing::warn!("⚠️ 无法启动投递命令 {:?}: {}", self.program, e);
                return false;
            }
        };

        match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(Ok(output)) if output.status.success() => true,
            Ok(Ok(output)) => {
                tracing::warn!(
                    "⚠️ 投递失败 ({}): {}",
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                );
                false
            }
            Ok(Err(e)) => {
                tracing::warn!("⚠️ 投递命令执行失败: {}", e);
                false
            }
            Err(_) => {
                tracing::warn!("⏰ 投递超时 ({:?})", self.timeout);
                false
            }
        }
    }
}

/// 记录型投递（测试替身）
///
/// 记录每一次调用；`fail_when` 命中的文本返回失败。
#[derive(Default)]
pub struct RecordingDeliverer {
    sent: Mutex<Vec<(String, String)>>,
    attempts: Mutex<usize>,
    fail_when: Mutex<Vec<String>>,
}

impl RecordingDeliverer {
    pub fn new() -> Self {
        Self::default()
    }

    /// 文本包含 `needle` 时投递失败
    pub fn fail_when_contains(&self, needle: &str) {
        self.fail_when.lock().push(needle.to_string());
    }

    /// 清除失败规则
    pub fn heal(&self) {
        self.fail_when.lock().clear();
    }

    /// 成功投递的 (channel, text)
    pub fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().clone()
    }

    /// 调用次数（含失败）
    pub fn attempts(&self) -> usize {
        *self.attempts.lock()
    }
}

#[async_trait]
impl Deliverer for RecordingDeliverer {
    async fn deliver(&self, channel: &str, text: &str) -> bool {
        *self.attempts.lock() += 1;

        if self.fail_when.lock().iter().any(|n| text.contains(n.as_str())) {
            return false;
        }

        self.sent.lock().push((channel.to_string(), text.to_string()));
        true
    }
}
