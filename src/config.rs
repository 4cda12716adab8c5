//! Bridge 配置
//!
//! 所有选项都有默认值，可通过环境变量覆盖。
//! `from_lookup` 接受任意查找函数，测试时无需修改进程环境变量。

use std::path::PathBuf;
use std::time::Duration;

use crate::error::{Error, Result};

/// 默认数据库路径（相对于工作目录）
pub const DEFAULT_DB_PATH: &str = "../shared-state/sqlite/squad.db";
/// 默认目标频道
pub const DEFAULT_CHANNEL: &str = "agent-squad";
/// 默认轮询间隔（秒）
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 30;
/// 默认检查点文件
pub const DEFAULT_CHECKPOINT_FILE: &str = ".last_check";
/// 默认投递命令
pub const DEFAULT_DELIVERY_COMMAND: &str = "openclaw";
/// 默认投递平台（传给投递命令的 `--channel`）
pub const DEFAULT_DELIVERY_PLATFORM: &str = "discord";
/// 默认单次投递超时（秒）
pub const DEFAULT_DELIVERY_TIMEOUT_SECS: u64 = 10;

/// 默认消息触发词
///
/// 消息内容包含其中任意一个（区分大小写）才会被转发。
pub const DEFAULT_TRIGGERS: &[&str] = &[
    "@human",
    "needs review",
    "please review",
    "ready for",
    "completed",
];

/// 环境变量名
pub mod env {
    pub const DB: &str = "SQUAD_DB";
    pub const CHANNEL: &str = "DISCORD_CHANNEL";
    pub const POLL_INTERVAL: &str = "POLL_INTERVAL";
    pub const CHECKPOINT_FILE: &str = "BRIDGE_CHECKPOINT_FILE";
    pub const DELIVERY_COMMAND: &str = "BRIDGE_DELIVERY_COMMAND";
    pub const DELIVERY_PLATFORM: &str = "BRIDGE_DELIVERY_PLATFORM";
    pub const DELIVERY_TIMEOUT: &str = "BRIDGE_DELIVERY_TIMEOUT";
    pub const TRIGGERS: &str = "BRIDGE_TRIGGERS";
}

/// 投递命令配置
#[derive(Debug, Clone)]
pub struct DeliveryConfig {
    /// 外部投递程序
    pub program: String,
    /// 平台名称
    pub platform: String,
    /// 单次调用超时
    pub timeout: Duration,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            program: DEFAULT_DELIVERY_COMMAND.to_string(),
            platform: DEFAULT_DELIVERY_PLATFORM.to_string(),
            timeout: Duration::from_secs(DEFAULT_DELIVERY_TIMEOUT_SECS),
        }
    }
}

/// Bridge 配置
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// squad 数据库路径
    pub db_path: PathBuf,
    /// 目标频道
    pub channel: String,
    /// 两次周期之间的间隔
    pub poll_interval: Duration,
    /// 检查点文件路径
    pub checkpoint_path: PathBuf,
    /// 投递配置
    pub delivery: DeliveryConfig,
    /// 消息触发词
    pub triggers: Vec<String>,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            db_path: expand_path(DEFAULT_DB_PATH),
            channel: DEFAULT_CHANNEL.to_string(),
            poll_interval: Duration::from_secs(DEFAULT_POLL_INTERVAL_SECS),
            checkpoint_path: PathBuf::from(DEFAULT_CHECKPOINT_FILE),
            delivery: DeliveryConfig::default(),
            triggers: DEFAULT_TRIGGERS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl BridgeConfig {
    /// 从进程环境变量创建配置
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// 从查找函数创建配置
    ///
    /// 未设置或为空的变量使用默认值；格式错误返回 `Error::Config`。
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let mut config = Self::default();

        if let Some(path) = get(env::DB) {
            config.db_path = expand_path(&path);
        }
        if let Some(channel) = get(env::CHANNEL) {
            config.channel = channel;
        }
        if let Some(secs) = get(env::POLL_INTERVAL) {
            config.poll_interval = parse_secs(env::POLL_INTERVAL, &secs)?;
        }
        if let Some(path) = get(env::CHECKPOINT_FILE) {
            config.checkpoint_path = expand_path(&path);
        }
        if let Some(program) = get(env::DELIVERY_COMMAND) {
            config.delivery.program = program;
        }
        if let Some(platform) = get(env::DELIVERY_PLATFORM) {
            config.delivery.platform = platform;
        }
        if let Some(secs) = get(env::DELIVERY_TIMEOUT) {
            config.delivery.timeout = parse_secs(env::DELIVERY_TIMEOUT, &secs)?;
        }
        if let Some(raw) = get(env::TRIGGERS) {
            config.triggers = parse_triggers(&raw)?;
        }

        Ok(config)
    }
}

/// 展开 `~` 和环境变量
pub fn expand_path(path: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(path).as_ref())
}

/// 解析正整数秒数
fn parse_secs(key: &str, value: &str) -> Result<Duration> {
    match value.parse::<u64>() {
        Ok(0) => Err(Error::Config(format!("{} 必须大于 0", key))),
        Ok(secs) => Ok(Duration::from_secs(secs)),
        Err(e) => Err(Error::Config(format!("{}={:?} 不是有效的秒数: {}", key, value, e))),
    }
}

/// 解析触发词 JSON 数组，丢弃空字符串
fn parse_triggers(raw: &str) -> Result<Vec<String>> {
    let triggers: Vec<String> = serde_json::from_str(raw).map_err(|e| {
        Error::Config(format!("{} 必须是字符串 JSON 数组: {}", env::TRIGGERS, e))
    })?;
    Ok(triggers.into_iter().filter(|t| !t.is_empty()).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_without_env() {
        let config = BridgeConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.channel, "agent-squad");
        assert_eq!(config.poll_interval, Duration::from_secs(30));
        assert_eq!(config.checkpoint_path, PathBuf::from(".last_check"));
        assert_eq!(config.delivery.program, "openclaw");
        assert_eq!(config.delivery.timeout, Duration::from_secs(10));
        assert!(config.triggers.iter().any(|t| t == "@human"));
    }

    #[test]
    fn test_env_overrides() {
        let config = BridgeConfig::from_lookup(lookup(&[
            ("SQUAD_DB", "/tmp/squad.db"),
            ("DISCORD_CHANNEL", "ops"),
            ("POLL_INTERVAL", "5"),
            ("BRIDGE_DELIVERY_TIMEOUT", "3"),
            ("BRIDGE_TRIGGERS", r#"["@ops", "", "shipped"]"#),
        ]))
        .unwrap();

        assert_eq!(config.db_path, PathBuf::from("/tmp/squad.db"));
        assert_eq!(config.channel, "ops");
        assert_eq!(config.poll_interval, Duration::from_secs(5));
        assert_eq!(config.delivery.timeout, Duration::from_secs(3));
        assert_eq!(config.triggers, vec!["@ops", "shipped"]);
    }

    #[test]
    fn test_blank_values_fall_back_to_defaults() {
        let config = BridgeConfig::from_lookup(lookup(&[("DISCORD_CHANNEL", "  ")])).unwrap();
        assert_eq!(config.channel, DEFAULT_CHANNEL);
    }

    #[test]
    fn test_invalid_interval_is_config_error() {
        for bad in ["abc", "0", "-1"] {
            let err = BridgeConfig::from_lookup(lookup(&[("POLL_INTERVAL", bad)])).unwrap_err();
            assert!(matches!(err, Error::Config(_)), "{} should be rejected", bad);
        }
    }

    #[test]
    fn test_invalid_triggers_is_config_error() {
        let err = BridgeConfig::from_lookup(lookup(&[("BRIDGE_TRIGGERS", "@human")])).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_tilde_expansion() {
        let path = expand_path("~/squad.db");
        assert!(!path.to_string_lossy().starts_with('~'));
    }
}
