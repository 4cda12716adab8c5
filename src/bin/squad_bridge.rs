//! squad-bridge - squad 数据库镜像进程
//!
//! 负责：
//! - 定时执行镜像周期
//! - SIGINT / SIGTERM 优雅退出

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{ArgGroup, Parser};
use squad_bridge::{Bridge, BridgeConfig};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Mirror agent squad activity into a chat channel
#[derive(Debug, Parser)]
#[command(name = "squad-bridge", version)]
#[command(group(ArgGroup::new("mode").args(["once", "dry_run"])))]
struct Cli {
    /// squad 数据库路径（覆盖 SQUAD_DB）
    #[arg(long)]
    db: Option<PathBuf>,

    /// 目标频道（覆盖 DISCORD_CHANNEL）
    #[arg(long)]
    channel: Option<String>,

    /// 轮询间隔秒数（覆盖 POLL_INTERVAL）
    #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
    interval: Option<u64>,

    /// 只执行一个周期
    #[arg(long)]
    once: bool,

    /// 只打印待投递通知，不投递也不推进检查点
    #[arg(long, conflicts_with = "once")]
    dry_run: bool,

    /// 以 JSON 输出 --once / --dry-run 的结果
    #[arg(long, requires = "mode")]
    json: bool,
}

impl Cli {
    fn apply(&self, config: &mut BridgeConfig) {
        if let Some(ref db) = self.db {
            config.db_path = db.clone();
        }
        if let Some(ref channel) = self.channel {
            config.channel = channel.clone();
        }
        if let Some(secs) = self.interval {
            config.poll_interval = Duration::from_secs(secs);
        }
    }
}

/// 等待 Ctrl-C 或 SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!("无法监听 Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::warn!("无法监听 SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // 初始化日志
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive("squad_bridge=info".parse()?))
        .init();

    let cli = Cli::parse();

    // 解析配置
    let mut config = BridgeConfig::from_env().context("读取配置失败")?;
    cli.apply(&mut config);

    tracing::info!("🚀 squad-bridge v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!("Database: {}", config.db_path.display());
    tracing::info!("Channel: {}", config.channel);
    tracing::info!("Poll interval: {}s", config.poll_interval.as_secs());
    tracing::info!("Checkpoint: {}", config.checkpoint_path.display());

    // 配置错误在启动时暴露
    let bridge = Bridge::from_config(&config).context("启动失败")?;

    if cli.dry_run {
        let notifications = bridge.preview().await?;
        if cli.json {
            println!("{}", serde_json::to_string_pretty(&notifications)?);
        } else {
            for n in &notifications {
                println!("[{} {}]\n{}\n", n.kind, n.id, n.text);
            }
            println!("{} notification(s) pending", notifications.len());
        }
        return Ok(());
    }

    if cli.once {
        let report = bridge.run_cycle().await?;
        if cli.json {
            println!("{}", serde_json::to_string_pretty(&report)?);
        } else {
            println!(
                "delivered {} / failed {}",
                report.total_delivered(),
                report.total_failed()
            );
        }
        return Ok(());
    }

    bridge.run_until(shutdown_signal()).await;

    tracing::info!("👋 squad-bridge exiting");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_requires_a_one_shot_mode() {
        let err = Cli::try_parse_from(["squad-bridge", "--json"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::MissingRequiredArgument);

        assert!(Cli::try_parse_from(["squad-bridge", "--once", "--json"]).is_ok());
        assert!(Cli::try_parse_from(["squad-bridge", "--dry-run", "--json"]).is_ok());
    }

    #[test]
    fn test_flags_override_config() {
        let cli = Cli::try_parse_from(["squad-bridge", "--channel", "ops", "--interval", "5"]).unwrap();
        let mut config = BridgeConfig::default();
        cli.apply(&mut config);

        assert_eq!(config.channel, "ops");
        assert_eq!(config.poll_interval, Duration::from_secs(5));
    }

    #[test]
    fn test_zero_interval_rejected() {
        assert!(Cli::try_parse_from(["squad-bridge", "--interval", "0"]).is_err());
    }
}
