//! 检查点存储
//!
//! 文件格式（纯文本，十进制毫秒时间戳）：
//!
//! ```text
//! 1718000000000      <- 检查点：该时刻之前的记录都已处理过
//! 1717999990000      <- 可选：重试下界，上个周期投递失败的最早记录 created_at - 1
//! ```
//!
//! 读取下界取两者较小值，投递失败的记录在检查点越过它之后仍会被重新读到。
//!
//! 带小数点的值按旧版浮点秒读取并换算成毫秒，下次保存时改写为整数毫秒。

use std::fs;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;

use crate::error::{Error, Result};

/// 持久化的水位线
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Watermark {
    /// 时间检查点（毫秒）
    pub checkpoint: i64,
    /// 待重试记录的读取下界
    pub retry_floor: Option<i64>,
}

impl Watermark {
    pub fn new(checkpoint: i64) -> Self {
        Self {
            checkpoint,
            retry_floor: None,
        }
    }

    /// 传给读取器的 since
    pub fn read_since(&self) -> i64 {
        match self.retry_floor {
            Some(floor) => floor.min(self.checkpoint),
            None => self.checkpoint,
        }
    }

    fn encode(&self) -> String {
        match self.retry_floor {
            Some(floor) => format!("{}\n{}\n", self.checkpoint, floor),
            None => format!("{}\n", self.checkpoint),
        }
    }

    fn decode(text: &str) -> Result<Self> {
        let mut lines = text.lines().map(str::trim).filter(|l| !l.is_empty());

        let checkpoint = match lines.next() {
            Some(line) => parse_millis(line)?,
            None => return Ok(Self::default()),
        };
        let retry_floor = lines.next().map(parse_millis).transpose()?;

        Ok(Self {
            checkpoint,
            retry_floor,
        })
    }
}

fn parse_millis(s: &str) -> Result<i64> {
    if s.contains('.') {
        return parse_legacy_seconds(s);
    }
    s.parse::<i64>()
        .map_err(|e| Error::Checkpoint(format!("无效的时间戳 {:?}: {}", s, e)))
}

/// 旧版检查点：浮点秒，例如 `1718000000.12`
fn parse_legacy_seconds(s: &str) -> Result<i64> {
    let secs = s
        .parse::<f64>()
        .map_err(|e| Error::Checkpoint(format!("无效的时间戳 {:?}: {}", s, e)))?;
    let millis = (secs * 1000.0).round();
    if !millis.is_finite() || millis < 0.0 || millis > i64::MAX as f64 {
        return Err(Error::Checkpoint(format!("时间戳超出范围: {:?}", s)));
    }
    tracing::info!("读取旧版检查点 (秒): {} -> {}ms", s, millis as i64);
    Ok(millis as i64)
}

/// 检查点存储接口
pub trait CheckpointStore: Send + Sync {
    /// 读取水位线，从未保存过时返回 0
    fn load(&self) -> Result<Watermark>;

    /// 保存水位线
    fn store(&self, watermark: Watermark) -> Result<()>;
}

/// 文件检查点
#[derive(Debug, Clone)]
pub struct FileCheckpoint {
    path: PathBuf,
}

impl FileCheckpoint {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

impl CheckpointStore for FileCheckpoint {
    fn load(&self) -> Result<Watermark> {
        match fs::read_to_string(&self.path) {
            Ok(text) => Watermark::decode(&text),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Watermark::default()),
            Err(e) => Err(e.into()),
        }
    }

    fn store(&self, watermark: Watermark) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        // 先写临时文件再 rename，中途崩溃不会留下半截内容
        let tmp = self.temp_path();
        fs::write(&tmp, watermark.encode())?;
        fs::rename(&tmp, &self.path)?;

        tracing::trace!("💾 检查点已保存: {:?}", watermark);
        Ok(())
    }
}

/// 内存检查点（测试、嵌入使用）
#[derive(Debug, Default)]
pub struct MemoryCheckpoint {
    watermark: Mutex<Watermark>,
    writes: Mutex<usize>,
}

impl MemoryCheckpoint {
    pub fn new(watermark: Watermark) -> Self {
        Self {
            watermark: Mutex::new(watermark),
            writes: Mutex::new(0),
        }
    }

    /// 当前值
    pub fn get(&self) -> Watermark {
        *self.watermark.lock()
    }

    /// 保存次数
    pub fn writes(&self) -> usize {
        *self.writes.lock()
    }
}

impl CheckpointStore for MemoryCheckpoint {
    fn load(&self) -> Result<Watermark> {
        Ok(self.get())
    }

    fn store(&self, watermark: Watermark) -> Result<()> {
        *self.watermark.lock() = watermark;
        *self.writes.lock() += 1;
        Ok(())
    }
}
