//! Bridge 周期编排
//!
//! 一个周期：读水位线 → 读候选记录 → 格式化 → 投递 → 标记已投递 → 推进水位线。
//! 周期之间不重叠；单个周期失败只记录日志，不推进水位线，也不会让进程退出。

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use crate::checkpoint::{CheckpointStore, FileCheckpoint, Watermark};
use crate::config::BridgeConfig;
use crate::db::{MessageFilter, RecordStore, SquadDB};
use crate::delivery::{CommandDeliverer, Deliverer};
use crate::error::Result;
use crate::format::{self, Notification};
use crate::types::{Candidates, RecordId, RecordKind};

/// 时钟（毫秒时间戳）
pub type Clock = Arc<dyn Fn() -> i64 + Send + Sync>;

/// 当前时间戳 (毫秒)
pub fn current_time_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// 单种记录的周期统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct KindReport {
    pub candidates: usize,
    pub delivered: usize,
    pub failed: usize,
}

/// 周期结果
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CycleReport {
    /// 本周期读取下界
    pub since: i64,
    /// 周期开始时捕获的时间
    pub now: i64,
    /// 保存后的水位线
    pub checkpoint: i64,
    pub retry_floor: Option<i64>,
    pub activities: KindReport,
    pub tasks: KindReport,
    pub messages: KindReport,
}

impl CycleReport {
    pub fn kind(&self, kind: RecordKind) -> &KindReport {
        match kind {
            RecordKind::Activity => &self.activities,
            RecordKind::Task => &self.tasks,
            RecordKind::Message => &self.messages,
        }
    }

    fn kind_mut(&mut self, kind: RecordKind) -> &mut KindReport {
        match kind {
            RecordKind::Activity => &mut self.activities,
            RecordKind::Task => &mut self.tasks,
            RecordKind::Message => &mut self.messages,
        }
    }

    pub fn total_delivered(&self) -> usize {
        RecordKind::ALL.iter().map(|k| self.kind(*k).delivered).sum()
    }

    pub fn total_failed(&self) -> usize {
        RecordKind::ALL.iter().map(|k| self.kind(*k).failed).sum()
    }
}

/// 本周期已投递的 id，按种类分组
#[derive(Debug, Default)]
struct DeliveredIds {
    activities: Vec<RecordId>,
    tasks: Vec<RecordId>,
    messages: Vec<RecordId>,
}

impl DeliveredIds {
    fn push(&mut self, kind: RecordKind, id: RecordId) {
        match kind {
            RecordKind::Activity => self.activities.push(id),
            RecordKind::Task => self.tasks.push(id),
            RecordKind::Message => self.messages.push(id),
        }
    }

    fn take(&mut self, kind: RecordKind) -> Vec<RecordId> {
        match kind {
            RecordKind::Activity => std::mem::take(&mut self.activities),
            RecordKind::Task => std::mem::take(&mut self.tasks),
            RecordKind::Message => std::mem::take(&mut self.messages),
        }
    }
}

/// Bridge 服务
pub struct Bridge {
    channel: String,
    poll_interval: Duration,
    filter: MessageFilter,
    store: Arc<dyn RecordStore>,
    checkpoint: Arc<dyn CheckpointStore>,
    deliverer: Arc<dyn Deliverer>,
    clock: Clock,
}

impl Bridge {
    /// 用注入的组件创建 Bridge
    pub fn new(
        config: &BridgeConfig,
        store: Arc<dyn RecordStore>,
        checkpoint: Arc<dyn CheckpointStore>,
        deliverer: Arc<dyn Deliverer>,
    ) -> Result<Self> {
        Ok(Self {
            channel: config.channel.clone(),
            poll_interval: config.poll_interval,
            filter: MessageFilter::new(config.triggers.iter().cloned())?,
            store,
            checkpoint,
            deliverer,
            clock: Arc::new(current_time_ms),
        })
    }

    /// 按配置创建：SQLite 存储 + 文件检查点 + 外部命令投递
    ///
    /// 数据库不存在或检查点文件损坏时直接返回错误。
    pub fn from_config(config: &BridgeConfig) -> Result<Self> {
        let store = Arc::new(SquadDB::connect(&config.db_path)?);
        for kind in RecordKind::ALL {
            match store.count_pending(kind) {
                Ok(n) => tracing::debug!("{} pending: {}", kind.table(), n),
                Err(e) => tracing::warn!("无法统计 {}: {}", kind.table(), e),
            }
        }
        let checkpoint = Arc::new(FileCheckpoint::new(&config.checkpoint_path));
        checkpoint.load()?;
        let deliverer = Arc::new(CommandDeliverer::new(&config.delivery));
        Self::new(config, store, checkpoint, deliverer)
    }

    /// 替换时钟
    pub fn with_clock<F>(mut self, clock: F) -> Self
    where
        F: Fn() -> i64 + Send + Sync + 'static,
    {
        self.clock = Arc::new(clock);
        self
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// 读取候选记录（阻塞 IO 放到 spawn_blocking）
    async fn load_candidates(&self, since: i64) -> Result<Candidates> {
        let store = self.store.clone();
        let filter = self.filter.clone();
        tokio::task::spawn_blocking(move || store.fetch_candidates(since, &filter)).await?
    }

    /// 标记已投递
    async fn mark(&self, kind: RecordKind, ids: Vec<RecordId>) -> Result<usize> {
        if ids.is_empty() {
            return Ok(0);
        }
        let store = self.store.clone();
        tokio::task::spawn_blocking(move || store.mark_delivered(kind, &ids)).await?
    }

    /// 执行一个周期
    pub async fn run_cycle(&self) -> Result<CycleReport> {
        let watermark = self.checkpoint.load()?;
        // 先取时间再读库：读取期间新写入的记录留给下个周期
        let now = (self.clock)();
        let since = watermark.read_since();

        let candidates = self.load_candidates(since).await?;

        let mut report = CycleReport {
            since,
            now,
            ..Default::default()
        };
        let mut delivered = DeliveredIds::default();
        let mut earliest_failure: Option<i64> = None;

        for notification in format::render_all(&candidates) {
            let Notification {
                kind,
                id,
                created_at,
                text,
            } = notification;
            let stats = report.kind_mut(kind);
            stats.candidates += 1;

            if self.deliverer.deliver(&self.channel, &text).await {
                stats.delivered += 1;
                tracing::debug!("📤 Posted {} {}", kind, id);
                delivered.push(kind, id);
            } else {
                stats.failed += 1;
                tracing::warn!("Delivery failed for {} {}, will retry next cycle", kind, id);
                earliest_failure = Some(earliest_failure.map_or(created_at, |t| t.min(created_at)));
            }
        }

        for kind in RecordKind::ALL {
            self.mark(kind, delivered.take(kind)).await?;
        }

        let next = Watermark {
            checkpoint: watermark.checkpoint.max(now),
            retry_floor: earliest_failure.map(|t| t.saturating_sub(1)),
        };
        self.checkpoint.store(next)?;
        report.checkpoint = next.checkpoint;
        report.retry_floor = next.retry_floor;

        let total = report.total_delivered();
        if total > 0 {
            tracing::info!(
                "[{}] Posted {} items to {}",
                chrono::Local::now().format("%Y-%m-%dT%H:%M:%S"),
                total,
                self.channel
            );
        }

        Ok(report)
    }

    /// 预览当前候选通知（不投递、不标记、不推进水位线）
    pub async fn preview(&self) -> Result<Vec<Notification>> {
        let watermark = self.checkpoint.load()?;
        let candidates = self.load_candidates(watermark.read_since()).await?;
        Ok(format::render_all(&candidates))
    }

    /// 循环执行周期，直到 `shutdown` 完成
    ///
    /// 收到退出信号时放弃进行中的周期：水位线只在周期末尾写入，已做的标记可重复执行。
    pub async fn run_until<F>(&self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    tracing::info!("收到退出信号，放弃当前周期");
                    break;
                }
                result = self.run_cycle() => {
                    if let Err(e) = result {
                        tracing::error!("❌ Error in cycle: {}", e);
                    }
                }
            }

            tokio::select! {
                _ = &mut shutdown => {
                    tracing::info!("收到退出信号");
                    break;
                }
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::MemoryCheckpoint;
    use crate::delivery::RecordingDeliverer;
    use crate::error::Error;
    use crate::types::{Activity, Message, Task};
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// 内存存储：实现与 SQLite 相同的读取契约
    #[derive(Default)]
    struct MemoryStore {
        activities: Mutex<Vec<(Activity, bool)>>,
        tasks: Mutex<Vec<(Task, bool)>>,
        messages: Mutex<Vec<(Message, bool)>>,
        marks: AtomicUsize,
    }

    fn pending<T: Clone>(rows: &[(T, bool)], since: i64, created: impl Fn(&T) -> i64) -> Vec<T> {
        rows.iter()
            .filter(|(r, done)| !done && created(r) > since)
            .map(|(r, _)| r.clone())
            .collect()
    }

    fn mark<T>(rows: &mut [(T, bool)], ids: &[RecordId], id: impl Fn(&T) -> &RecordId) -> usize {
        let mut n = 0;
        for (r, done) in rows.iter_mut() {
            if ids.contains(id(r)) {
                *done = true;
                n += 1;
            }
        }
        n
    }

    impl RecordStore for MemoryStore {
        fn fetch_activities(&self, since: i64) -> Result<Vec<Activity>> {
            Ok(pending(self.activities.lock().as_slice(), since, |a: &Activity| a.created_at))
        }

        fn fetch_tasks(&self, since: i64) -> Result<Vec<Task>> {
            Ok(pending(self.tasks.lock().as_slice(), since, |t: &Task| t.created_at))
        }

        fn fetch_messages(&self, since: i64, filter: &MessageFilter) -> Result<Vec<Message>> {
            Ok(pending(self.messages.lock().as_slice(), since, |m: &Message| m.created_at)
                .into_iter()
                .filter(|m| filter.is_match(&m.content))
                .collect())
        }

        fn mark_delivered(&self, kind: RecordKind, ids: &[RecordId]) -> Result<usize> {
            assert!(!ids.is_empty(), "empty mark must not reach the store");
            self.marks.fetch_add(1, Ordering::SeqCst);
            Ok(match kind {
                RecordKind::Activity => mark(self.activities.lock().as_mut_slice(), ids, |a: &Activity| &a.id),
                RecordKind::Task => mark(self.tasks.lock().as_mut_slice(), ids, |t: &Task| &t.id),
                RecordKind::Message => mark(self.messages.lock().as_mut_slice(), ids, |m: &Message| &m.id),
            })
        }
    }

    /// 永远失败的存储
    #[derive(Default)]
    struct UnreachableStore {
        reads: AtomicUsize,
    }

    impl RecordStore for UnreachableStore {
        fn fetch_activities(&self, _since: i64) -> Result<Vec<Activity>> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            Err(Error::Database(rusqlite::Error::QueryReturnedNoRows))
        }
        fn fetch_tasks(&self, _since: i64) -> Result<Vec<Task>> {
            unreachable!()
        }
        fn fetch_messages(&self, _since: i64, _filter: &MessageFilter) -> Result<Vec<Message>> {
            unreachable!()
        }
        fn mark_delivered(&self, _kind: RecordKind, _ids: &[RecordId]) -> Result<usize> {
            unreachable!()
        }
    }

    fn activity(id: i64, created_at: i64, message: &str) -> Activity {
        Activity {
            id: RecordId::Int(id),
            agent_name: "Scout".into(),
            activity_type: "agent_active".into(),
            message: message.into(),
            created_at,
        }
    }

    fn config() -> BridgeConfig {
        BridgeConfig {
            poll_interval: Duration::from_millis(10),
            ..Default::default()
        }
    }

    struct Harness {
        store: Arc<MemoryStore>,
        checkpoint: Arc<MemoryCheckpoint>,
        deliverer: Arc<RecordingDeliverer>,
        bridge: Bridge,
    }

    fn harness(checkpoint: i64, now: i64) -> Harness {
        let store = Arc::new(MemoryStore::default());
        let cp = Arc::new(MemoryCheckpoint::new(Watermark::new(checkpoint)));
        let deliverer = Arc::new(RecordingDeliverer::new());
        let bridge = Bridge::new(&config(), store.clone(), cp.clone(), deliverer.clone())
            .unwrap()
            .with_clock(move || now);
        Harness {
            store,
            checkpoint: cp,
            deliverer,
            bridge,
        }
    }

    #[tokio::test]
    async fn test_empty_cycle_advances_checkpoint_without_marks() {
        let h = harness(1000, 2000);

        let report = h.bridge.run_cycle().await.unwrap();

        assert_eq!(report.total_delivered(), 0);
        assert_eq!(h.store.marks.load(Ordering::SeqCst), 0);
        assert_eq!(h.checkpoint.get(), Watermark::new(2000));
    }

    #[tokio::test]
    async fn test_partial_failure_keeps_failed_record_pending() {
        let h = harness(1000, 5000);
        h.store.activities.lock().extend([
            (activity(1, 1100, "first"), false),
            (activity(2, 1200, "second boom"), false),
            (activity(3, 1300, "third"), false),
        ]);
        h.deliverer.fail_when_contains("boom");

        let report = h.bridge.run_cycle().await.unwrap();
        assert_eq!(report.activities.delivered, 2);
        assert_eq!(report.activities.failed, 1);

        let done: Vec<_> = h.store.activities.lock().iter().map(|(_, d)| *d).collect();
        assert_eq!(done, vec![true, false, true]);

        let wm = h.checkpoint.get();
        assert_eq!(wm.checkpoint, 5000);
        assert_eq!(wm.retry_floor, Some(1199));

        // 下个周期仍会重试，即使检查点已越过它
        h.deliverer.heal();
        let report = h.bridge.run_cycle().await.unwrap();
        assert_eq!(report.since, 1199);
        assert_eq!(report.activities.delivered, 1);
        assert!(h.store.activities.lock().iter().all(|(_, d)| *d));
        assert_eq!(h.checkpoint.get(), Watermark::new(5000));
    }

    #[tokio::test]
    async fn test_checkpoint_never_moves_backwards() {
        let h = harness(9000, 5000);
        h.bridge.run_cycle().await.unwrap();
        assert_eq!(h.checkpoint.get().checkpoint, 9000);
    }

    #[tokio::test]
    async fn test_read_failure_does_not_advance_checkpoint() {
        let store = Arc::new(UnreachableStore::default());
        let cp = Arc::new(MemoryCheckpoint::new(Watermark::new(1000)));
        let bridge = Bridge::new(&config(), store, cp.clone(), Arc::new(RecordingDeliverer::new()))
            .unwrap();

        assert!(bridge.run_cycle().await.is_err());
        assert_eq!(cp.writes(), 0);
        assert_eq!(cp.get(), Watermark::new(1000));
    }

    #[tokio::test]
    async fn test_run_loop_survives_failing_cycles() {
        let store = Arc::new(UnreachableStore::default());
        let cp = Arc::new(MemoryCheckpoint::new(Watermark::new(1000)));
        let bridge = Bridge::new(&config(), store.clone(), cp.clone(), Arc::new(RecordingDeliverer::new()))
            .unwrap();

        bridge
            .run_until(tokio::time::sleep(Duration::from_millis(200)))
            .await;

        assert!(store.reads.load(Ordering::SeqCst) >= 2);
        assert_eq!(cp.writes(), 0);
    }

    #[tokio::test]
    async fn test_run_loop_stops_on_shutdown() {
        let h = harness(0, 10);
        h.store.activities.lock().push((activity(1, 5, "hello"), false));

        h.bridge.run_until(tokio::time::sleep(Duration::from_millis(50))).await;

        // 只投递一次：第二个周期读不到已标记的记录
        assert_eq!(h.deliverer.sent().len(), 1);
        assert!(h.checkpoint.writes() >= 1);
    }

    /// 命中 `hang` 的文本永远不返回
    struct HangingDeliverer {
        entered: Arc<tokio::sync::Notify>,
    }

    #[async_trait::async_trait]
    impl Deliverer for HangingDeliverer {
        async fn deliver(&self, _channel: &str, text: &str) -> bool {
            if text.contains("hang") {
                self.entered.notify_one();
                std::future::pending::<()>().await;
            }
            true
        }
    }

    #[tokio::test]
    async fn test_shutdown_abandons_in_flight_cycle() {
        let store = Arc::new(MemoryStore::default());
        store.activities.lock().extend([
            (activity(1, 5, "fine"), false),
            (activity(2, 6, "hang up"), false),
        ]);
        let cp = Arc::new(MemoryCheckpoint::new(Watermark::new(0)));
        let entered = Arc::new(tokio::sync::Notify::new());
        let deliverer = Arc::new(HangingDeliverer {
            entered: entered.clone(),
        });
        let bridge = Bridge::new(&config(), store.clone(), cp.clone(), deliverer)
            .unwrap()
            .with_clock(|| 10);

        let shutdown = async move { entered.notified().await };
        tokio::time::timeout(Duration::from_secs(5), bridge.run_until(shutdown))
            .await
            .expect("run loop should stop while delivery hangs");

        // 周期被放弃：水位线没写，已投递的记录也还没标记
        assert_eq!(cp.writes(), 0);
        assert_eq!(cp.get(), Watermark::new(0));
        assert_eq!(store.marks.load(Ordering::SeqCst), 0);
        assert!(store.activities.lock().iter().all(|(_, done)| !done));
    }

    #[tokio::test]
    async fn test_preview_has_no_side_effects() {
        let h = harness(0, 10);
        h.store.activities.lock().push((activity(1, 5, "hello"), false));

        let preview = h.bridge.preview().await.unwrap();
        assert_eq!(preview.len(), 1);
        assert_eq!(preview[0].text, "▶️ **Scout**: hello");
        assert_eq!(h.deliverer.attempts(), 0);
        assert_eq!(h.checkpoint.writes(), 0);
        assert_eq!(h.store.marks.load(Ordering::SeqCst), 0);
    }
}
